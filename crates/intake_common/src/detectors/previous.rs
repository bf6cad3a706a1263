//! Files stamped with a date from an earlier period.
//!
//! A historical re-upload is not an anomaly, so this check yields notes
//! rather than incidents and never moves a source's severity.

use crate::context::RunContext;
use crate::model::{NoteKind, ObservedFile, VerdictNote};
use chrono::{Duration, NaiveDate};
use regex::Regex;
use serde_json::json;

/// Files stamped within this many days of the run date are still current
pub const PREVIOUS_PERIOD_GRACE_DAYS: i64 = 2;

/// Date carried in a `<name>_YYYYMMDD.csv` file name
pub fn stamped_date(file_name: &str) -> Option<NaiveDate> {
    let re = Regex::new(r"_(\d{8})\.csv$").ok()?;
    let digits = re.captures(file_name)?.get(1)?.as_str();
    NaiveDate::parse_from_str(digits, "%Y%m%d").ok()
}

/// One note per file stamped before the run date minus the grace period
pub fn previous_period_notes(ctx: &RunContext, files: &[ObservedFile]) -> Vec<VerdictNote> {
    let cutoff = ctx.date - Duration::days(PREVIOUS_PERIOD_GRACE_DAYS);
    let mut notes: Vec<VerdictNote> = files
        .iter()
        .filter_map(|f| {
            let stamped = stamped_date(&f.file_name)?;
            (stamped < cutoff).then(|| VerdictNote {
                kind: NoteKind::PreviousPeriodFile,
                file_name: f.file_name.clone(),
                summary: format!(
                    "File '{}' is from a previous period ({}). No action needed, historical upload.",
                    f.file_name, stamped
                ),
                data: json!({
                    "file_date": stamped.to_string(),
                    "run_date": ctx.date.to_string(),
                }),
            })
        })
        .collect();
    notes.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    notes
}
