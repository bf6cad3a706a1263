//! Offline scan: the deterministic pipeline over local snapshot and CV directories.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use intake_common::pipeline::{self, Scope};
use intake_common::report::{self, RunMeta};
use intake_common::{
    CvRepository, DetectorSet, IntakeConfig, JsonDirStore, MetadataStore, Report, RunContext,
    SourceEvaluator, StaticCalendar,
};
use std::path::Path;

pub struct ScanRequest<'a> {
    pub date: NaiveDate,
    pub data_dir: &'a Path,
    pub cv_dir: &'a Path,
    pub sources: &'a [String],
    pub config: Option<&'a Path>,
}

pub fn run(req: &ScanRequest<'_>) -> Result<Report> {
    let config = match req.config {
        Some(path) => IntakeConfig::load_file(path)?,
        None => IntakeConfig::default(),
    };
    let repo = CvRepository::load_dir(req.cv_dir, &config.detection)
        .with_context(|| format!("loading CVs from {}", req.cv_dir.display()))?;
    let snapshot = JsonDirStore::new(req.data_dir).load_day(req.date)?;
    let calendar = StaticCalendar::from_config(&config.calendar);
    let detectors = DetectorSet::standard();

    let Scope {
        configured,
        unconfigured,
    } = pipeline::resolve_scope(&repo, &snapshot, req.sources)?;
    let evaluator = SourceEvaluator::new(&repo, &snapshot, &calendar, &detectors);

    let mut ctx = RunContext::new(req.date);
    let mut scan = pipeline::run(&evaluator, &mut ctx, &configured);
    scan.verdicts
        .extend(unconfigured.iter().map(|id| evaluator.unconfigured(id)));

    Ok(report::build(&ctx, scan.verdicts, scan.trace, RunMeta::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use intake_common::model::RunStatus;
    use intake_common::SourceStatus;

    const RAPPI_TOML: &str = r#"
source_id = "Rappi"
volume_threshold_pct = 50.0

[volume_baseline]
Tue = 10000
"#;

    const FILES_JSON: &str = r#"{
  "Rappi": [
    {"filename": "rappi_20250909.csv", "rows": 500, "status": "processed", "uploaded_at": "2025-09-09T09:00:00"}
  ],
  "Ghost": [
    {"filename": "ghost.csv", "rows": 10, "status": "processed", "uploaded_at": "2025-09-09T10:00:00Z"}
  ]
}"#;

    fn fixture() -> (tempfile::TempDir, tempfile::TempDir) {
        let cv = tempfile::tempdir().unwrap();
        std::fs::write(cv.path().join("rappi.toml"), RAPPI_TOML).unwrap();
        let data = tempfile::tempdir().unwrap();
        let day = data.path().join("2025-09-09_run");
        std::fs::create_dir(&day).unwrap();
        std::fs::write(day.join("files.json"), FILES_JSON).unwrap();
        (cv, data)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 9).unwrap()
    }

    #[test]
    fn test_scan_flags_volume_drop() {
        let (cv, data) = fixture();
        let report = run(&ScanRequest {
            date: date(),
            data_dir: data.path(),
            cv_dir: cv.path(),
            sources: &[],
            config: None,
        })
        .unwrap();

        // Ghost has no CV, so the run cannot be declared healthy
        assert_eq!(report.status, RunStatus::Inconclusive);
        assert_eq!(report.verdict("Rappi").unwrap().status, SourceStatus::NeedsAttention);
        assert_eq!(report.verdict("Ghost").unwrap().status, SourceStatus::Unconfigured);
        assert!(report.trace.is_none());
        assert_eq!(report.stats.tool_calls, 2);
    }

    #[test]
    fn test_scan_honors_source_filter() {
        let (cv, data) = fixture();
        let sources = vec!["Rappi".to_string()];
        let report = run(&ScanRequest {
            date: date(),
            data_dir: data.path(),
            cv_dir: cv.path(),
            sources: &sources,
            config: None,
        })
        .unwrap();
        assert_eq!(report.sources.len(), 1);
        assert_eq!(report.status, RunStatus::NeedsAttention);
    }

    #[test]
    fn test_missing_snapshot_is_an_error() {
        let (cv, data) = fixture();
        let result = run(&ScanRequest {
            date: NaiveDate::from_ymd_opt(2025, 9, 10).unwrap(),
            data_dir: data.path(),
            cv_dir: cv.path(),
            sources: &[],
            config: None,
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_applies_configured_holidays() {
        let (cv, data) = fixture();
        std::fs::write(
            cv.path().join("bankx.toml"),
            "source_id = \"BankX\"\n\n[[entities]]\nentity_id = \"daily\"\n",
        )
        .unwrap();
        let config = data.path().join("intake.toml");
        std::fs::write(&config, "[calendar.sources.BankX]\nholidays = [\"2025-09-09\"]\n").unwrap();
        let sources = vec!["BankX".to_string()];
        let scan = |config: Option<&Path>| {
            run(&ScanRequest {
                date: date(),
                data_dir: data.path(),
                cv_dir: cv.path(),
                sources: &sources,
                config,
            })
            .unwrap()
        };

        assert_eq!(scan(None).verdict("BankX").unwrap().status, SourceStatus::Urgent);
        assert_eq!(scan(Some(config.as_path())).verdict("BankX").unwrap().status, SourceStatus::AllGood);
    }
}
