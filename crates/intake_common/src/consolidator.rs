//! Folds detector incidents into one verdict per source.
//!
//! Worst-case precedence: the verdict is the maximum incident severity, or
//! ALL_GOOD when there are none. Incidents are put into a canonical order
//! so that any permutation of the same input yields an identical verdict.

use crate::context::RunContext;
use crate::error::{IntakeError, Result};
use crate::model::{Incident, ObservedFile, Severity, SeverityOverride, SourceStatus, SourceVerdict};
use std::cmp::Ordering;
use tracing::{debug, info};

/// Resolve one source's incidents into a verdict
pub fn resolve(ctx: &RunContext, source_id: &str, mut incidents: Vec<Incident>) -> SourceVerdict {
    incidents.sort_by(canonical_order);

    let severity = incidents
        .iter()
        .map(|i| i.severity)
        .max()
        .unwrap_or(Severity::AllGood);

    debug!(
        "run {} {}: {} incident(s) -> {}",
        ctx.run_id,
        source_id,
        incidents.len(),
        severity
    );

    SourceVerdict {
        source_id: source_id.to_string(),
        status: SourceStatus::from(severity),
        severity: Some(severity),
        incidents,
        notes: Vec::new(),
        processed_files: 0,
        total_rows: 0,
        narrative: None,
        severity_override: None,
        inconclusive_reason: None,
    }
}

/// Resolve and record the file/row totals seen for the source
pub fn resolve_with_files(
    ctx: &RunContext,
    source_id: &str,
    incidents: Vec<Incident>,
    files: &[ObservedFile],
) -> SourceVerdict {
    let mut verdict = resolve(ctx, source_id, incidents);
    verdict.processed_files = files.len();
    verdict.total_rows = files.iter().map(|f| f.rows).sum();
    verdict
}

/// Severity first (worst on top), then a stable key over every other field
fn canonical_order(a: &Incident, b: &Incident) -> Ordering {
    b.severity
        .cmp(&a.severity)
        .then_with(|| a.detector.cmp(&b.detector))
        .then_with(|| a.entity_id.cmp(&b.entity_id))
        .then_with(|| a.file_name.cmp(&b.file_name))
        .then_with(|| a.evidence.summary.cmp(&b.evidence.summary))
        .then_with(|| a.recommendation.cmp(&b.recommendation))
        .then_with(|| a.evidence.data.to_string().cmp(&b.evidence.data.to_string()))
}

/// Apply an explicit override to a consolidated verdict.
///
/// The consolidated `severity` is kept as-is so the report shows both the
/// deterministic finding and the overridden status.
pub fn apply_override(
    verdict: &mut SourceVerdict,
    to: Severity,
    justification: &str,
    trace_step: usize,
) -> Result<()> {
    let justification = justification.trim();
    if justification.is_empty() {
        return Err(IntakeError::InvalidRequest(
            "an override needs a justification".to_string(),
        ));
    }
    let Some(from) = verdict.severity else {
        return Err(IntakeError::InvalidRequest(format!(
            "no evidence gathered for {}; nothing to override",
            verdict.source_id
        )));
    };

    info!(
        "[!]  Override on {}: {} -> {} ({})",
        verdict.source_id, from, to, justification
    );

    verdict.status = SourceStatus::from(to);
    verdict.severity_override = Some(SeverityOverride {
        from,
        to,
        justification: justification.to_string(),
        trace_step,
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DetectorId;
    use chrono::NaiveDate;
    use serde_json::json;

    fn ctx() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
    }

    fn incident(detector: DetectorId, severity: Severity) -> Incident {
        Incident::new(detector, "Uber", severity, format!("{}", detector), json!({}), "act")
    }

    #[test]
    fn test_no_incidents_is_all_good() {
        let verdict = resolve(&ctx(), "Uber", vec![]);
        assert_eq!(verdict.status, SourceStatus::AllGood);
        assert_eq!(verdict.severity, Some(Severity::AllGood));
    }

    #[test]
    fn test_worst_case_wins() {
        let verdict = resolve(
            &ctx(),
            "Uber",
            vec![
                incident(DetectorId::DuplicatedFailedFile, Severity::NeedsAttention),
                incident(DetectorId::UnexpectedEmptyFile, Severity::Urgent),
            ],
        );
        assert_eq!(verdict.status, SourceStatus::Urgent);
        assert_eq!(verdict.incidents[0].detector, DetectorId::UnexpectedEmptyFile);
    }

    #[test]
    fn test_swap_yields_same_verdict() {
        let a = incident(DetectorId::LateUpload, Severity::NeedsAttention);
        let b = incident(DetectorId::MissingFile, Severity::Urgent);
        let ctx = ctx();
        assert_eq!(
            resolve(&ctx, "Uber", vec![a.clone(), b.clone()]),
            resolve(&ctx, "Uber", vec![b, a])
        );
    }

    #[test]
    fn test_override_requires_justification() {
        let mut verdict = resolve(&ctx(), "Uber", vec![incident(DetectorId::MissingFile, Severity::Urgent)]);
        assert!(apply_override(&mut verdict, Severity::AllGood, "  ", 3).is_err());
        assert_eq!(verdict.status, SourceStatus::Urgent);

        apply_override(&mut verdict, Severity::NeedsAttention, "bank holiday confirmed", 3).unwrap();
        assert_eq!(verdict.status, SourceStatus::NeedsAttention);
        assert_eq!(verdict.severity, Some(Severity::Urgent));
        let logged = verdict.severity_override.unwrap();
        assert_eq!(logged.from, Severity::Urgent);
        assert_eq!(logged.trace_step, 3);
    }

    #[test]
    fn test_override_needs_evidence() {
        let mut verdict = SourceVerdict::unconfigured("Ghost", 0, 0);
        assert!(apply_override(&mut verdict, Severity::AllGood, "why not", 1).is_err());
    }
}
