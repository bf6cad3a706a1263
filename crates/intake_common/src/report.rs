//! Report synthesizer.
//!
//! Turns resolved verdicts and the reasoning trace into the structured run
//! report. The executive summary is generated deterministically from the
//! verdicts; oracle commentary is appended as an extra section and never
//! replaces or reorders the deterministic content.

use crate::context::RunContext;
use crate::model::{RunStatus, Severity, SourceStatus, SourceVerdict};
use crate::trace::ReasoningTrace;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use uuid::Uuid;

/// How the run chose its tool calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// Oracle-driven ReAct loop
    #[default]
    Agentic,
    /// Deterministic scan of every source, no oracle
    Pipeline,
}

impl std::fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agentic => write!(f, "agentic"),
            Self::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// Oracle token usage and cost
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub model: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub cost_usd: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsumptionStats {
    /// Oracle proposals consumed (including rejected ones)
    pub iterations: usize,
    pub tool_calls: usize,
    pub oracle_calls: usize,
    pub oracle_retries: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<UsageStats>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunFlags {
    pub iteration_cap_reached: bool,
    pub timed_out: bool,
    /// At least one in-scope source could not be fully evaluated
    pub partial: bool,
}

/// Final structured result of one analysis run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run_id: Uuid,
    pub date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub mode: AnalysisMode,
    pub status: RunStatus,
    pub executive_summary: String,
    pub sources: Vec<SourceVerdict>,
    pub stats: ConsumptionStats,
    pub flags: RunFlags,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<ReasoningTrace>,
}

impl Report {
    pub fn verdict(&self, source_id: &str) -> Option<&SourceVerdict> {
        self.sources.iter().find(|v| v.source_id == source_id)
    }

    pub fn incident_count(&self) -> usize {
        self.sources.iter().map(|v| v.incidents.len()).sum()
    }
}

/// Run-level facts the synthesizer cannot derive from verdicts alone
#[derive(Debug, Clone, Default)]
pub struct RunMeta {
    pub mode: AnalysisMode,
    pub stats: ConsumptionStats,
    pub flags: RunFlags,
    /// Oracle narrative for the whole run, if one was produced
    pub narrative: Option<String>,
    pub include_trace: bool,
}

/// Build the report. Verdicts are ordered by source id; their incidents are kept as given.
pub fn build(
    ctx: &RunContext,
    mut verdicts: Vec<SourceVerdict>,
    trace: ReasoningTrace,
    meta: RunMeta,
) -> Report {
    verdicts.sort_by(|a, b| a.source_id.cmp(&b.source_id));

    let mut flags = meta.flags;
    if verdicts.iter().any(|v| v.status == SourceStatus::Inconclusive) {
        flags.partial = true;
    }

    let status = global_status(&verdicts, &flags);
    let mut executive_summary = executive_summary(ctx.date, status, &verdicts, &flags);
    if let Some(narrative) = meta.narrative.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        executive_summary.push_str("\n## Analyst Notes\n\n");
        executive_summary.push_str(narrative);
        executive_summary.push('\n');
    }

    let mut stats = meta.stats;
    stats.tool_calls = trace.tool_calls();

    Report {
        run_id: ctx.run_id,
        date: ctx.date,
        generated_at: Utc::now(),
        mode: meta.mode,
        status,
        executive_summary,
        sources: verdicts,
        stats,
        flags,
        trace: meta.include_trace.then_some(trace),
    }
}

/// URGENT dominates everything (including provisional evidence on inconclusive
/// sources); otherwise any unresolved source or a partial run makes the run
/// INCONCLUSIVE; otherwise the worst resolved severity.
pub fn global_status(verdicts: &[SourceVerdict], flags: &RunFlags) -> RunStatus {
    let worst = verdicts
        .iter()
        .filter_map(|v| v.effective_severity())
        .max()
        .unwrap_or(Severity::AllGood);

    if worst == Severity::Urgent {
        return RunStatus::Urgent;
    }
    if flags.partial || verdicts.iter().any(|v| !v.is_resolved()) {
        return RunStatus::Inconclusive;
    }
    RunStatus::from(worst)
}

/// Deterministic markdown summary: overview, critical incidents, recommendations
pub fn executive_summary(
    date: NaiveDate,
    status: RunStatus,
    verdicts: &[SourceVerdict],
    flags: &RunFlags,
) -> String {
    let mut out = String::new();
    let count = |s: SourceStatus| verdicts.iter().filter(|v| v.status == s).count();

    let _ = writeln!(out, "## Executive Summary\n");
    let _ = writeln!(
        out,
        "Ingestion health for {}: **{}** across {} source(s) ({} urgent, {} needing attention, {} all good, {} inconclusive, {} unconfigured).",
        date,
        status,
        verdicts.len(),
        count(SourceStatus::Urgent),
        count(SourceStatus::NeedsAttention),
        count(SourceStatus::AllGood),
        count(SourceStatus::Inconclusive),
        count(SourceStatus::Unconfigured),
    );
    if flags.timed_out {
        let _ = writeln!(out, "\nThe run deadline passed before every source was resolved; this report is partial.");
    } else if flags.iteration_cap_reached {
        let _ = writeln!(out, "\nThe iteration cap was reached before every source was resolved; this report is partial.");
    }

    let flagged: Vec<&SourceVerdict> = verdicts.iter().filter(|v| !v.incidents.is_empty()).collect();
    let _ = writeln!(out, "\n## Critical Incidents\n");
    if flagged.is_empty() {
        let _ = writeln!(out, "No incidents detected.");
    }
    for verdict in &flagged {
        let _ = writeln!(out, "### Source {} ({})", verdict.source_id, verdict.status);
        if let Some(logged) = &verdict.severity_override {
            let _ = writeln!(
                out,
                "- Severity overridden {} -> {}: {}",
                logged.from, logged.to, logged.justification
            );
        }
        for incident in &verdict.incidents {
            let _ = writeln!(
                out,
                "- **{}** ({}): {}",
                incident.detector.label(),
                incident.severity,
                incident.evidence.summary
            );
        }
        let _ = writeln!(out);
    }

    let unresolved: Vec<&SourceVerdict> = verdicts.iter().filter(|v| !v.is_resolved()).collect();
    if !unresolved.is_empty() {
        let _ = writeln!(out, "## Unresolved Sources\n");
        for verdict in unresolved {
            let _ = writeln!(
                out,
                "- **{}** {}: {}",
                verdict.source_id,
                verdict.status,
                verdict.inconclusive_reason.as_deref().unwrap_or("no reason recorded")
            );
        }
        let _ = writeln!(out);
    }

    let noted: Vec<&SourceVerdict> = verdicts.iter().filter(|v| !v.notes.is_empty()).collect();
    if !noted.is_empty() {
        let _ = writeln!(out, "## Informational Notes\n");
        for verdict in noted {
            for note in &verdict.notes {
                let _ = writeln!(out, "- **{}**: {}", verdict.source_id, note.summary);
            }
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Recommendations\n");
    let mut seen = Vec::new();
    for verdict in &flagged {
        for incident in &verdict.incidents {
            let line = format!("- **{}**: {}", verdict.source_id, incident.recommendation);
            if !seen.contains(&line) {
                seen.push(line);
            }
        }
    }
    if seen.is_empty() {
        let _ = writeln!(out, "- No action required.");
    }
    for line in seen {
        let _ = writeln!(out, "{}", line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DetectorId, Incident};
    use serde_json::json;

    fn verdict(source: &str, status: SourceStatus, severity: Option<Severity>) -> SourceVerdict {
        SourceVerdict {
            source_id: source.into(),
            status,
            severity,
            incidents: vec![],
            notes: vec![],
            processed_files: 1,
            total_rows: 10,
            narrative: None,
            severity_override: None,
            inconclusive_reason: None,
        }
    }

    #[test]
    fn test_global_status_worst_case() {
        let flags = RunFlags::default();
        let verdicts = vec![
            verdict("A", SourceStatus::AllGood, Some(Severity::AllGood)),
            verdict("B", SourceStatus::NeedsAttention, Some(Severity::NeedsAttention)),
        ];
        assert_eq!(global_status(&verdicts, &flags), RunStatus::NeedsAttention);
        assert_eq!(global_status(&[], &flags), RunStatus::AllGood);
    }

    #[test]
    fn test_inconclusive_unless_urgent() {
        let flags = RunFlags::default();
        let mut verdicts = vec![
            verdict("A", SourceStatus::NeedsAttention, Some(Severity::NeedsAttention)),
            verdict("B", SourceStatus::Inconclusive, None),
        ];
        assert_eq!(global_status(&verdicts, &flags), RunStatus::Inconclusive);

        verdicts.push(verdict("C", SourceStatus::Urgent, Some(Severity::Urgent)));
        assert_eq!(global_status(&verdicts, &flags), RunStatus::Urgent);
    }

    #[test]
    fn test_provisional_urgent_counts() {
        let verdicts = vec![verdict("A", SourceStatus::Inconclusive, Some(Severity::Urgent))];
        assert_eq!(global_status(&verdicts, &RunFlags::default()), RunStatus::Urgent);
    }

    #[test]
    fn test_partial_flag_forces_inconclusive() {
        let flags = RunFlags { partial: true, ..Default::default() };
        let verdicts = vec![verdict("A", SourceStatus::AllGood, Some(Severity::AllGood))];
        assert_eq!(global_status(&verdicts, &flags), RunStatus::Inconclusive);
    }

    #[test]
    fn test_build_sorts_sources_and_keeps_incidents() {
        let ctx = RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap());
        let mut urgent = verdict("Uber", SourceStatus::Urgent, Some(Severity::Urgent));
        urgent.incidents = vec![
            Incident::new(DetectorId::UnexpectedEmptyFile, "Uber", Severity::Urgent, "empty".into(), json!({}), "resend"),
            Incident::new(DetectorId::DuplicatedFailedFile, "Uber", Severity::NeedsAttention, "dupes".into(), json!({}), "resend"),
        ];
        let verdicts = vec![urgent, verdict("BankX", SourceStatus::AllGood, Some(Severity::AllGood))];

        let report = build(
            &ctx,
            verdicts,
            ReasoningTrace::new(),
            RunMeta {
                narrative: Some("Holiday week.".into()),
                ..Default::default()
            },
        );

        assert_eq!(report.sources[0].source_id, "BankX");
        assert_eq!(report.sources[1].incidents[0].evidence.summary, "empty");
        assert_eq!(report.sources[1].incidents[1].evidence.summary, "dupes");
        assert_eq!(report.status, RunStatus::Urgent);
        assert_eq!(report.incident_count(), 2);
        assert!(report.executive_summary.starts_with("## Executive Summary"));
        assert!(report.executive_summary.contains("### Source Uber (URGENT)"));
        assert!(report.executive_summary.contains("## Analyst Notes\n\nHoliday week."));
        // identical recommendations are listed once
        assert_eq!(report.executive_summary.matches("**Uber**: resend").count(), 1);
        assert!(report.trace.is_none());
    }

    #[test]
    fn test_summary_is_deterministic() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        let verdicts = vec![verdict("A", SourceStatus::Inconclusive, None)];
        let flags = RunFlags { timed_out: true, partial: true, ..Default::default() };
        let first = executive_summary(date, RunStatus::Inconclusive, &verdicts, &flags);
        let second = executive_summary(date, RunStatus::Inconclusive, &verdicts, &flags);
        assert_eq!(first, second);
        assert!(first.contains("deadline passed"));
        assert!(first.contains("## Unresolved Sources"));
    }

    #[test]
    fn test_notes_listed_without_changing_status() {
        use crate::model::{NoteKind, VerdictNote};

        let date = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        let mut noted = verdict("Rappi", SourceStatus::AllGood, Some(Severity::AllGood));
        noted.notes.push(VerdictNote {
            kind: NoteKind::PreviousPeriodFile,
            file_name: "rappi_20250901.csv".into(),
            summary: "File 'rappi_20250901.csv' is from a previous period (2025-09-01).".into(),
            data: json!({ "file_date": "2025-09-01" }),
        });
        let verdicts = vec![noted];
        let flags = RunFlags::default();

        assert_eq!(global_status(&verdicts, &flags), RunStatus::AllGood);
        let text = executive_summary(date, RunStatus::AllGood, &verdicts, &flags);
        assert!(text.contains("## Informational Notes"));
        assert!(text.contains("rappi_20250901.csv"));
        assert!(text.contains("No incidents detected."));
    }
}
