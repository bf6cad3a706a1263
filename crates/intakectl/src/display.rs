//! Display helpers for intakectl output.

use crate::client::Health;
use intake_common::model::RunStatus;
use intake_common::trace::{Observation, ReasoningTrace};
use intake_common::{Report, SourceProfile, SourceStatus};
use owo_colors::OwoColorize;
use std::fmt::Write;

const HR: &str = "────────────────────────────────────────────────────────────";

fn run_status(status: RunStatus) -> String {
    let label = status.to_string();
    match status {
        RunStatus::Urgent => label.red().bold().to_string(),
        RunStatus::NeedsAttention => label.yellow().bold().to_string(),
        RunStatus::AllGood => label.green().bold().to_string(),
        RunStatus::Inconclusive => label.magenta().bold().to_string(),
    }
}

fn source_status(status: SourceStatus) -> String {
    let label = status.to_string();
    match status {
        SourceStatus::Urgent => label.red().to_string(),
        SourceStatus::NeedsAttention => label.yellow().to_string(),
        SourceStatus::AllGood => label.green().to_string(),
        SourceStatus::Inconclusive => label.magenta().to_string(),
        SourceStatus::Unconfigured => label.dimmed().to_string(),
    }
}

/// Human-readable report: status table, incidents, summary, optional trace
pub fn render_report(report: &Report, show_trace: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} {}  {}  ({} mode)",
        "Ingestion health".bold(),
        report.date,
        run_status(report.status),
        report.mode
    );
    let _ = writeln!(out, "{}", HR.dimmed());

    for verdict in &report.sources {
        let _ = writeln!(
            out,
            "  {:<20} {:<28} {:>4} file(s) {:>10} row(s)",
            verdict.source_id,
            source_status(verdict.status),
            verdict.processed_files,
            verdict.total_rows
        );
        for incident in &verdict.incidents {
            let _ = writeln!(
                out,
                "      {} {}: {}",
                "-".dimmed(),
                incident.detector.label(),
                incident.evidence.summary
            );
        }
        for note in &verdict.notes {
            let _ = writeln!(out, "      {} {}", "i".cyan(), note.summary);
        }
        if let Some(logged) = &verdict.severity_override {
            let _ = writeln!(
                out,
                "      {} override {} -> {}: {}",
                "!".yellow(),
                logged.from,
                logged.to,
                logged.justification
            );
        }
        if let Some(reason) = &verdict.inconclusive_reason {
            let _ = writeln!(out, "      {} {}", "?".magenta(), reason);
        }
    }

    let _ = writeln!(out, "{}", HR.dimmed());
    let _ = writeln!(out, "{}", report.executive_summary.trim_end());
    let _ = writeln!(out, "{}", HR.dimmed());

    let stats = &report.stats;
    let _ = write!(
        out,
        "{} iterations, {} tool calls, {} oracle calls ({} retries)",
        stats.iterations, stats.tool_calls, stats.oracle_calls, stats.oracle_retries
    );
    if let Some(usage) = &stats.usage {
        let _ = write!(
            out,
            ", {} tokens on {} (${:.4})",
            usage.total_tokens, usage.model, usage.cost_usd
        );
    }
    let _ = writeln!(out);
    if report.flags.partial {
        let _ = writeln!(out, "{}", "Partial report: some sources are unresolved.".magenta());
    }

    if show_trace {
        if let Some(trace) = &report.trace {
            out.push_str(&render_trace(trace));
        }
    }
    out
}

pub fn render_trace(trace: &ReasoningTrace) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} ({} steps)", "Reasoning trace".bold(), trace.len());
    for step in trace.steps() {
        let focus = step.focus.as_deref().unwrap_or("run");
        let action = step
            .action
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_default();
        let detail = match &step.observation {
            Observation::Anomalies { severity, incidents, .. } => {
                format!("{} ({} incidents)", severity, incidents.len())
            }
            Observation::Holiday { is_holiday, .. } => format!("holiday: {}", is_holiday),
            Observation::OverrideApplied { from, to, .. } => format!("{} -> {}", from, to),
            Observation::ToolError { message } => message.red().to_string(),
            Observation::Rejected { reason } => reason.yellow().to_string(),
            Observation::OracleFailure { error, attempts } => {
                format!("{} after {} attempt(s)", error, attempts).red().to_string()
            }
            Observation::FinalAnswer { narrative } => narrative.clone(),
            Observation::Note { message } => message.clone(),
            other => other.kind().to_string(),
        };
        let _ = writeln!(
            out,
            "  [{:>2}] {:<10} {:<10} {} {}",
            step.index,
            focus,
            step.state.to_string().dimmed(),
            action.cyan(),
            detail
        );
    }
    out
}

pub fn render_profile(profile: &SourceProfile) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "\n{} {}",
        profile.source_id.bold(),
        profile.display_name.as_deref().unwrap_or("").dimmed()
    );
    let _ = writeln!(out, "{}", HR.dimmed());
    let _ = writeln!(out, "  volume threshold   {}%", profile.volume_threshold_pct());
    let _ = writeln!(out, "  late tolerance     {} min", profile.late_tolerance_minutes());
    let _ = writeln!(out, "  empty files        {}", if profile.allow_empty { "allowed" } else { "not allowed" });

    if !profile.upload_windows.is_empty() {
        let _ = writeln!(out, "\n  {}", "Upload windows (UTC)".bold());
        for (day, window) in &profile.upload_windows {
            let _ = writeln!(
                out,
                "    {:<4} {} - {}",
                day,
                window.start.format("%H:%M"),
                window.end.format("%H:%M")
            );
        }
    }
    if !profile.volume_baseline.is_empty() {
        let _ = writeln!(out, "\n  {}", "Volume baseline (rows)".bold());
        for (day, rows) in &profile.volume_baseline {
            let _ = writeln!(out, "    {:<4} {}", day, rows);
        }
    }
    if !profile.entities.is_empty() {
        let _ = writeln!(out, "\n  {}", "Entities".bold());
        for entity in &profile.entities {
            let days = match &entity.required_on {
                None => "every day".to_string(),
                Some(days) => days.iter().map(|d| d.as_str()).collect::<Vec<_>>().join(","),
            };
            let _ = writeln!(out, "    {:<24} required {}", entity.entity_id, days);
        }
    }
    out
}

pub fn render_health(health: &Health, url: &str) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{} v{}", "intaked".bold(), health.version);
    let _ = writeln!(out, "{}", HR.dimmed());
    let _ = writeln!(out, "  {:<12} {}", "url", url);
    let _ = writeln!(out, "  {:<12} {}", "status", health.status.green());
    let _ = writeln!(out, "  {:<12} {}s", "uptime", health.uptime_secs);
    let _ = writeln!(out, "  {:<12} {}", "sources", health.sources);
    let _ = writeln!(
        out,
        "  {:<12} {}",
        "oracle",
        if health.oracle { "enabled (agentic)" } else { "disabled (pipeline only)" }
    );
    out
}
