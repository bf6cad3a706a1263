//! Prompt building for the reasoning oracle.
//!
//! The system prompt pins the reply schema; the user prompt carries the goal,
//! the tool list and the trace so far. Long observations are clipped so the
//! prompt stays within `MAX_PROMPT_CHARS`.

use super::oracle::{OracleRequest, ToolSpec};
use std::fmt::Write;

/// Upper bound for the rendered user prompt
pub const MAX_PROMPT_CHARS: usize = 24_000;

/// Per-observation clip inside the trace section
const MAX_OBSERVATION_CHARS: usize = 1_500;

pub const SYSTEM_PROMPT: &str = r#"You are the ingestion health analyst. You decide which check to run next
and when the evidence is sufficient. Detector results are authoritative for
severity; you may only add context (for example a confirmed holiday).

Reply with ONE JSON object and nothing else, in one of two shapes:

  {"thought": "<short reasoning>", "action": {"tool": "<tool name>", "arguments": {...}}}
  {"thought": "<short reasoning>", "final_answer": "<explanation for the report>"}

Rules:
1. Call at most one tool per reply.
2. Only use the tools listed in the request, with the listed arguments.
3. Give a final answer for a source only after its anomalies were checked.
4. Lowering a severity requires override_severity with a concrete justification.
5. Severities are ALL_GOOD, NEEDS_ATTENTION or URGENT."#;

/// Tool catalogue shown to the oracle
pub fn tool_specs() -> Vec<ToolSpec> {
    vec![
        ToolSpec {
            name: "scan_day_incidents",
            arguments: "{}",
            description: "Run every detector over every source in scope; returns one status line per source",
        },
        ToolSpec {
            name: "check_anomalies",
            arguments: r#"{"source_id": "<id>"}"#,
            description: "Run every detector over one source; returns its incidents and consolidated severity",
        },
        ToolSpec {
            name: "get_cv_rules",
            arguments: r#"{"source_id": "<id>"}"#,
            description: "Return the expectation profile (CV) of one source",
        },
        ToolSpec {
            name: "check_holiday",
            arguments: r#"{"source_id": "<id>"}"#,
            description: "Check whether the run date is a holiday for one source. Holidays are already applied to check_anomalies results",
        },
        ToolSpec {
            name: "override_severity",
            arguments: r#"{"source_id": "<id>", "severity": "<SEVERITY>", "justification": "<why>"}"#,
            description: "Replace a source's consolidated severity; logged in the report",
        },
    ]
}

/// Render the user prompt for one proposal
pub fn render_user_prompt(request: &OracleRequest) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "=== GOAL ===");
    let _ = writeln!(out, "{}", request.goal);
    let _ = writeln!(out, "Date: {}", request.date);
    let _ = writeln!(out, "Sources in scope: {}", request.sources_in_scope.join(", "));

    let _ = writeln!(out, "\n=== TOOLS ===");
    for tool in &request.tools {
        let _ = writeln!(out, "- {} {}: {}", tool.name, tool.arguments, tool.description);
    }

    let _ = writeln!(out, "\n=== TRACE ({} steps) ===", request.trace.len());
    if request.trace.is_empty() {
        let _ = writeln!(out, "(no steps yet)");
    }
    for step in &request.trace {
        let action = step
            .action
            .as_ref()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());
        let observation = serde_json::to_string(&step.observation).unwrap_or_default();
        let _ = writeln!(
            out,
            "[{}] {} | thought: {} | action: {} | observation: {}",
            step.index,
            step.state,
            step.thought,
            action,
            clip(&observation, MAX_OBSERVATION_CHARS)
        );
    }

    if let Some(feedback) = &request.feedback {
        let _ = writeln!(out, "\n=== PREVIOUS REPLY REJECTED ===");
        let _ = writeln!(out, "{}", feedback);
    }
    let _ = writeln!(out, "\nReply with one JSON object.");

    // Keep the head (goal, tools) and the most recent trace lines
    if out.chars().count() > MAX_PROMPT_CHARS {
        let tail: String = out
            .chars()
            .rev()
            .take(MAX_PROMPT_CHARS / 2)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        let head = clip(&out, MAX_PROMPT_CHARS / 2);
        out = format!("{}\n[... earlier steps omitted ...]\n{}", head, tail);
    }
    out
}

fn clip(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(max).collect();
    clipped.push_str("...");
    clipped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use intake_common::trace::{ControllerState, Observation, TraceStep};

    fn request(trace: Vec<TraceStep>) -> OracleRequest {
        OracleRequest {
            goal: "Assess BankX".into(),
            focus: Some("BankX".into()),
            date: NaiveDate::from_ymd_opt(2025, 9, 9).unwrap(),
            sources_in_scope: vec!["BankX".into()],
            tools: tool_specs(),
            trace,
            feedback: Some("unknown tool 'rm'".into()),
        }
    }

    #[test]
    fn test_prompt_lists_tools_and_feedback() {
        let prompt = render_user_prompt(&request(vec![]));
        for name in intake_common::ToolAction::NAMES {
            assert!(prompt.contains(name), "missing {}", name);
        }
        assert!(prompt.contains("PREVIOUS REPLY REJECTED"));
        assert!(prompt.contains("2025-09-09"));
    }

    #[test]
    fn test_prompt_is_capped() {
        let steps = (0..200)
            .map(|index| TraceStep {
                index,
                focus: Some("BankX".into()),
                state: ControllerState::Observing,
                thought: "x".repeat(200),
                action: None,
                observation: Observation::Note { message: "y".repeat(2_000) },
            })
            .collect();
        let prompt = render_user_prompt(&request(steps));
        assert!(prompt.chars().count() <= MAX_PROMPT_CHARS + 64);
        assert!(prompt.contains("earlier steps omitted"));
    }
}
