//! Reasoning oracle abstraction.
//!
//! The oracle proposes the next step of a ReAct session: one tool call or a
//! final answer. It is stateless per call and receives the full trace.
//! Free text never steers control flow: replies are parsed into `Proposal`
//! and anything outside that schema is rejected.
//!
//! Production code uses `ChatOracle` (see `chat_client`). Tests use
//! `ScriptedOracle` with per-focus scripted replies, delays and failures.

use async_trait::async_trait;
use chrono::NaiveDate;
use intake_common::trace::{Observation, TraceStep};
use intake_common::{Severity, ToolAction};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// Requests and replies
// ============================================================================

/// Tool description handed to the oracle
#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: &'static str,
    pub arguments: &'static str,
    pub description: &'static str,
}

/// Everything the oracle sees for one proposal
#[derive(Debug, Clone, Serialize)]
pub struct OracleRequest {
    pub goal: String,
    /// Source the session is focused on; `None` for the run narrative
    pub focus: Option<String>,
    pub date: NaiveDate,
    pub sources_in_scope: Vec<String>,
    pub tools: Vec<ToolSpec>,
    pub trace: Vec<TraceStep>,
    /// Why the previous proposal was rejected, if it was
    pub feedback: Option<String>,
}

/// Structured next step
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    Act { thought: String, action: ToolAction },
    Final { thought: String, answer: String },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn add(&mut self, other: TokenUsage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
    }

    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OracleReply {
    pub proposal: Proposal,
    pub usage: TokenUsage,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OracleError {
    #[error("oracle call timed out")]
    Timeout,

    #[error("oracle connection failed: {0}")]
    Connection(String),

    #[error("oracle returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Reply did not match the proposal schema. The tokens it cost are still billed.
    #[error("oracle reply violates schema: {reason}")]
    Schema { reason: String, usage: TokenUsage },

    #[error("oracle unavailable: {0}")]
    Unavailable(String),
}

impl OracleError {
    /// Worth retrying: timeouts, connection errors, 5xx and 429
    pub fn is_transient(&self) -> bool {
        match self {
            OracleError::Timeout | OracleError::Connection(_) => true,
            OracleError::Http { status, .. } => *status >= 500 || *status == 429,
            OracleError::Schema { .. } | OracleError::Unavailable(_) => false,
        }
    }

    pub fn schema(reason: impl Into<String>, usage: TokenUsage) -> Self {
        OracleError::Schema {
            reason: reason.into(),
            usage,
        }
    }

    /// Tokens consumed by a call that still failed
    pub fn usage(&self) -> TokenUsage {
        match self {
            OracleError::Schema { usage, .. } => *usage,
            _ => TokenUsage::default(),
        }
    }
}

#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn propose(&self, request: &OracleRequest) -> Result<OracleReply, OracleError>;

    /// Model name used for consumption accounting
    fn model(&self) -> &str;
}

// ============================================================================
// Proposal parsing
// ============================================================================

/// Extract JSON from text that may have prose around it
pub fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

/// Parse an oracle reply into a proposal.
///
/// Accepted shapes:
/// `{"thought": "...", "action": {"tool": "check_anomalies", "arguments": {"source_id": "X"}}}`
/// `{"thought": "...", "final_answer": "..."}`
pub fn parse_proposal(text: &str) -> Result<Proposal, String> {
    let v: Value = serde_json::from_str(extract_json(text))
        .map_err(|e| format!("reply is not a JSON object: {}", e))?;
    if !v.is_object() {
        return Err("reply is not a JSON object".to_string());
    }

    let thought = v
        .get("thought")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string();

    if let Some(answer) = v.get("final_answer").filter(|a| !a.is_null()) {
        let answer = answer
            .as_str()
            .ok_or("final_answer must be a string")?
            .trim()
            .to_string();
        if answer.is_empty() {
            return Err("final_answer is empty".to_string());
        }
        return Ok(Proposal::Final { thought, answer });
    }

    let action = v
        .get("action")
        .filter(|a| !a.is_null())
        .ok_or("reply has neither an action nor a final_answer")?;
    let tool = action
        .get("tool")
        .and_then(Value::as_str)
        .ok_or("action.tool must be a string")?;
    let args = action.get("arguments").cloned().unwrap_or(Value::Null);
    let arg = |name: &str| -> Result<String, String> {
        args.get(name)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or(format!("{} requires argument '{}'", tool, name))
    };

    let action = match tool {
        "scan_day_incidents" => ToolAction::ScanDayIncidents,
        "check_anomalies" => ToolAction::CheckAnomalies { source_id: arg("source_id")? },
        "get_cv_rules" => ToolAction::GetCvRules { source_id: arg("source_id")? },
        "check_holiday" => ToolAction::CheckHoliday { source_id: arg("source_id")? },
        "override_severity" => {
            let raw = arg("severity")?;
            let severity = Severity::parse(&raw)
                .ok_or(format!("unknown severity '{}'", raw))?;
            ToolAction::OverrideSeverity {
                source_id: arg("source_id")?,
                severity,
                justification: arg("justification")?,
            }
        }
        other => return Err(format!("unknown tool '{}'", other)),
    };
    Ok(Proposal::Act { thought, action })
}

// ============================================================================
// Scripted oracle (testing and offline demos)
// ============================================================================

/// What a scripted call produces
#[derive(Debug, Clone)]
pub enum ScriptedOutcome {
    Propose(Proposal),
    /// Raw text run through `parse_proposal`
    Raw(String),
    Fail(OracleError),
}

#[derive(Debug, Clone)]
pub struct ScriptedStep {
    pub delay: Option<Duration>,
    pub outcome: ScriptedOutcome,
}

impl ScriptedStep {
    pub fn act(action: ToolAction) -> Self {
        Self {
            delay: None,
            outcome: ScriptedOutcome::Propose(Proposal::Act {
                thought: format!("calling {}", action.name()),
                action,
            }),
        }
    }

    pub fn finish(answer: &str) -> Self {
        Self {
            delay: None,
            outcome: ScriptedOutcome::Propose(Proposal::Final {
                thought: "evidence is sufficient".to_string(),
                answer: answer.to_string(),
            }),
        }
    }

    pub fn raw(text: &str) -> Self {
        Self {
            delay: None,
            outcome: ScriptedOutcome::Raw(text.to_string()),
        }
    }

    pub fn fail(error: OracleError) -> Self {
        Self {
            delay: None,
            outcome: ScriptedOutcome::Fail(error),
        }
    }

    pub fn after(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Scripted oracle keyed by session focus.
///
/// Each focus (`Some(source)` or `None` for the narrative) has its own queue.
/// A focus with no remaining script follows a default policy: check the
/// focused source's anomalies once, then give a final answer.
pub struct ScriptedOracle {
    scripts: Mutex<HashMap<Option<String>, VecDeque<ScriptedStep>>>,
    /// Delay applied to every call for a focus, on top of scripted delays
    stalls: HashMap<Option<String>, Duration>,
    usage_per_call: TokenUsage,
    model: String,
    calls: Arc<Mutex<HashMap<Option<String>, usize>>>,
}

impl ScriptedOracle {
    pub fn builder() -> ScriptedOracleBuilder {
        ScriptedOracleBuilder::new()
    }

    /// Calls made for a focus so far
    pub fn call_count(&self, focus: Option<&str>) -> usize {
        self.calls
            .lock()
            .ok()
            .and_then(|calls| calls.get(&focus.map(str::to_string)).copied())
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls
            .lock()
            .map(|calls| calls.values().sum())
            .unwrap_or(0)
    }

    fn next_scripted(&self, focus: &Option<String>) -> Option<ScriptedStep> {
        self.scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.get_mut(focus).and_then(VecDeque::pop_front))
    }

    fn default_step(request: &OracleRequest) -> ScriptedStep {
        let Some(source) = request.focus.clone() else {
            return ScriptedStep::finish("All sources were reviewed; see the per-source findings above.");
        };
        let checked = request.trace.iter().any(|step| {
            matches!(&step.observation, Observation::Anomalies { source_id, .. } if *source_id == source)
        });
        if checked {
            ScriptedStep::finish(&format!("Findings for {} are confirmed by the detectors.", source))
        } else {
            ScriptedStep::act(ToolAction::CheckAnomalies { source_id: source })
        }
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn propose(&self, request: &OracleRequest) -> Result<OracleReply, OracleError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls.entry(request.focus.clone()).or_insert(0) += 1;
        }

        let step = self
            .next_scripted(&request.focus)
            .unwrap_or_else(|| Self::default_step(request));

        let stall = self.stalls.get(&request.focus).copied();
        if let Some(delay) = stall.into_iter().chain(step.delay).reduce(|a, b| a + b) {
            tokio::time::sleep(delay).await;
        }

        let proposal = match step.outcome {
            ScriptedOutcome::Propose(proposal) => proposal,
            ScriptedOutcome::Raw(text) => parse_proposal(&text)
                .map_err(|reason| OracleError::schema(reason, self.usage_per_call))?,
            ScriptedOutcome::Fail(error) => return Err(error),
        };
        Ok(OracleReply {
            proposal,
            usage: self.usage_per_call,
        })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Builder for `ScriptedOracle`
///
/// ```rust,ignore
/// let oracle = ScriptedOracle::builder()
///     .on("BankX", ScriptedStep::act(ToolAction::CheckHoliday { source_id: "BankX".into() }))
///     .stall("Uber", Duration::from_secs(5))
///     .build();
/// ```
pub struct ScriptedOracleBuilder {
    scripts: HashMap<Option<String>, VecDeque<ScriptedStep>>,
    stalls: HashMap<Option<String>, Duration>,
    usage_per_call: TokenUsage,
    model: String,
}

impl ScriptedOracleBuilder {
    pub fn new() -> Self {
        Self {
            scripts: HashMap::new(),
            stalls: HashMap::new(),
            usage_per_call: TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 20,
            },
            model: "scripted".to_string(),
        }
    }

    /// Queue a step for a source session
    pub fn on(mut self, source_id: &str, step: ScriptedStep) -> Self {
        self.scripts
            .entry(Some(source_id.to_string()))
            .or_default()
            .push_back(step);
        self
    }

    /// Queue a step for the run narrative session
    pub fn on_narrative(mut self, step: ScriptedStep) -> Self {
        self.scripts.entry(None).or_default().push_back(step);
        self
    }

    /// Delay every call made while focused on a source
    pub fn stall(mut self, source_id: &str, delay: Duration) -> Self {
        self.stalls.insert(Some(source_id.to_string()), delay);
        self
    }

    pub fn usage_per_call(mut self, prompt_tokens: u64, completion_tokens: u64) -> Self {
        self.usage_per_call = TokenUsage {
            prompt_tokens,
            completion_tokens,
        };
        self
    }

    pub fn model(mut self, model: &str) -> Self {
        self.model = model.to_string();
        self
    }

    pub fn build(self) -> ScriptedOracle {
        ScriptedOracle {
            scripts: Mutex::new(self.scripts),
            stalls: self.stalls,
            usage_per_call: self.usage_per_call,
            model: self.model,
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for ScriptedOracleBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tool_call() {
        let proposal = parse_proposal(
            r#"Sure! {"thought": "check it", "action": {"tool": "check_anomalies", "arguments": {"source_id": "BankX"}}}"#,
        )
        .unwrap();
        assert_eq!(
            proposal,
            Proposal::Act {
                thought: "check it".into(),
                action: ToolAction::CheckAnomalies { source_id: "BankX".into() },
            }
        );
    }

    #[test]
    fn test_parse_final_answer() {
        let proposal = parse_proposal(r#"{"thought": "", "final_answer": "BankX is late"}"#).unwrap();
        assert!(matches!(proposal, Proposal::Final { answer, .. } if answer == "BankX is late"));
    }

    #[test]
    fn test_parse_override() {
        let proposal = parse_proposal(
            r#"{"action": {"tool": "override_severity", "arguments": {"source_id": "BankX", "severity": "needs attention", "justification": "holiday"}}}"#,
        )
        .unwrap();
        match proposal {
            Proposal::Act { action: ToolAction::OverrideSeverity { severity, .. }, .. } => {
                assert_eq!(severity, Severity::NeedsAttention)
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_schema_violations() {
        assert!(parse_proposal("I think BankX is fine").is_err());
        assert!(parse_proposal(r#"{"thought": "hmm"}"#).is_err());
        assert!(parse_proposal(r#"{"action": {"tool": "rm_rf"}}"#).is_err());
        assert!(parse_proposal(r#"{"action": {"tool": "check_anomalies", "arguments": {}}}"#).is_err());
        assert!(parse_proposal(r#"{"final_answer": "  "}"#).is_err());
        assert!(parse_proposal(
            r#"{"action": {"tool": "override_severity", "arguments": {"source_id": "A", "severity": "LOW", "justification": "x"}}}"#
        )
        .is_err());
    }

    #[test]
    fn test_transient_classification() {
        assert!(OracleError::Timeout.is_transient());
        assert!(OracleError::Http { status: 503, body: String::new() }.is_transient());
        assert!(OracleError::Http { status: 429, body: String::new() }.is_transient());
        assert!(!OracleError::Http { status: 401, body: String::new() }.is_transient());
        assert!(!OracleError::schema("x", TokenUsage::default()).is_transient());
    }

    #[tokio::test]
    async fn test_scripted_default_policy() {
        let oracle = ScriptedOracle::builder().build();
        let request = OracleRequest {
            goal: "assess".into(),
            focus: Some("Rappi".into()),
            date: NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            sources_in_scope: vec!["Rappi".into()],
            tools: vec![],
            trace: vec![],
            feedback: None,
        };
        let reply = oracle.propose(&request).await.unwrap();
        assert!(matches!(
            reply.proposal,
            Proposal::Act { action: ToolAction::CheckAnomalies { .. }, .. }
        ));
        assert_eq!(oracle.call_count(Some("Rappi")), 1);
        assert_eq!(reply.usage.total(), 120);
    }

    #[tokio::test]
    async fn test_schema_error_keeps_usage() {
        let oracle = ScriptedOracle::builder()
            .on("Rappi", ScriptedStep::raw("not json at all"))
            .build();
        let request = OracleRequest {
            goal: "assess".into(),
            focus: Some("Rappi".into()),
            date: NaiveDate::from_ymd_opt(2025, 9, 15).unwrap(),
            sources_in_scope: vec!["Rappi".into()],
            tools: vec![],
            trace: vec![],
            feedback: None,
        };
        let err = oracle.propose(&request).await.unwrap_err();
        assert!(matches!(err, OracleError::Schema { .. }));
        assert_eq!(err.usage().total(), 120);
        assert_eq!(OracleError::Timeout.usage().total(), 0);
    }
}
