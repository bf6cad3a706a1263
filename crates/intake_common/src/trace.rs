//! Reasoning trace for auditable analysis runs.
//!
//! Every oracle proposal, tool execution, rejection and failure becomes one
//! step. Observations are typed payloads, never free text that could steer
//! control flow. The trace is append-only: there is no API to edit or
//! remove a step once recorded.

use crate::cv::SourceProfile;
use crate::error::{IntakeError, Result};
use crate::model::{Incident, Severity, SourceStatus, SourceVerdict};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ============================================================================
// Controller state machine
// ============================================================================

/// State of the ReAct controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Thinking,
    Acting,
    Observing,
    Concluding,
}

impl ControllerState {
    /// Move to `next`, or fail when the transition is not part of the loop
    pub fn transition(self, next: ControllerState) -> Result<ControllerState> {
        use ControllerState::*;
        match (self, next) {
            (Thinking, Acting)
            | (Acting, Observing)
            | (Observing, Thinking)
            | (Thinking, Concluding) => Ok(next),
            (from, to) => Err(IntakeError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            }),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ControllerState::Concluding)
    }
}

impl std::fmt::Display for ControllerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Thinking => "thinking",
            Self::Acting => "acting",
            Self::Observing => "observing",
            Self::Concluding => "concluding",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Fixed vocabulary of tool actions the oracle may select
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "arguments", rename_all = "snake_case")]
pub enum ToolAction {
    /// Run every detector over every in-scope source
    ScanDayIncidents,
    /// Run every detector over one source
    CheckAnomalies { source_id: String },
    /// Return the CV of one source
    GetCvRules { source_id: String },
    /// Ask the calendar whether the run date is a holiday for one source
    CheckHoliday { source_id: String },
    /// Lower (or confirm) a source's consolidated severity, with justification
    OverrideSeverity {
        source_id: String,
        severity: Severity,
        justification: String,
    },
}

impl ToolAction {
    pub const NAMES: [&'static str; 5] = [
        "scan_day_incidents",
        "check_anomalies",
        "get_cv_rules",
        "check_holiday",
        "override_severity",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ToolAction::ScanDayIncidents => "scan_day_incidents",
            ToolAction::CheckAnomalies { .. } => "check_anomalies",
            ToolAction::GetCvRules { .. } => "get_cv_rules",
            ToolAction::CheckHoliday { .. } => "check_holiday",
            ToolAction::OverrideSeverity { .. } => "override_severity",
        }
    }

    /// Source the action targets, if any
    pub fn source_id(&self) -> Option<&str> {
        match self {
            ToolAction::ScanDayIncidents => None,
            ToolAction::CheckAnomalies { source_id }
            | ToolAction::GetCvRules { source_id }
            | ToolAction::CheckHoliday { source_id }
            | ToolAction::OverrideSeverity { source_id, .. } => Some(source_id),
        }
    }
}

impl std::fmt::Display for ToolAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.source_id() {
            Some(source) => write!(f, "{}({})", self.name(), source),
            None => write!(f, "{}()", self.name()),
        }
    }
}

// ============================================================================
// Observations
// ============================================================================

/// Compact per-source line of a day scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDigest {
    pub source_id: String,
    pub status: SourceStatus,
    pub incidents: usize,
    pub files: usize,
}

/// Structured result attached to a trace step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Observation {
    DayScan {
        sources: Vec<SourceDigest>,
    },
    Anomalies {
        source_id: String,
        severity: Severity,
        incidents: Vec<Incident>,
        processed_files: usize,
        total_rows: u64,
    },
    CvRules {
        profile: SourceProfile,
    },
    Holiday {
        source_id: String,
        date: NaiveDate,
        is_holiday: bool,
        /// An approved exception was recorded in the run context
        exception_recorded: bool,
    },
    OverrideApplied {
        source_id: String,
        from: Severity,
        to: Severity,
    },
    /// The tool could not run (unknown source, no CV, refused override)
    ToolError {
        message: String,
    },
    /// The proposal was rejected and the oracle re-prompted
    Rejected {
        reason: String,
    },
    FinalAnswer {
        narrative: String,
    },
    OracleFailure {
        error: String,
        attempts: u32,
    },
    /// Run-level bookkeeping (cap reached, deadline passed)
    Note {
        message: String,
    },
}

impl Observation {
    /// Detector evidence for one consolidated verdict
    pub fn anomalies(verdict: &SourceVerdict) -> Self {
        Observation::Anomalies {
            source_id: verdict.source_id.clone(),
            severity: verdict.severity.unwrap_or(Severity::AllGood),
            incidents: verdict.incidents.clone(),
            processed_files: verdict.processed_files,
            total_rows: verdict.total_rows,
        }
    }

    pub fn holiday(source_id: &str, date: NaiveDate, is_holiday: bool) -> Self {
        Observation::Holiday {
            source_id: source_id.to_string(),
            date,
            is_holiday,
            exception_recorded: is_holiday,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Observation::DayScan { .. } => "day_scan",
            Observation::Anomalies { .. } => "anomalies",
            Observation::CvRules { .. } => "cv_rules",
            Observation::Holiday { .. } => "holiday",
            Observation::OverrideApplied { .. } => "override_applied",
            Observation::ToolError { .. } => "tool_error",
            Observation::Rejected { .. } => "rejected",
            Observation::FinalAnswer { .. } => "final_answer",
            Observation::OracleFailure { .. } => "oracle_failure",
            Observation::Note { .. } => "note",
        }
    }
}

// ============================================================================
// Trace
// ============================================================================

/// One (thought, action, observation) step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    /// Source the session was focused on; `None` for run-level steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<String>,
    pub state: ControllerState,
    #[serde(default)]
    pub thought: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<ToolAction>,
    pub observation: Observation,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReasoningTrace {
    steps: Vec<TraceStep>,
}

impl ReasoningTrace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step and return its index
    pub fn record(
        &mut self,
        focus: Option<&str>,
        state: ControllerState,
        thought: &str,
        action: Option<ToolAction>,
        observation: Observation,
    ) -> usize {
        let index = self.steps.len();
        self.steps.push(TraceStep {
            index,
            focus: focus.map(str::to_string),
            state,
            thought: thought.to_string(),
            action,
            observation,
        });
        index
    }

    pub fn steps(&self) -> &[TraceStep] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Steps that executed a tool
    pub fn tool_calls(&self) -> usize {
        self.steps.iter().filter(|s| s.action.is_some()).count()
    }

    pub fn for_focus<'a>(&'a self, source_id: &'a str) -> impl Iterator<Item = &'a TraceStep> {
        self.steps
            .iter()
            .filter(move |s| s.focus.as_deref() == Some(source_id))
    }

    /// Whether an override action for the source was recorded
    pub fn has_override_for(&self, source_id: &str) -> bool {
        self.steps.iter().any(|s| {
            matches!(
                (&s.action, &s.observation),
                (Some(ToolAction::OverrideSeverity { source_id: target, .. }), Observation::OverrideApplied { .. })
                    if target == source_id
            )
        })
    }
}
