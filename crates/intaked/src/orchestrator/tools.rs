//! Tool execution for the ReAct controller.
//!
//! Every tool runs synchronously against the shared source evaluator and
//! returns a structured observation. Tools that produce detector evidence
//! also hand back the consolidated verdicts so the controller can track what
//! is known per source. Holidays are applied inside every evaluation, so
//! `check_holiday` only reports what the calendar says.

use intake_common::trace::{Observation, SourceDigest};
use intake_common::{
    IntakeError, Result, RunContext, SourceEvaluator, SourceProfile, SourceVerdict, ToolAction,
};
use tracing::debug;

/// What a tool execution produced
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub observation: Observation,
    /// Fresh consolidated verdicts, one per evaluated source
    pub evidence: Vec<SourceVerdict>,
}

impl ToolOutcome {
    fn observed(observation: Observation) -> Self {
        Self {
            observation,
            evidence: Vec::new(),
        }
    }

    fn error(message: String) -> Self {
        Self::observed(Observation::ToolError { message })
    }
}

/// Read-only view over everything a run's tools may touch
pub struct ToolBox<'a> {
    evaluator: SourceEvaluator<'a>,
    /// Configured sources in scope for this run, sorted
    scope: &'a [String],
}

impl<'a> ToolBox<'a> {
    pub fn new(evaluator: SourceEvaluator<'a>, scope: &'a [String]) -> Self {
        Self { evaluator, scope }
    }

    pub fn scope(&self) -> &[String] {
        self.scope
    }

    pub fn file_totals(&self, source_id: &str) -> (usize, u64) {
        self.evaluator.file_totals(source_id)
    }

    /// Execute one action. Severity overrides belong to the controller and are refused here.
    pub fn run(&self, ctx: &mut RunContext, action: &ToolAction) -> ToolOutcome {
        debug!("tool {} for run {}", action, ctx.run_id);
        match action {
            ToolAction::ScanDayIncidents => self.scan_day(ctx),
            ToolAction::CheckAnomalies { source_id } => match self.evaluate_source(ctx, source_id) {
                Ok(verdict) => ToolOutcome {
                    observation: Observation::anomalies(&verdict),
                    evidence: vec![verdict],
                },
                Err(e) => ToolOutcome::error(e.to_string()),
            },
            ToolAction::GetCvRules { source_id } => match self.profile_in_scope(source_id) {
                Ok(profile) => ToolOutcome::observed(Observation::CvRules {
                    profile: profile.clone(),
                }),
                Err(e) => ToolOutcome::error(e.to_string()),
            },
            ToolAction::CheckHoliday { source_id } => self.check_holiday(ctx, source_id),
            ToolAction::OverrideSeverity { .. } => {
                ToolOutcome::error("override_severity is applied by the controller".to_string())
            }
        }
    }

    /// Evaluate one in-scope source
    pub fn evaluate_source(&self, ctx: &mut RunContext, source_id: &str) -> Result<SourceVerdict> {
        self.profile_in_scope(source_id)?;
        self.evaluator.evaluate(ctx, source_id)
    }

    fn scan_day(&self, ctx: &mut RunContext) -> ToolOutcome {
        let mut evidence = Vec::with_capacity(self.scope.len());
        let mut sources = Vec::with_capacity(self.scope.len());
        for source_id in self.scope {
            match self.evaluate_source(ctx, source_id) {
                Ok(verdict) => {
                    sources.push(SourceDigest {
                        source_id: source_id.clone(),
                        status: verdict.status,
                        incidents: verdict.incidents.len(),
                        files: verdict.processed_files,
                    });
                    evidence.push(verdict);
                }
                Err(e) => debug!("scan skipped {}: {}", source_id, e),
            }
        }
        ToolOutcome {
            observation: Observation::DayScan { sources },
            evidence,
        }
    }

    fn check_holiday(&self, ctx: &mut RunContext, source_id: &str) -> ToolOutcome {
        if let Err(e) = self.profile_in_scope(source_id) {
            return ToolOutcome::error(e.to_string());
        }
        let is_holiday = self.evaluator.check_holiday(ctx, source_id);
        ToolOutcome::observed(Observation::holiday(source_id, ctx.date, is_holiday))
    }

    fn profile_in_scope(&self, source_id: &str) -> Result<&'a SourceProfile> {
        if !self.scope.iter().any(|s| s == source_id) {
            return Err(IntakeError::InvalidRequest(format!(
                "source '{}' is not in scope for this run",
                source_id
            )));
        }
        self.evaluator.repository().get_profile(source_id)
    }
}
