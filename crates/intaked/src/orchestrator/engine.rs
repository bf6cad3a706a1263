//! Analysis engine: the ReAct controller.
//!
//! Flow for one run:
//! 1. Load the day snapshot (a store failure fails the whole run)
//! 2. Split the scope into configured and unconfigured sources
//! 3. One oracle-driven session per configured source, in sorted order
//! 4. One narrative session for the executive notes
//! 5. Synthesize the report
//!
//! Invariants:
//! - One tool call at a time; every proposal, rejection and failure is traced
//! - Detector evidence is authoritative; only a logged override lowers it
//! - An oracle failure degrades the focused source only
//! - The iteration cap and run deadline always produce a report, never a hang

use super::oracle::{
    OracleError, OracleReply, OracleRequest, Proposal, ReasoningOracle, TokenUsage,
};
use super::prompts::tool_specs;
use super::tools::ToolBox;
use chrono::NaiveDate;
use intake_common::config::{AgentConfig, OracleConfig};
use intake_common::consolidator;
use intake_common::pipeline::{self, Scope};
use intake_common::report::{self, ConsumptionStats, RunFlags, RunMeta, UsageStats};
use intake_common::trace::{ControllerState, Observation};
use intake_common::{
    AnalysisMode, CvRepository, DetectorSet, HolidayCalendar, IntakeError, MetadataStore,
    ReasoningTrace, Report, Result, RunContext, Severity, SourceEvaluator, SourceStatus,
    SourceVerdict, ToolAction,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Body of an analysis request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub date: NaiveDate,
    /// Restrict the run to these sources; all known sources when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<AnalysisMode>,
    #[serde(default)]
    pub include_trace: bool,
}

impl AnalysisRequest {
    pub fn for_date(date: NaiveDate) -> Self {
        Self {
            date,
            sources: None,
            mode: None,
            include_trace: false,
        }
    }
}

/// Runs analyses. Cheap to share: every collaborator is behind an `Arc`.
pub struct Analyzer {
    repo: Arc<CvRepository>,
    store: Arc<dyn MetadataStore>,
    calendar: Arc<dyn HolidayCalendar>,
    detectors: Arc<DetectorSet>,
    oracle: Option<Arc<dyn ReasoningOracle>>,
    oracle_config: OracleConfig,
    agent: AgentConfig,
    call_timeout: Duration,
    run_timeout: Duration,
}

impl Analyzer {
    pub fn new(
        repo: Arc<CvRepository>,
        store: Arc<dyn MetadataStore>,
        calendar: Arc<dyn HolidayCalendar>,
    ) -> Self {
        Self {
            repo,
            store,
            calendar,
            detectors: Arc::new(DetectorSet::standard()),
            oracle: None,
            call_timeout: Duration::from_secs(OracleConfig::default().timeout_secs),
            run_timeout: Duration::from_secs(AgentConfig::default().run_timeout_secs),
            oracle_config: OracleConfig::default(),
            agent: AgentConfig::default(),
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ReasoningOracle>, config: OracleConfig) -> Self {
        self.oracle = Some(oracle);
        self.call_timeout = Duration::from_secs(config.timeout_secs.max(1));
        self.oracle_config = config;
        self
    }

    pub fn with_agent(mut self, agent: AgentConfig) -> Self {
        self.run_timeout = Duration::from_secs(agent.run_timeout_secs);
        self.agent = agent;
        self
    }

    /// Finer-grained timeouts than the config's whole seconds
    pub fn with_timeouts(mut self, call_timeout: Duration, run_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self.run_timeout = run_timeout;
        self
    }

    pub fn with_detectors(mut self, detectors: DetectorSet) -> Self {
        self.detectors = Arc::new(detectors);
        self
    }

    pub fn has_oracle(&self) -> bool {
        self.oracle.is_some()
    }

    pub fn repository(&self) -> &CvRepository {
        &self.repo
    }

    /// Run one analysis for a date
    pub async fn analyze(&self, request: AnalysisRequest) -> Result<Report> {
        let started = Instant::now();
        let mut ctx = RunContext::new(request.date);

        let store = Arc::clone(&self.store);
        let date = request.date;
        let snapshot = tokio::task::spawn_blocking(move || store.load_day(date))
            .await
            .map_err(|e| IntakeError::MetadataUnavailable(format!("store task failed: {}", e)))??;

        let filter = request.sources.as_deref().unwrap_or(&[]);
        let Scope {
            configured,
            unconfigured,
        } = pipeline::resolve_scope(&self.repo, &snapshot, filter)?;

        let mode = match (request.mode.unwrap_or_default(), &self.oracle) {
            (AnalysisMode::Agentic, None) => {
                if request.mode.is_some() {
                    warn!("[!]  No oracle configured, falling back to pipeline mode");
                }
                AnalysisMode::Pipeline
            }
            (mode, _) => mode,
        };

        info!(
            "[>]  Analysis {} for {} ({} configured, {} unconfigured, mode {})",
            ctx.run_id,
            ctx.date,
            configured.len(),
            unconfigured.len(),
            mode
        );

        let evaluator = SourceEvaluator::new(&self.repo, &snapshot, self.calendar.as_ref(), &self.detectors);
        let mut run = match (mode, &self.oracle) {
            (AnalysisMode::Agentic, Some(oracle)) => {
                let tools = ToolBox::new(evaluator, &configured);
                self.run_agentic(oracle.as_ref(), &mut ctx, &tools).await?
            }
            _ => {
                let scan = pipeline::run(&evaluator, &mut ctx, &configured);
                RunState {
                    verdicts: scan.verdicts,
                    trace: scan.trace,
                    ..RunState::default()
                }
            }
        };
        run.verdicts
            .extend(unconfigured.iter().map(|id| evaluator.unconfigured(id)));

        let stats = ConsumptionStats {
            iterations: run.iterations,
            tool_calls: 0,
            oracle_calls: run.oracle_calls,
            oracle_retries: run.oracle_retries,
            usage: self.usage_stats(&run),
        };
        let report = report::build(
            &ctx,
            run.verdicts,
            run.trace,
            RunMeta {
                mode,
                stats,
                flags: run.flags,
                narrative: run.narrative,
                include_trace: request.include_trace,
            },
        );

        info!(
            "[<]  Analysis {} finished: {} ({} incidents, {} iterations) in {:.2}s",
            report.run_id,
            report.status,
            report.incident_count(),
            report.stats.iterations,
            started.elapsed().as_secs_f64()
        );
        Ok(report)
    }

    fn usage_stats(&self, run: &RunState) -> Option<UsageStats> {
        let oracle = self.oracle.as_ref()?;
        if run.oracle_calls == 0 {
            return None;
        }
        Some(UsageStats {
            model: oracle.model().to_string(),
            prompt_tokens: run.usage.prompt_tokens,
            completion_tokens: run.usage.completion_tokens,
            total_tokens: run.usage.total(),
            cost_usd: self
                .oracle_config
                .cost(run.usage.prompt_tokens, run.usage.completion_tokens),
        })
    }

    // ========================================================================
    // Agentic mode
    // ========================================================================

    async fn run_agentic(
        &self,
        oracle: &dyn ReasoningOracle,
        ctx: &mut RunContext,
        tools: &ToolBox<'_>,
    ) -> Result<RunState> {
        let deadline = Instant::now() + self.run_timeout;
        let mut run = RunState::default();
        let mut evidence: BTreeMap<String, SourceVerdict> = BTreeMap::new();
        let mut outcomes: BTreeMap<String, SessionEnd> = BTreeMap::new();

        for source_id in tools.scope() {
            if run.flags.iteration_cap_reached || run.flags.timed_out {
                outcomes.insert(source_id.clone(), SessionEnd::NotStarted);
                continue;
            }
            let session = Session {
                oracle,
                tools,
                focus: Some(source_id.as_str()),
                deadline,
            };
            let end = self.run_session(&session, ctx, &mut run, &mut evidence).await?;
            debug!("session {} ended: {:?}", source_id, end);
            outcomes.insert(source_id.clone(), end);
        }

        if run.flags.iteration_cap_reached {
            run.trace.record(
                None,
                ControllerState::Thinking,
                "",
                None,
                Observation::Note {
                    message: IntakeError::IterationCapExceeded { cap: self.agent.max_iterations }.to_string(),
                },
            );
        }
        if run.flags.timed_out {
            run.trace.record(
                None,
                ControllerState::Thinking,
                "",
                None,
                Observation::Note {
                    message: format!("run deadline of {:?} passed", self.run_timeout),
                },
            );
        }

        for source_id in tools.scope() {
            let end = outcomes.remove(source_id).unwrap_or(SessionEnd::NotStarted);
            let verdict = match (end, evidence.remove(source_id)) {
                (SessionEnd::Concluded, Some(verdict)) => verdict,
                (end, gathered) => {
                    let reason = end.reason(&self.agent, self.run_timeout);
                    warn!("[!]  {} is inconclusive: {}", source_id, reason);
                    gathered
                        .unwrap_or_else(|| pending_verdict(tools, source_id))
                        .into_inconclusive(&reason)
                }
            };
            run.verdicts.push(verdict);
        }
        if run.verdicts.iter().any(|v| v.status == SourceStatus::Inconclusive) {
            run.flags.partial = true;
        }

        if !run.flags.iteration_cap_reached && !run.flags.timed_out {
            let session = Session {
                oracle,
                tools,
                focus: None,
                deadline,
            };
            run.narrative = self.narrative_session(&session, ctx.date, &mut run).await;
        }
        Ok(run)
    }

    /// ReAct loop focused on one source
    async fn run_session(
        &self,
        session: &Session<'_, '_>,
        ctx: &mut RunContext,
        run: &mut RunState,
        evidence: &mut BTreeMap<String, SourceVerdict>,
    ) -> Result<SessionEnd> {
        let Some(source_id) = session.focus else {
            return Ok(SessionEnd::StepBudget);
        };
        let goal = format!(
            "Determine the ingestion health of source {} on {}. Check its anomalies, look for mitigating context when files are missing, then give a final answer explaining the verdict.",
            source_id, ctx.date
        );
        let mut state = ControllerState::Thinking;
        let mut feedback: Option<String> = None;
        let mut steps = 0;

        loop {
            if run.iterations >= self.agent.max_iterations {
                run.flags.iteration_cap_reached = true;
                return Ok(SessionEnd::IterationCap);
            }
            if steps >= self.agent.max_steps_per_source {
                return Ok(SessionEnd::StepBudget);
            }
            if Instant::now() >= session.deadline {
                run.flags.timed_out = true;
                return Ok(SessionEnd::Deadline);
            }

            let request = OracleRequest {
                goal: goal.clone(),
                focus: Some(source_id.to_string()),
                date: ctx.date,
                sources_in_scope: session.tools.scope().to_vec(),
                tools: tool_specs(),
                trace: run.trace.steps().to_vec(),
                feedback: feedback.take(),
            };
            run.iterations += 1;
            steps += 1;

            let reply = match self.call_oracle(session, run, &request).await {
                Ok(reply) => reply,
                Err(CallFailure { error: OracleError::Schema { reason, .. }, .. }) => {
                    self.reject(run, Some(source_id), &reason);
                    feedback = Some(reason);
                    continue;
                }
                Err(failure) => {
                    run.trace.record(
                        Some(source_id),
                        state,
                        "",
                        None,
                        Observation::OracleFailure {
                            error: failure.error.to_string(),
                            attempts: failure.attempts,
                        },
                    );
                    if Instant::now() >= session.deadline {
                        run.flags.timed_out = true;
                        return Ok(SessionEnd::Deadline);
                    }
                    return Ok(SessionEnd::OracleFailed(failure.error.to_string()));
                }
            };

            match reply.proposal {
                Proposal::Final { thought, answer } => {
                    let Some(verdict) = evidence.get_mut(source_id) else {
                        let reason = format!(
                            "no detector evidence for {} yet; call check_anomalies before concluding",
                            source_id
                        );
                        self.reject(run, Some(source_id), &reason);
                        feedback = Some(reason);
                        continue;
                    };
                    state = state.transition(ControllerState::Concluding)?;
                    verdict.narrative = Some(answer.clone());
                    run.trace.record(
                        Some(source_id),
                        state,
                        &thought,
                        None,
                        Observation::FinalAnswer { narrative: answer },
                    );
                    info!("[+]  {} concluded: {}", source_id, verdict.status);
                    return Ok(SessionEnd::Concluded);
                }
                Proposal::Act { thought, action } => {
                    state = state.transition(ControllerState::Acting)?;
                    let observation = match &action {
                        ToolAction::OverrideSeverity {
                            source_id: target,
                            severity,
                            justification,
                        } => {
                            let step = run.trace.len();
                            match evidence.get_mut(target.as_str()) {
                                Some(verdict) => {
                                    let from = verdict.severity;
                                    match consolidator::apply_override(verdict, *severity, justification, step) {
                                        Ok(()) => Observation::OverrideApplied {
                                            source_id: target.clone(),
                                            from: from.unwrap_or(*severity),
                                            to: *severity,
                                        },
                                        Err(e) => Observation::ToolError { message: e.to_string() },
                                    }
                                }
                                None => Observation::ToolError {
                                    message: format!(
                                        "no detector evidence for {}; nothing to override",
                                        target
                                    ),
                                },
                            }
                        }
                        other => {
                            let outcome = session.tools.run(ctx, other);
                            for fresh in outcome.evidence {
                                merge_evidence(evidence, fresh);
                            }
                            outcome.observation
                        }
                    };
                    state = state.transition(ControllerState::Observing)?;
                    run.trace.record(Some(source_id), state, &thought, Some(action), observation);
                    state = state.transition(ControllerState::Thinking)?;
                }
            }
        }
    }

    /// Final session asking only for the run narrative. Failures are dropped.
    async fn narrative_session(
        &self,
        session: &Session<'_, '_>,
        date: NaiveDate,
        run: &mut RunState,
    ) -> Option<String> {
        let mut feedback: Option<String> = None;
        for _ in 0..self.agent.max_steps_per_source {
            if run.iterations >= self.agent.max_iterations || Instant::now() >= session.deadline {
                return None;
            }
            let request = OracleRequest {
                goal: "Every source has a verdict. Write a short narrative for the executive summary: what went wrong, what context explains it, and what to do first. Reply with a final answer only.".to_string(),
                focus: None,
                date,
                sources_in_scope: session.tools.scope().to_vec(),
                tools: Vec::new(),
                trace: run.trace.steps().to_vec(),
                feedback: feedback.take(),
            };
            run.iterations += 1;

            match self.call_oracle(session, run, &request).await {
                Ok(OracleReply { proposal: Proposal::Final { thought, answer }, .. }) => {
                    run.trace.record(
                        None,
                        ControllerState::Concluding,
                        &thought,
                        None,
                        Observation::FinalAnswer { narrative: answer.clone() },
                    );
                    return Some(answer);
                }
                Ok(OracleReply { proposal: Proposal::Act { action, .. }, .. }) => {
                    let reason = format!("{} is not available now; reply with a final answer", action);
                    self.reject(run, None, &reason);
                    feedback = Some(reason);
                }
                Err(CallFailure { error: OracleError::Schema { reason, .. }, .. }) => {
                    self.reject(run, None, &reason);
                    feedback = Some(reason);
                }
                Err(failure) => {
                    warn!("[!]  Narrative skipped: {}", failure.error);
                    run.trace.record(
                        None,
                        ControllerState::Thinking,
                        "",
                        None,
                        Observation::OracleFailure {
                            error: failure.error.to_string(),
                            attempts: failure.attempts,
                        },
                    );
                    return None;
                }
            }
        }
        None
    }

    fn reject(&self, run: &mut RunState, focus: Option<&str>, reason: &str) {
        debug!("rejected proposal ({}): {}", focus.unwrap_or("narrative"), reason);
        run.trace.record(
            focus,
            ControllerState::Thinking,
            "",
            None,
            Observation::Rejected { reason: reason.to_string() },
        );
    }

    /// One proposal with bounded retries on transient failures.
    /// Each attempt gets `min(per-call timeout, remaining run budget)`.
    async fn call_oracle(
        &self,
        session: &Session<'_, '_>,
        run: &mut RunState,
        request: &OracleRequest,
    ) -> std::result::Result<OracleReply, CallFailure> {
        let mut attempts = 0u32;
        loop {
            let remaining = session.deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CallFailure { error: OracleError::Timeout, attempts });
            }
            attempts += 1;
            run.oracle_calls += 1;

            let result = match tokio::time::timeout(self.call_timeout.min(remaining), session.oracle.propose(request)).await {
                Ok(result) => result,
                Err(_) => Err(OracleError::Timeout),
            };
            match result {
                Ok(reply) => {
                    run.usage.add(reply.usage);
                    return Ok(reply);
                }
                Err(error @ OracleError::Schema { .. }) => {
                    run.usage.add(error.usage());
                    return Err(CallFailure { error, attempts });
                }
                Err(error) if error.is_transient() && attempts <= self.oracle_config.max_retries => {
                    let backoff = Duration::from_millis(self.oracle_config.retry_backoff_ms * attempts as u64);
                    warn!(
                        "[!]  Oracle attempt {} failed ({}), retrying in {}ms",
                        attempts,
                        error,
                        backoff.as_millis()
                    );
                    run.oracle_retries += 1;
                    let remaining = session.deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(backoff.min(remaining)).await;
                }
                Err(error) => return Err(CallFailure { error, attempts }),
            }
        }
    }
}

// ============================================================================
// Run bookkeeping
// ============================================================================

#[derive(Default)]
struct RunState {
    trace: ReasoningTrace,
    verdicts: Vec<SourceVerdict>,
    narrative: Option<String>,
    flags: RunFlags,
    iterations: usize,
    oracle_calls: usize,
    oracle_retries: usize,
    usage: TokenUsage,
}

struct Session<'o, 't> {
    oracle: &'o dyn ReasoningOracle,
    tools: &'t ToolBox<'t>,
    /// `None` for the narrative session
    focus: Option<&'t str>,
    deadline: Instant,
}

struct CallFailure {
    error: OracleError,
    attempts: u32,
}

#[derive(Debug)]
enum SessionEnd {
    Concluded,
    OracleFailed(String),
    StepBudget,
    IterationCap,
    Deadline,
    NotStarted,
}

impl SessionEnd {
    fn reason(&self, agent: &AgentConfig, run_timeout: Duration) -> String {
        match self {
            SessionEnd::Concluded => "concluded without detector evidence".to_string(),
            SessionEnd::OracleFailed(error) => format!("reasoning oracle failed: {}", error),
            SessionEnd::StepBudget => format!(
                "no conclusion within {} reasoning steps",
                agent.max_steps_per_source
            ),
            SessionEnd::IterationCap => format!(
                "iteration cap of {} reached before a conclusion",
                agent.max_iterations
            ),
            SessionEnd::Deadline => format!(
                "run deadline of {:?} passed before a conclusion",
                run_timeout
            ),
            SessionEnd::NotStarted => "analysis stopped before this source was reached".to_string(),
        }
    }
}

/// Keep a logged override when fresh evidence replaces older evidence.
/// The override only survives while the evidence still has the severity it was decided against.
fn merge_evidence(evidence: &mut BTreeMap<String, SourceVerdict>, mut fresh: SourceVerdict) {
    if let Some(previous) = evidence.get(&fresh.source_id) {
        if let Some(logged) = previous.severity_override.clone() {
            if fresh.severity == Some(logged.from) {
                fresh.status = SourceStatus::from(logged.to);
                fresh.severity_override = Some(logged);
            } else {
                warn!(
                    "[!]  Override on {} dropped: it lowered {} but the evidence is now {}",
                    fresh.source_id,
                    logged.from,
                    fresh.severity.unwrap_or(Severity::AllGood)
                );
            }
        }
        if fresh.narrative.is_none() {
            fresh.narrative = previous.narrative.clone();
        }
    }
    evidence.insert(fresh.source_id.clone(), fresh);
}

/// Placeholder for a source that never got detector evidence
fn pending_verdict(tools: &ToolBox<'_>, source_id: &str) -> SourceVerdict {
    let (processed_files, total_rows) = tools.file_totals(source_id);
    SourceVerdict {
        source_id: source_id.to_string(),
        status: SourceStatus::Inconclusive,
        severity: None,
        incidents: Vec::new(),
        notes: Vec::new(),
        processed_files,
        total_rows,
        narrative: None,
        severity_override: None,
        inconclusive_reason: None,
    }
}
