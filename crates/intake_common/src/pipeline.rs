//! Per-source evaluation shared by the daemon and the offline scan.
//!
//! The calendar is consulted before the detectors on every evaluation, so a
//! source's verdict is a function of the run date, its CV, the calendar and
//! the snapshot alone. The order in which tools were called does not matter.

use crate::calendar::HolidayCalendar;
use crate::consolidator;
use crate::context::RunContext;
use crate::cv::CvRepository;
use crate::detectors::{previous_period_notes, DetectorSet};
use crate::error::{IntakeError, Result};
use crate::model::SourceVerdict;
use crate::store::DaySnapshot;
use crate::trace::{ControllerState, Observation, ReasoningTrace, ToolAction};
use std::collections::BTreeSet;
use tracing::debug;

/// Read-only inputs for evaluating sources on one day
#[derive(Clone, Copy)]
pub struct SourceEvaluator<'a> {
    repo: &'a CvRepository,
    snapshot: &'a DaySnapshot,
    calendar: &'a dyn HolidayCalendar,
    detectors: &'a DetectorSet,
}

impl<'a> SourceEvaluator<'a> {
    pub fn new(
        repo: &'a CvRepository,
        snapshot: &'a DaySnapshot,
        calendar: &'a dyn HolidayCalendar,
        detectors: &'a DetectorSet,
    ) -> Self {
        Self {
            repo,
            snapshot,
            calendar,
            detectors,
        }
    }

    pub fn repository(&self) -> &'a CvRepository {
        self.repo
    }

    /// Look the source up in the calendar; a holiday becomes an approved exception
    pub fn check_holiday(&self, ctx: &mut RunContext, source_id: &str) -> bool {
        let is_holiday = self.calendar.is_holiday(ctx.date, source_id);
        if is_holiday && ctx.exception_for(source_id).is_none() {
            debug!("{} is a holiday for {}", ctx.date, source_id);
            ctx.approve_exception(source_id, &format!("{} is a holiday", ctx.date));
        }
        is_holiday
    }

    /// Calendar, detectors, consolidation and informational notes for one configured source
    pub fn evaluate(&self, ctx: &mut RunContext, source_id: &str) -> Result<SourceVerdict> {
        let profile = self.repo.get_profile(source_id)?;
        self.check_holiday(ctx, source_id);

        let files = profile.attribute(self.snapshot.files_for(source_id).to_vec());
        let incidents = self.detectors.evaluate(ctx, profile, &files);
        let mut verdict = consolidator::resolve_with_files(ctx, source_id, incidents, &files);
        verdict.notes = previous_period_notes(ctx, &files);
        Ok(verdict)
    }

    /// File and row totals observed for a source
    pub fn file_totals(&self, source_id: &str) -> (usize, u64) {
        let files = self.snapshot.files_for(source_id);
        (files.len(), files.iter().map(|f| f.rows).sum())
    }

    /// Explicit verdict for a source with no CV
    pub fn unconfigured(&self, source_id: &str) -> SourceVerdict {
        let (processed_files, total_rows) = self.file_totals(source_id);
        SourceVerdict::unconfigured(source_id, processed_files, total_rows)
    }
}

/// Sources covered by one run, split by whether a CV exists
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scope {
    pub configured: Vec<String>,
    pub unconfigured: Vec<String>,
}

/// The filter when given, otherwise every CV plus every source seen in the snapshot
pub fn resolve_scope(repo: &CvRepository, snapshot: &DaySnapshot, filter: &[String]) -> Result<Scope> {
    let ids: BTreeSet<String> = if filter.is_empty() {
        repo.source_ids().into_iter().chain(snapshot.source_ids()).collect()
    } else {
        let mut ids = BTreeSet::new();
        for id in filter {
            let id = id.trim();
            if id.is_empty() {
                return Err(IntakeError::InvalidRequest(
                    "source filter contains an empty id".to_string(),
                ));
            }
            ids.insert(id.to_string());
        }
        ids
    };

    let (configured, unconfigured) = ids.into_iter().partition(|id| repo.contains(id));
    Ok(Scope {
        configured,
        unconfigured,
    })
}

/// Verdicts and trace of a deterministic scan
#[derive(Debug, Default)]
pub struct PipelineRun {
    pub verdicts: Vec<SourceVerdict>,
    pub trace: ReasoningTrace,
}

/// Holiday lookup then detectors, for every configured source in order
pub fn run(evaluator: &SourceEvaluator<'_>, ctx: &mut RunContext, sources: &[String]) -> PipelineRun {
    let mut out = PipelineRun::default();
    for source_id in sources {
        let is_holiday = evaluator.check_holiday(ctx, source_id);
        out.trace.record(
            Some(source_id),
            ControllerState::Observing,
            "pipeline step",
            Some(ToolAction::CheckHoliday { source_id: source_id.clone() }),
            Observation::holiday(source_id, ctx.date, is_holiday),
        );

        let (observation, verdict) = match evaluator.evaluate(ctx, source_id) {
            Ok(verdict) => (Observation::anomalies(&verdict), verdict),
            Err(e) => (
                Observation::ToolError { message: e.to_string() },
                evaluator.unconfigured(source_id),
            ),
        };
        out.trace.record(
            Some(source_id),
            ControllerState::Observing,
            "pipeline step",
            Some(ToolAction::CheckAnomalies { source_id: source_id.clone() }),
            observation,
        );
        out.verdicts.push(verdict);
    }
    out
}
