//! Per-run analysis context.
//!
//! Every detector and the consolidator receive this object explicitly; there
//! is no process-wide "current day" state, so concurrent runs never interfere.

use crate::model::DayOfWeek;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why a source is excused from delivering today
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovedException {
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: Uuid,
    pub date: NaiveDate,
    exceptions: BTreeMap<String, ApprovedException>,
}

impl RunContext {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            date,
            exceptions: BTreeMap::new(),
        }
    }

    pub fn weekday(&self) -> DayOfWeek {
        DayOfWeek::of(self.date)
    }

    /// Record an approved exception (e.g. a confirmed holiday) for one source
    pub fn approve_exception(&mut self, source_id: &str, reason: &str) {
        self.exceptions.insert(
            source_id.to_string(),
            ApprovedException {
                reason: reason.to_string(),
            },
        );
    }

    pub fn exception_for(&self, source_id: &str) -> Option<&ApprovedException> {
        self.exceptions.get(source_id)
    }

    pub fn exceptions(&self) -> &BTreeMap<String, ApprovedException> {
        &self.exceptions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exceptions_are_per_source() {
        let mut ctx = RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 15).unwrap());
        assert_eq!(ctx.weekday(), DayOfWeek::Mon);

        ctx.approve_exception("BankX", "national holiday");
        assert!(ctx.exception_for("BankX").is_some());
        assert!(ctx.exception_for("Rappi").is_none());
    }

    #[test]
    fn test_runs_get_distinct_ids() {
        let date = NaiveDate::from_ymd_opt(2025, 9, 9).unwrap();
        assert_ne!(RunContext::new(date).run_id, RunContext::new(date).run_id);
    }
}
