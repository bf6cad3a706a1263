//! Holiday lookup. Consulted before the detectors on every source evaluation.

use crate::config::CalendarConfig;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

pub trait HolidayCalendar: Send + Sync {
    fn is_holiday(&self, date: NaiveDate, source_id: &str) -> bool;
}

/// Fixed list of global and per-source holidays
#[derive(Debug, Clone, Default)]
pub struct StaticCalendar {
    global: BTreeSet<NaiveDate>,
    per_source: BTreeMap<String, BTreeSet<NaiveDate>>,
}

impl StaticCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CalendarConfig) -> Self {
        Self {
            global: config.holidays.iter().copied().collect(),
            per_source: config
                .sources
                .iter()
                .map(|(id, cal)| (id.clone(), cal.holidays.iter().copied().collect()))
                .collect(),
        }
    }

    pub fn with_holiday(mut self, date: NaiveDate) -> Self {
        self.global.insert(date);
        self
    }

    pub fn with_source_holiday(mut self, source_id: &str, date: NaiveDate) -> Self {
        self.per_source
            .entry(source_id.to_string())
            .or_default()
            .insert(date);
        self
    }
}

impl HolidayCalendar for StaticCalendar {
    fn is_holiday(&self, date: NaiveDate, source_id: &str) -> bool {
        self.global.contains(&date)
            || self
                .per_source
                .get(source_id)
                .map(|days| days.contains(&date))
                .unwrap_or(false)
    }
}
