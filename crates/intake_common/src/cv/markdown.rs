//! Parser for the markdown "native" CV reports.
//!
//! These reports are generated from historical ingestion statistics and
//! carry four tables we care about:
//!
//! | Section                           | Feeds                              |
//! |-----------------------------------|------------------------------------|
//! | File Processing Statistics by Day | `expected_files`                   |
//! | Upload Schedule Patterns by Day   | `upload_windows`                   |
//! | Entity Statistics by Day of Week  | `entities` (required days, rows)   |
//! | Day-of-Week Summary               | `empty_allowed_on`                 |

use super::{clock, EntityExpectation, FileCountExpectation, SourceProfile, UploadWindow};
use crate::model::DayOfWeek;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

/// Parse a native CV. `fallback_id` is used when the report lacks a Resource ID.
pub fn parse(content: &str, fallback_id: &str) -> Result<SourceProfile, String> {
    let id_re = Regex::new(r"\*\*Resource ID\*\*:\s*([^\s*]+)").map_err(|e| e.to_string())?;
    let source_id = id_re
        .captures(content)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| fallback_id.to_string());

    if source_id.is_empty() {
        return Err("CV has no Resource ID and no usable file name".to_string());
    }

    let mut profile = SourceProfile::new(&source_id);
    profile.expected_files = parse_file_stats(content);
    profile.upload_windows = parse_upload_windows(content);
    profile.entities = parse_entity_stats(content)?;
    profile.empty_allowed_on = parse_empty_days(content);
    profile.filename_patterns = parse_filename_patterns(content)?;
    Ok(profile)
}

/// Rows of the first table following a heading, split into trimmed cells.
/// The header row is kept; separator rows are dropped.
fn table_after(content: &str, heading: &str) -> Vec<Vec<String>> {
    let mut lines = content.lines().skip_while(|l| !l.contains(heading));
    if lines.next().is_none() {
        return Vec::new();
    }

    lines
        .skip_while(|l| !l.trim_start().starts_with('|'))
        .take_while(|l| l.trim_start().starts_with('|'))
        .filter(|l| !l.contains("---"))
        .map(|l| {
            l.trim()
                .trim_matches('|')
                .split('|')
                .map(|c| c.trim().to_string())
                .collect()
        })
        .collect()
}

fn number(cell: &str) -> f64 {
    cell.trim().parse::<f64>().unwrap_or(0.0)
}

fn parse_file_stats(content: &str) -> BTreeMap<DayOfWeek, FileCountExpectation> {
    // | Day | Mean | Median | Mode | StdDev | Min | Max |
    let mut stats = BTreeMap::new();
    for row in table_after(content, "File Processing Statistics by Day") {
        if row.len() < 7 {
            continue;
        }
        let Some(day) = DayOfWeek::parse(&row[0]) else {
            continue;
        };
        let median = number(&row[2]);
        let mode = number(&row[3]);
        let min = number(&row[5]) as u32;
        let max = number(&row[6]) as u32;

        // A zero minimum is often a single outlier; trust median/mode then
        let min = if min == 0 && (median > 0.0 || mode > 0.0) {
            1
        } else {
            min
        };
        stats.insert(day, FileCountExpectation { min, max });
    }
    stats
}

fn parse_upload_windows(content: &str) -> BTreeMap<DayOfWeek, UploadWindow> {
    let rows = table_after(content, "Upload Schedule Patterns by Day");
    let Some(header) = rows.first() else {
        return BTreeMap::new();
    };
    let column = header
        .iter()
        .position(|h| h.to_lowercase().contains("window"))
        .unwrap_or(5);

    let mut windows = BTreeMap::new();
    for row in rows.iter().skip(1) {
        let (Some(day_cell), Some(window_cell)) = (row.first(), row.get(column)) else {
            continue;
        };
        let Some(day) = DayOfWeek::parse(day_cell) else {
            continue;
        };
        let parts: Vec<&str> = if window_cell.contains('–') {
            window_cell.split('–').collect()
        } else {
            window_cell.split('-').collect()
        };
        if let [start, end] = parts.as_slice() {
            if let (Some(start), Some(end)) = (clock::parse(start), clock::parse(end)) {
                windows.insert(day, UploadWindow { start, end });
            }
        }
    }
    windows
}

fn parse_entity_stats(content: &str) -> Result<Vec<EntityExpectation>, String> {
    let files_re = Regex::new(r"Median Files:\s*([\d.]+)").map_err(|e| e.to_string())?;
    let rows_re = Regex::new(r"Median Rows:\s*([\d.]+)").map_err(|e| e.to_string())?;

    let rows = table_after(content, "Entity Statistics by Day of Week");
    let Some(header) = rows.first() else {
        return Ok(Vec::new());
    };
    let days: Vec<Option<DayOfWeek>> = header.iter().skip(1).map(|h| DayOfWeek::parse(h)).collect();

    let capture = |re: &Regex, cell: &str| -> f64 {
        re.captures(cell)
            .and_then(|c| c.get(1))
            .map(|m| number(m.as_str()))
            .unwrap_or(0.0)
    };

    let mut entities = Vec::new();
    for row in rows.iter().skip(1) {
        let Some(entity_id) = row.first().filter(|e| !e.is_empty()) else {
            continue;
        };
        let mut required = BTreeSet::new();
        let mut baseline = BTreeMap::new();
        for (cell, day) in row.iter().skip(1).zip(days.iter()) {
            let Some(day) = day else { continue };
            if capture(&files_re, cell) > 0.0 {
                required.insert(*day);
            }
            let median_rows = capture(&rows_re, cell);
            if median_rows > 0.0 {
                baseline.insert(*day, median_rows.round() as u64);
            }
        }
        entities.push(EntityExpectation {
            entity_id: entity_id.clone(),
            required_on: Some(required),
            volume_baseline: baseline,
        });
    }
    Ok(entities)
}

fn parse_empty_days(content: &str) -> BTreeSet<DayOfWeek> {
    // | Day | Row Statistics | Empty Files Analysis | Processing Notes |
    let mut days = BTreeSet::new();
    for row in table_after(content, "Day-of-Week Summary").iter().skip(1) {
        let (Some(day_cell), Some(analysis)) = (row.first(), row.get(2)) else {
            continue;
        };
        let Some(day) = DayOfWeek::parse(day_cell) else {
            continue;
        };
        let max_empty = analysis
            .split("<br>")
            .filter_map(|line| line.split_once(':'))
            .find(|(key, _)| key.trim().trim_start_matches('•').trim().eq_ignore_ascii_case("max"))
            .map(|(_, value)| number(value))
            .unwrap_or(0.0);
        if max_empty > 0.0 {
            days.insert(day);
        }
    }
    days
}

fn parse_filename_patterns(content: &str) -> Result<Vec<String>, String> {
    let re = Regex::new(r"Generic structure\s*`([^`]+)`").map_err(|e| e.to_string())?;
    Ok(re
        .captures_iter(content)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::NaiveTime;

    pub const SAMPLE_NATIVE_CV: &str = r#"# Data Source CV

- **Resource ID**: 207936
- Generic structure `{randomId}_{Merchant}_{Entity}_settlement_{yyyymmdd}.csv`

## File Processing Statistics by Day

| Day | Mean Files | Median Files | Mode Files | StdDev Files | Min Files | Max Files |
|-----|-----------|--------------|------------|--------------|-----------|-----------|
| Mon | 3.10 | 3.00 | 3.00 | 0.40 | 2 | 4 |
| Tue | 1.20 | 1.00 | 1.00 | 0.50 | 0 | 2 |
| Sun | 0.00 | 0.00 | 0.00 | 0.00 | 0 | 0 |

## Upload Schedule Patterns by Day

| Day | Upload Hour Mean | Upload Hour Median | StdDev | Samples | Upload Time Window Expected | Notes |
|-----|------------------|--------------------|--------|---------|-----------------------------|-------|
| Mon | 8.1 | 8.0 | 0.2 | 12 | 08:00:00–09:00:00 UTC | stable |
| Tue | 8.3 | 8.0 | 0.4 | 12 | 08:00:00-09:30:00 UTC | stable |
| Sun | - | - | - | 0 | N/A | none |

## Entity Statistics by Day of Week

| Entity | Monday | Tuesday | Sunday |
|--------|--------|---------|--------|
| Clover | Median Files: 1.00<br>Median Rows: 3500 | Median Files: 1.00<br>Median Rows: 1200.4 | Median Files: 0.00<br>Median Rows: 0 |
| POS | Median Files: 1.00<br>Median Rows: 0 | Median Files: 0.00<br>Median Rows: 0 | Median Files: 0.00<br>Median Rows: 0 |

## Day-of-Week Summary

| Day | Row Statistics | Empty Files Analysis | Processing Notes |
|-----|----------------|----------------------|------------------|
| Mon | Mean: 4000 | Min: 0<br>Max: 1<br>Mean: 0.40 | POS structurally empty |
| Tue | Mean: 1300 | Min: 0<br>Max: 0<br>Mean: 0.00 | - |
"#;

    #[test]
    fn test_parse_resource_id_and_patterns() {
        let profile = parse(SAMPLE_NATIVE_CV, "fallback").unwrap();
        assert_eq!(profile.source_id, "207936");
        assert_eq!(profile.filename_patterns.len(), 1);
        assert!(profile.filename_patterns[0].contains("{Entity}"));
    }

    #[test]
    fn test_fallback_id_when_missing() {
        let profile = parse("no tables here", "555").unwrap();
        assert_eq!(profile.source_id, "555");
        assert!(profile.entities.is_empty());
    }

    #[test]
    fn test_file_stats_threshold_rule() {
        let profile = parse(SAMPLE_NATIVE_CV, "x").unwrap();
        assert_eq!(profile.expected_files[&DayOfWeek::Mon], FileCountExpectation { min: 2, max: 4 });
        // min 0 but median 1: at least one file is expected
        assert_eq!(profile.expected_files[&DayOfWeek::Tue].min, 1);
        assert_eq!(profile.expected_files[&DayOfWeek::Sun].min, 0);
    }

    #[test]
    fn test_upload_windows_both_dash_styles() {
        let profile = parse(SAMPLE_NATIVE_CV, "x").unwrap();
        let mon = profile.upload_windows[&DayOfWeek::Mon];
        assert_eq!(mon.start, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        assert_eq!(mon.end, NaiveTime::from_hms_opt(9, 0, 0).unwrap());
        let tue = profile.upload_windows[&DayOfWeek::Tue];
        assert_eq!(tue.end, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
        assert!(!profile.upload_windows.contains_key(&DayOfWeek::Sun));
    }

    #[test]
    fn test_entity_required_days_and_baselines() {
        let profile = parse(SAMPLE_NATIVE_CV, "x").unwrap();
        let clover = &profile.entities[0];
        assert_eq!(clover.entity_id, "Clover");
        assert!(clover.is_required_on(DayOfWeek::Mon));
        assert!(clover.is_required_on(DayOfWeek::Tue));
        assert!(!clover.is_required_on(DayOfWeek::Sun));
        assert_eq!(clover.volume_baseline[&DayOfWeek::Tue], 1200);

        let pos = &profile.entities[1];
        assert!(pos.is_required_on(DayOfWeek::Mon));
        assert!(!pos.is_required_on(DayOfWeek::Tue));
        assert!(pos.volume_baseline.is_empty());
    }

    #[test]
    fn test_empty_days_from_summary() {
        let profile = parse(SAMPLE_NATIVE_CV, "x").unwrap();
        assert!(profile.empties_allowed(DayOfWeek::Mon));
        assert!(!profile.empties_allowed(DayOfWeek::Tue));
    }
}
