//! Read-only access to ingested file metadata.
//!
//! A run loads one `DaySnapshot` up front and reads every source's files
//! from it, so all tool calls in the run see the same data.

use crate::error::{IntakeError, Result};
use crate::model::{FileStatus, ObservedFile};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the per-day metadata file inside a snapshot directory
pub const SNAPSHOT_FILE: &str = "files.json";

/// Every observed file for one date, grouped by source
#[derive(Debug, Clone, PartialEq)]
pub struct DaySnapshot {
    pub date: NaiveDate,
    files: BTreeMap<String, Vec<ObservedFile>>,
}

impl DaySnapshot {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            files: BTreeMap::new(),
        }
    }

    /// Add a file, keeping each source's files ordered by arrival
    pub fn push(&mut self, file: ObservedFile) {
        let files = self.files.entry(file.source_id.clone()).or_default();
        files.push(file);
        files.sort_by(|a, b| {
            a.arrived_at
                .cmp(&b.arrived_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });
    }

    /// Files for a source; empty when nothing was ingested for it
    pub fn files_for(&self, source_id: &str) -> &[ObservedFile] {
        self.files.get(source_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Sources with at least one file, sorted
    pub fn source_ids(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn file_count(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

/// Read-only metadata store
pub trait MetadataStore: Send + Sync {
    /// Load every file ingested on `date`
    fn load_day(&self, date: NaiveDate) -> Result<DaySnapshot>;

    /// Files for the date, optionally narrowed to one source, in arrival order
    fn list_observed_files(&self, date: NaiveDate, source_id: Option<&str>) -> Result<Vec<ObservedFile>> {
        let snapshot = self.load_day(date)?;
        Ok(match source_id {
            Some(id) => snapshot.files_for(id).to_vec(),
            None => snapshot
                .source_ids()
                .iter()
                .flat_map(|id| snapshot.files_for(id).to_vec())
                .collect(),
        })
    }
}

// ============================================================================
// JSON snapshot directories
// ============================================================================

/// Reads `<data_dir>/<YYYY-MM-DD>*/files.json`
#[derive(Debug, Clone)]
pub struct JsonDirStore {
    data_dir: PathBuf,
}

/// One record as written by the ingestion platform
#[derive(Debug, Deserialize)]
struct RawFileRecord {
    filename: String,
    #[serde(default)]
    entity_id: Option<String>,
    #[serde(default)]
    rows: f64,
    #[serde(default)]
    status: String,
    #[serde(default)]
    is_duplicated: bool,
    #[serde(default)]
    uploaded_at: String,
}

impl JsonDirStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn snapshot_dir(&self, date: NaiveDate) -> Result<PathBuf> {
        let prefix = date.format("%Y-%m-%d").to_string();
        let entries = std::fs::read_dir(&self.data_dir).map_err(|e| {
            IntakeError::MetadataUnavailable(format!("{}: {}", self.data_dir.display(), e))
        })?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_dir())
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(&prefix))
                    .unwrap_or(false)
            })
            .collect();
        candidates.sort();

        candidates
            .into_iter()
            .next()
            .ok_or(IntakeError::SnapshotNotFound { date })
    }
}

impl MetadataStore for JsonDirStore {
    fn load_day(&self, date: NaiveDate) -> Result<DaySnapshot> {
        let dir = self.snapshot_dir(date)?;
        let path = dir.join(SNAPSHOT_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| IntakeError::MetadataUnavailable(format!("{}: {}", path.display(), e)))?;
        let raw: BTreeMap<String, Vec<RawFileRecord>> = serde_json::from_str(&content)
            .map_err(|e| IntakeError::MetadataUnavailable(format!("{}: {}", path.display(), e)))?;

        let mut snapshot = DaySnapshot::new(date);
        for (source_id, records) in raw {
            for record in records {
                let Some(arrived_at) = parse_timestamp(&record.uploaded_at) else {
                    return Err(IntakeError::MetadataUnavailable(format!(
                        "{}: {} / {} has an unreadable uploaded_at '{}'",
                        path.display(),
                        source_id,
                        record.filename,
                        record.uploaded_at
                    )));
                };
                if arrived_at.date_naive() != date {
                    continue;
                }
                snapshot.push(ObservedFile {
                    source_id: source_id.clone(),
                    entity_id: record.entity_id,
                    file_name: record.filename,
                    rows: record.rows.max(0.0).round() as u64,
                    arrived_at,
                    status: map_status(&record.status, record.is_duplicated),
                });
            }
        }

        debug!(
            "Loaded {} files for {} from {}",
            snapshot.file_count(),
            date,
            path.display()
        );
        Ok(snapshot)
    }
}

fn map_status(status: &str, is_duplicated: bool) -> FileStatus {
    if is_duplicated {
        return FileStatus::Duplicate;
    }
    match status.trim().to_lowercase().as_str() {
        "failed" | "stopped" => FileStatus::Failed,
        _ => FileStatus::Ok,
    }
}

/// RFC 3339, or a naive ISO timestamp taken as UTC
fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

// ============================================================================
// In-memory store
// ============================================================================

/// Store backed by in-memory snapshots. Dates without a snapshot read as empty days.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    days: BTreeMap<NaiveDate, DaySnapshot>,
    unavailable: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: add one file on the given date
    pub fn with_file(mut self, date: NaiveDate, file: ObservedFile) -> Self {
        self.days
            .entry(date)
            .or_insert_with(|| DaySnapshot::new(date))
            .push(file);
        self
    }

    pub fn with_files(self, date: NaiveDate, files: impl IntoIterator<Item = ObservedFile>) -> Self {
        files.into_iter().fold(self, |store, f| store.with_file(date, f))
    }

    /// Builder: every read fails with `MetadataUnavailable`
    pub fn unavailable(mut self) -> Self {
        self.unavailable = true;
        self
    }
}

impl MetadataStore for InMemoryStore {
    fn load_day(&self, date: NaiveDate) -> Result<DaySnapshot> {
        if self.unavailable {
            return Err(IntakeError::MetadataUnavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(self
            .days
            .get(&date)
            .cloned()
            .unwrap_or_else(|| DaySnapshot::new(date)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const FILES_JSON: &str = r#"{
  "BankX": [
    {"filename": "b_2.csv", "rows": 120, "status": "processed", "is_duplicated": false,
     "uploaded_at": "2025-09-09T09:15:00+00:00", "file_size": 1.5},
    {"filename": "b_1.csv", "rows": 100, "status": "processed", "is_duplicated": false,
     "uploaded_at": "2025-09-09T08:09:23.298818+00:00"},
    {"filename": "old.csv", "rows": 5, "status": "processed", "is_duplicated": false,
     "uploaded_at": "2025-09-08T23:59:00+00:00"}
  ],
  "Uber": [
    {"filename": "u.csv", "rows": 0, "status": "STOPPED", "is_duplicated": false,
     "uploaded_at": "2025-09-09T10:00:00"},
    {"filename": "u.csv", "rows": 7, "status": "processed", "is_duplicated": true,
     "uploaded_at": "2025-09-09T10:05:00+00:00", "status_message": "dup"}
  ]
}"#;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 9, 9).unwrap()
    }

    fn store_with_snapshot() -> (tempfile::TempDir, JsonDirStore) {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2025-09-09_20_00_UTC");
        std::fs::create_dir(&day).unwrap();
        std::fs::write(day.join(SNAPSHOT_FILE), FILES_JSON).unwrap();
        let store = JsonDirStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn test_json_dir_filters_by_date_and_orders_by_arrival() {
        let (_dir, store) = store_with_snapshot();
        let files = store.list_observed_files(date(), Some("BankX")).unwrap();
        let names: Vec<_> = files.iter().map(|f| f.file_name.as_str()).collect();
        assert_eq!(names, vec!["b_1.csv", "b_2.csv"]);
        assert_eq!(files[0].arrived_at.hour(), 8);
    }

    #[test]
    fn test_status_mapping() {
        let (_dir, store) = store_with_snapshot();
        let files = store.list_observed_files(date(), Some("Uber")).unwrap();
        assert_eq!(files[0].status, FileStatus::Failed);
        assert_eq!(files[1].status, FileStatus::Duplicate);
        assert_eq!(map_status("processed", false), FileStatus::Ok);
    }

    #[test]
    fn test_absent_source_is_empty_not_error() {
        let (_dir, store) = store_with_snapshot();
        assert!(store.list_observed_files(date(), Some("Rappi")).unwrap().is_empty());
    }

    #[test]
    fn test_missing_snapshot_and_unreadable_dir() {
        let (_dir, store) = store_with_snapshot();
        let other = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        assert!(matches!(
            store.load_day(other),
            Err(IntakeError::SnapshotNotFound { .. })
        ));

        let gone = JsonDirStore::new("/nonexistent/intake-data");
        assert!(matches!(
            gone.load_day(date()),
            Err(IntakeError::MetadataUnavailable(_))
        ));
    }

    #[test]
    fn test_malformed_snapshot_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2025-09-09");
        std::fs::create_dir(&day).unwrap();
        std::fs::write(day.join(SNAPSHOT_FILE), "{not json").unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(
            store.load_day(date()),
            Err(IntakeError::MetadataUnavailable(_))
        ));
    }

    #[test]
    fn test_unreadable_upload_time_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let day = dir.path().join("2025-09-09");
        std::fs::create_dir(&day).unwrap();
        std::fs::write(
            day.join(SNAPSHOT_FILE),
            r#"{"BankX": [{"filename": "b.csv", "rows": 10, "status": "processed", "uploaded_at": "yesterday-ish"}]}"#,
        )
        .unwrap();
        let store = JsonDirStore::new(dir.path());

        match store.load_day(date()) {
            Err(IntakeError::MetadataUnavailable(message)) => {
                assert!(message.contains("BankX"));
                assert!(message.contains("b.csv"));
            }
            other => panic!("expected MetadataUnavailable, got {:?}", other),
        }
    }

    #[test]
    fn test_in_memory_store() {
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 8, 0, 0).unwrap();
        let store = InMemoryStore::new()
            .with_file(date(), ObservedFile::new("Rappi", None, "r.csv", 500, at, FileStatus::Ok));
        assert_eq!(store.load_day(date()).unwrap().source_ids(), vec!["Rappi".to_string()]);
        let other = NaiveDate::from_ymd_opt(2025, 9, 10).unwrap();
        assert_eq!(store.load_day(other).unwrap().file_count(), 0);
        assert!(InMemoryStore::new().unavailable().load_day(date()).is_err());
    }
}
