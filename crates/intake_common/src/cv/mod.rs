//! Source profiles ("CVs") and the read-only repository that holds them.
//!
//! A CV describes what a healthy day looks like for one source: upload
//! windows, volume baselines, required entities and emptiness tolerance.
//! Profiles are loaded once at startup from `*.toml` files or from the
//! `<source_id>_native.md` markdown reports, then shared read-only.

pub mod markdown;

use crate::config::DetectionConfig;
use crate::error::{IntakeError, Result};
use crate::model::{DayOfWeek, ObservedFile};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// Fallback volume deviation threshold when neither CV nor config set one
pub const DEFAULT_VOLUME_THRESHOLD_PCT: f64 = 50.0;

/// Fallback lateness slack around the upload window
pub const DEFAULT_LATE_TOLERANCE_MINUTES: i64 = 240;

// ============================================================================
// Profile types
// ============================================================================

/// Expected upload window for one weekday (UTC wall clock)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadWindow {
    #[serde(with = "clock")]
    pub start: NaiveTime,
    #[serde(with = "clock")]
    pub end: NaiveTime,
}

/// Expected number of files for one weekday
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileCountExpectation {
    #[serde(default)]
    pub min: u32,
    #[serde(default)]
    pub max: u32,
}

/// A sub-entity that delivers its own files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityExpectation {
    pub entity_id: String,
    /// Days the entity must deliver; absent means every day
    #[serde(default)]
    pub required_on: Option<BTreeSet<DayOfWeek>>,
    /// Expected row count per weekday
    #[serde(default)]
    pub volume_baseline: BTreeMap<DayOfWeek, u64>,
}

impl EntityExpectation {
    pub fn is_required_on(&self, day: DayOfWeek) -> bool {
        match &self.required_on {
            None => true,
            Some(days) => days.contains(&day),
        }
    }
}

/// Per-source expectation profile. Immutable within an analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProfile {
    pub source_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub upload_windows: BTreeMap<DayOfWeek, UploadWindow>,
    #[serde(default)]
    pub late_tolerance_minutes: Option<i64>,
    /// Source-level expected row count per weekday
    #[serde(default)]
    pub volume_baseline: BTreeMap<DayOfWeek, u64>,
    #[serde(default)]
    pub volume_threshold_pct: Option<f64>,
    #[serde(default)]
    pub entities: Vec<EntityExpectation>,
    #[serde(default)]
    pub allow_empty: bool,
    /// Days on which empty files are normal even when `allow_empty` is false
    #[serde(default)]
    pub empty_allowed_on: BTreeSet<DayOfWeek>,
    #[serde(default)]
    pub expected_files: BTreeMap<DayOfWeek, FileCountExpectation>,
    #[serde(default)]
    pub filename_patterns: Vec<String>,
}

impl SourceProfile {
    /// Bare profile with no expectations; used by tests and builders
    pub fn new(source_id: &str) -> Self {
        Self {
            source_id: source_id.to_string(),
            display_name: None,
            upload_windows: BTreeMap::new(),
            late_tolerance_minutes: None,
            volume_baseline: BTreeMap::new(),
            volume_threshold_pct: None,
            entities: Vec::new(),
            allow_empty: false,
            empty_allowed_on: BTreeSet::new(),
            expected_files: BTreeMap::new(),
            filename_patterns: Vec::new(),
        }
    }

    pub fn volume_threshold_pct(&self) -> f64 {
        self.volume_threshold_pct
            .unwrap_or(DEFAULT_VOLUME_THRESHOLD_PCT)
    }

    pub fn late_tolerance_minutes(&self) -> i64 {
        self.late_tolerance_minutes
            .unwrap_or(DEFAULT_LATE_TOLERANCE_MINUTES)
    }

    pub fn window(&self, day: DayOfWeek) -> Option<&UploadWindow> {
        self.upload_windows.get(&day)
    }

    pub fn required_entities(&self, day: DayOfWeek) -> impl Iterator<Item = &EntityExpectation> {
        self.entities.iter().filter(move |e| e.is_required_on(day))
    }

    pub fn empties_allowed(&self, day: DayOfWeek) -> bool {
        self.allow_empty || self.empty_allowed_on.contains(&day)
    }

    pub fn source_baseline(&self, day: DayOfWeek) -> Option<u64> {
        self.volume_baseline.get(&day).copied()
    }

    pub fn expected_files(&self, day: DayOfWeek) -> Option<&FileCountExpectation> {
        self.expected_files.get(&day)
    }

    /// Fill thresholds the CV left unset from the configured defaults
    pub fn apply_defaults(&mut self, defaults: &DetectionConfig) {
        if self.volume_threshold_pct.is_none() {
            self.volume_threshold_pct = Some(defaults.volume_threshold_pct);
        }
        if self.late_tolerance_minutes.is_none() {
            self.late_tolerance_minutes = Some(defaults.late_tolerance_minutes);
        }
    }

    /// Entity whose `_<entity>_` marker appears in the file name
    pub fn entity_for_file(&self, file_name: &str) -> Option<&str> {
        self.entities
            .iter()
            .find(|e| file_name.contains(&format!("_{}_", e.entity_id)))
            .map(|e| e.entity_id.as_str())
    }

    /// Attribute files that arrived without an entity id
    pub fn attribute(&self, files: Vec<ObservedFile>) -> Vec<ObservedFile> {
        files
            .into_iter()
            .map(|mut f| {
                if f.entity_id.is_none() {
                    f.entity_id = self.entity_for_file(&f.file_name).map(str::to_string);
                }
                f
            })
            .collect()
    }
}

// ============================================================================
// Repository
// ============================================================================

/// Read-only collection of CVs, one per source
#[derive(Debug, Clone, Default)]
pub struct CvRepository {
    profiles: BTreeMap<String, SourceProfile>,
}

impl CvRepository {
    /// Build from in-memory profiles. Duplicate source ids are rejected.
    pub fn from_profiles(profiles: Vec<SourceProfile>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for profile in profiles {
            let id = profile.source_id.clone();
            if map.insert(id.clone(), profile).is_some() {
                return Err(IntakeError::InvalidProfile {
                    path: id.clone(),
                    reason: format!("duplicate CV for source '{}'", id),
                });
            }
        }
        Ok(Self { profiles: map })
    }

    /// Load every `*.toml` and `*_native.md` CV in a directory
    pub fn load_dir(dir: &Path, defaults: &DetectionConfig) -> Result<Self> {
        if !dir.is_dir() {
            return Err(IntakeError::Config(format!(
                "CV directory {} does not exist",
                dir.display()
            )));
        }

        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        paths.sort();

        let mut profiles = Vec::new();
        for path in paths {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            let profile = if name.ends_with(".toml") {
                load_toml_profile(&path)?
            } else if name.ends_with("_native.md") {
                let content = std::fs::read_to_string(&path)?;
                let fallback_id = name.trim_end_matches("_native.md");
                markdown::parse(&content, fallback_id).map_err(|reason| {
                    IntakeError::InvalidProfile {
                        path: path.display().to_string(),
                        reason,
                    }
                })?
            } else {
                debug!("Skipping non-CV file {}", path.display());
                continue;
            };

            let mut profile = profile;
            profile.apply_defaults(defaults);
            profiles.push(profile);
        }

        if profiles.is_empty() {
            warn!("[!]  No CVs found in {}", dir.display());
        }

        let repo = Self::from_profiles(profiles)?;
        info!("Loaded {} CVs from {}", repo.len(), dir.display());
        Ok(repo)
    }

    pub fn get_profile(&self, source_id: &str) -> Result<&SourceProfile> {
        self.profiles
            .get(source_id)
            .ok_or_else(|| IntakeError::ProfileNotFound {
                source_id: source_id.to_string(),
            })
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.profiles.contains_key(source_id)
    }

    /// Active source ids in sorted order
    pub fn source_ids(&self) -> Vec<String> {
        self.profiles.keys().cloned().collect()
    }

    pub fn profiles(&self) -> impl Iterator<Item = &SourceProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

fn load_toml_profile(path: &Path) -> Result<SourceProfile> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content).map_err(|e| IntakeError::InvalidProfile {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Wall-clock times written as "HH:MM", "HH:MM:SS" or with a trailing " UTC"
pub(crate) mod clock {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<NaiveTime> {
        let trimmed = raw.trim().trim_end_matches("UTC").trim();
        NaiveTime::parse_from_str(trimmed, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(trimmed, "%H:%M"))
            .ok()
    }

    pub fn serialize<S: Serializer>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid time '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use crate::model::FileStatus;

    const BANKX_TOML: &str = r#"
source_id = "BankX"
display_name = "Bank X settlements"
late_tolerance_minutes = 30

[upload_windows]
Tue = { start = "07:00", end = "08:00" }
Monday = { start = "07:30:00", end = "08:30:00 UTC" }

[volume_baseline]
Mon = 10000

[[entities]]
entity_id = "settlement"

[[entities]]
entity_id = "refunds"
required_on = ["Mon"]

[entities.volume_baseline]
Mon = 250
"#;

    #[test]
    fn test_toml_profile_parses() {
        let profile: SourceProfile = toml::from_str(BANKX_TOML).unwrap();
        assert_eq!(profile.source_id, "BankX");
        assert_eq!(profile.late_tolerance_minutes(), 30);
        assert_eq!(profile.volume_threshold_pct(), DEFAULT_VOLUME_THRESHOLD_PCT);

        let tue = profile.window(DayOfWeek::Tue).unwrap();
        assert_eq!(tue.end, NaiveTime::from_hms_opt(8, 0, 0).unwrap());
        let mon = profile.window(DayOfWeek::Mon).unwrap();
        assert_eq!(mon.start, NaiveTime::from_hms_opt(7, 30, 0).unwrap());

        assert_eq!(profile.source_baseline(DayOfWeek::Mon), Some(10000));
        assert_eq!(profile.entities[1].volume_baseline.get(&DayOfWeek::Mon), Some(&250));
    }

    #[test]
    fn test_required_entities_by_day() {
        let profile: SourceProfile = toml::from_str(BANKX_TOML).unwrap();
        let monday: Vec<_> = profile
            .required_entities(DayOfWeek::Mon)
            .map(|e| e.entity_id.as_str())
            .collect();
        let tuesday: Vec<_> = profile
            .required_entities(DayOfWeek::Tue)
            .map(|e| e.entity_id.as_str())
            .collect();
        assert_eq!(monday, vec!["settlement", "refunds"]);
        assert_eq!(tuesday, vec!["settlement"]);
    }

    #[test]
    fn test_apply_defaults_keeps_cv_values() {
        let mut profile: SourceProfile = toml::from_str(BANKX_TOML).unwrap();
        profile.apply_defaults(&DetectionConfig {
            volume_threshold_pct: 20.0,
            late_tolerance_minutes: 90,
        });
        assert_eq!(profile.volume_threshold_pct(), 20.0);
        assert_eq!(profile.late_tolerance_minutes(), 30);
    }

    #[test]
    fn test_entity_attribution_from_file_name() {
        let profile: SourceProfile = toml::from_str(BANKX_TOML).unwrap();
        let at = Utc.with_ymd_and_hms(2025, 9, 8, 7, 40, 0).unwrap();
        let files = vec![
            ObservedFile::new("BankX", None, "9f2_BankX_refunds_20250908.csv", 10, at, FileStatus::Ok),
            ObservedFile::new("BankX", None, "a11_BankX_other_20250908.csv", 10, at, FileStatus::Ok),
            ObservedFile::new("BankX", Some("settlement"), "manual.csv", 10, at, FileStatus::Ok),
        ];
        let files = profile.attribute(files);
        assert_eq!(files[0].entity_id.as_deref(), Some("refunds"));
        assert_eq!(files[1].entity_id, None);
        assert_eq!(files[2].entity_id.as_deref(), Some("settlement"));
    }

    #[test]
    fn test_repository_rejects_duplicates() {
        let result = CvRepository::from_profiles(vec![
            SourceProfile::new("Uber"),
            SourceProfile::new("Uber"),
        ]);
        assert!(matches!(result, Err(IntakeError::InvalidProfile { .. })));
    }

    #[test]
    fn test_repository_profile_not_found() {
        let repo = CvRepository::from_profiles(vec![SourceProfile::new("Uber")]).unwrap();
        assert!(repo.get_profile("Uber").is_ok());
        assert!(matches!(
            repo.get_profile("Rappi"),
            Err(IntakeError::ProfileNotFound { .. })
        ));
    }

    #[test]
    fn test_load_dir_reads_toml_and_markdown() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bankx.toml"), BANKX_TOML).unwrap();
        std::fs::write(
            dir.path().join("207936_native.md"),
            markdown::tests::SAMPLE_NATIVE_CV,
        )
        .unwrap();
        std::fs::write(dir.path().join("README.txt"), "not a cv").unwrap();

        let repo = CvRepository::load_dir(dir.path(), &DetectionConfig::default()).unwrap();
        assert_eq!(repo.source_ids(), vec!["207936".to_string(), "BankX".to_string()]);
        assert_eq!(
            repo.get_profile("207936").unwrap().volume_threshold_pct(),
            DetectionConfig::default().volume_threshold_pct
        );
    }

    #[test]
    fn test_clock_formats() {
        assert_eq!(clock::parse("08:00"), NaiveTime::from_hms_opt(8, 0, 0));
        assert_eq!(clock::parse("08:00:30 UTC"), NaiveTime::from_hms_opt(8, 0, 30));
        assert_eq!(clock::parse("8am"), None);
    }
}
