//! Core data model: severities, observed files, incidents and verdicts.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Severity
// ============================================================================

/// Severity of an incident or a resolved source.
///
/// Declaration order is the precedence order, so `max()` is the worst case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    AllGood,
    NeedsAttention,
    Urgent,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::AllGood => "ALL_GOOD",
            Severity::NeedsAttention => "NEEDS_ATTENTION",
            Severity::Urgent => "URGENT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().replace([' ', '-'], "_").as_str() {
            "ALL_GOOD" => Some(Severity::AllGood),
            "NEEDS_ATTENTION" => Some(Severity::NeedsAttention),
            "URGENT" => Some(Severity::Urgent),
            _ => None,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Outcome for one source in a report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    AllGood,
    NeedsAttention,
    Urgent,
    /// Evidence could not be completed (oracle failure, cap, timeout)
    Inconclusive,
    /// No CV exists for the source, so it cannot be evaluated
    Unconfigured,
}

impl From<Severity> for SourceStatus {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::AllGood => SourceStatus::AllGood,
            Severity::NeedsAttention => SourceStatus::NeedsAttention,
            Severity::Urgent => SourceStatus::Urgent,
        }
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AllGood => "ALL_GOOD",
            Self::NeedsAttention => "NEEDS_ATTENTION",
            Self::Urgent => "URGENT",
            Self::Inconclusive => "INCONCLUSIVE",
            Self::Unconfigured => "UNCONFIGURED",
        };
        write!(f, "{}", s)
    }
}

/// Global outcome of an analysis run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    AllGood,
    NeedsAttention,
    Urgent,
    Inconclusive,
}

impl From<Severity> for RunStatus {
    fn from(severity: Severity) -> Self {
        match severity {
            Severity::AllGood => RunStatus::AllGood,
            Severity::NeedsAttention => RunStatus::NeedsAttention,
            Severity::Urgent => RunStatus::Urgent,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::AllGood => "ALL_GOOD",
            Self::NeedsAttention => "NEEDS_ATTENTION",
            Self::Urgent => "URGENT",
            Self::Inconclusive => "INCONCLUSIVE",
        };
        write!(f, "{}", s)
    }
}

// ============================================================================
// Day of week
// ============================================================================

/// Day of week used as a key in CV schedules and baselines
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DayOfWeek {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl DayOfWeek {
    pub const ALL: [DayOfWeek; 7] = [
        DayOfWeek::Mon,
        DayOfWeek::Tue,
        DayOfWeek::Wed,
        DayOfWeek::Thu,
        DayOfWeek::Fri,
        DayOfWeek::Sat,
        DayOfWeek::Sun,
    ];

    pub fn of(date: NaiveDate) -> Self {
        match date.weekday() {
            chrono::Weekday::Mon => DayOfWeek::Mon,
            chrono::Weekday::Tue => DayOfWeek::Tue,
            chrono::Weekday::Wed => DayOfWeek::Wed,
            chrono::Weekday::Thu => DayOfWeek::Thu,
            chrono::Weekday::Fri => DayOfWeek::Fri,
            chrono::Weekday::Sat => DayOfWeek::Sat,
            chrono::Weekday::Sun => DayOfWeek::Sun,
        }
    }

    /// Accepts short ("Mon") and long ("Monday") names, any case
    pub fn parse(s: &str) -> Option<Self> {
        let lower = s.trim().to_lowercase();
        let key = lower.get(..3)?;
        match key {
            "mon" => Some(DayOfWeek::Mon),
            "tue" => Some(DayOfWeek::Tue),
            "wed" => Some(DayOfWeek::Wed),
            "thu" => Some(DayOfWeek::Thu),
            "fri" => Some(DayOfWeek::Fri),
            "sat" => Some(DayOfWeek::Sat),
            "sun" => Some(DayOfWeek::Sun),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DayOfWeek::Mon => "Mon",
            DayOfWeek::Tue => "Tue",
            DayOfWeek::Wed => "Wed",
            DayOfWeek::Thu => "Thu",
            DayOfWeek::Fri => "Fri",
            DayOfWeek::Sat => "Sat",
            DayOfWeek::Sun => "Sun",
        }
    }
}

// Hand-written so TOML table keys and JSON keys both accept "Mon" and "Monday"
impl Serialize for DayOfWeek {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for DayOfWeek {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        DayOfWeek::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown day of week '{}'", raw)))
    }
}

impl std::fmt::Display for DayOfWeek {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Observed files
// ============================================================================

/// Processing status of an ingested file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Ok,
    Failed,
    Duplicate,
}

impl FileStatus {
    pub fn is_flagged(&self) -> bool {
        matches!(self, FileStatus::Failed | FileStatus::Duplicate)
    }
}

/// One ingested artifact for a date
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedFile {
    pub source_id: String,
    /// Entity the file belongs to; attributed from the CV when the store does not know it
    #[serde(default)]
    pub entity_id: Option<String>,
    pub file_name: String,
    pub rows: u64,
    pub arrived_at: DateTime<Utc>,
    pub status: FileStatus,
}

impl ObservedFile {
    pub fn new(
        source_id: &str,
        entity_id: Option<&str>,
        file_name: &str,
        rows: u64,
        arrived_at: DateTime<Utc>,
        status: FileStatus,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            entity_id: entity_id.map(str::to_string),
            file_name: file_name.to_string(),
            rows,
            arrived_at,
            status,
        }
    }

    pub fn belongs_to(&self, entity_id: &str) -> bool {
        self.entity_id.as_deref() == Some(entity_id)
    }
}

// ============================================================================
// Incidents
// ============================================================================

/// Identifies the detector that produced an incident
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorId {
    MissingFile,
    UnexpectedEmptyFile,
    UnexpectedVolumeVariation,
    LateUpload,
    DuplicatedFailedFile,
    /// A detector failed on malformed input
    DetectorError,
}

impl DetectorId {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectorId::MissingFile => "missing_file",
            DetectorId::UnexpectedEmptyFile => "unexpected_empty_file",
            DetectorId::UnexpectedVolumeVariation => "unexpected_volume_variation",
            DetectorId::LateUpload => "late_upload",
            DetectorId::DuplicatedFailedFile => "duplicated_failed_file",
            DetectorId::DetectorError => "detector_error",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DetectorId::MissingFile => "Missing File",
            DetectorId::UnexpectedEmptyFile => "Unexpected Empty File",
            DetectorId::UnexpectedVolumeVariation => "Unexpected Volume Variation",
            DetectorId::LateUpload => "File Upload After Schedule",
            DetectorId::DuplicatedFailedFile => "Duplicated/Failed File",
            DetectorId::DetectorError => "Detector Error",
        }
    }
}

impl std::fmt::Display for DetectorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Human-readable summary plus the raw numbers behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncidentEvidence {
    pub summary: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// One detected anomaly instance. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub detector: DetectorId,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    pub severity: Severity,
    pub evidence: IncidentEvidence,
    pub recommendation: String,
}

impl Incident {
    pub fn new(
        detector: DetectorId,
        source_id: &str,
        severity: Severity,
        summary: String,
        data: serde_json::Value,
        recommendation: &str,
    ) -> Self {
        Self {
            detector,
            source_id: source_id.to_string(),
            entity_id: None,
            file_name: None,
            severity,
            evidence: IncidentEvidence { summary, data },
            recommendation: recommendation.to_string(),
        }
    }

    pub fn with_entity(mut self, entity_id: &str) -> Self {
        self.entity_id = Some(entity_id.to_string());
        self
    }

    pub fn with_file(mut self, file_name: &str) -> Self {
        self.file_name = Some(file_name.to_string());
        self
    }
}

// ============================================================================
// Verdicts
// ============================================================================

/// Logged decision to lower a source's consolidated severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityOverride {
    pub from: Severity,
    pub to: Severity,
    pub justification: String,
    /// Trace step that carried the override action
    pub trace_step: usize,
}

/// Kind of informational note attached to a verdict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteKind {
    /// File stamped with a date from an earlier period
    PreviousPeriodFile,
}

/// Informational finding about one file. Notes never change a verdict's severity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictNote {
    pub kind: NoteKind,
    pub file_name: String,
    pub summary: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Resolved outcome for one source in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceVerdict {
    pub source_id: String,
    pub status: SourceStatus,
    /// Consolidated worst-case severity of the gathered incidents, if any evidence exists
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    pub incidents: Vec<Incident>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<VerdictNote>,
    #[serde(default)]
    pub processed_files: usize,
    #[serde(default)]
    pub total_rows: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
    #[serde(default, rename = "override", skip_serializing_if = "Option::is_none")]
    pub severity_override: Option<SeverityOverride>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inconclusive_reason: Option<String>,
}

impl SourceVerdict {
    /// Source without a CV: excluded from evaluation, explicitly marked
    pub fn unconfigured(source_id: &str, processed_files: usize, total_rows: u64) -> Self {
        Self {
            source_id: source_id.to_string(),
            status: SourceStatus::Unconfigured,
            severity: None,
            incidents: Vec::new(),
            notes: Vec::new(),
            processed_files,
            total_rows,
            narrative: None,
            severity_override: None,
            inconclusive_reason: Some("no CV configured for this source".to_string()),
        }
    }

    /// Turn a verdict into an inconclusive one, keeping the evidence gathered so far
    pub fn into_inconclusive(mut self, reason: &str) -> Self {
        self.status = SourceStatus::Inconclusive;
        self.inconclusive_reason = Some(reason.to_string());
        self
    }

    /// Severity that counts toward the global status, including provisional evidence
    pub fn effective_severity(&self) -> Option<Severity> {
        match self.status {
            SourceStatus::AllGood => Some(Severity::AllGood),
            SourceStatus::NeedsAttention => Some(Severity::NeedsAttention),
            SourceStatus::Urgent => Some(Severity::Urgent),
            SourceStatus::Inconclusive => self.severity,
            SourceStatus::Unconfigured => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(
            self.status,
            SourceStatus::Inconclusive | SourceStatus::Unconfigured
        )
    }
}
