//! Deterministic detector set.
//!
//! Each detector is a pure function of `(RunContext, SourceProfile, files)`:
//! no IO, no clock, no randomness. Running a detector twice on the same input
//! yields the same incidents in the same order.
//!
//! A detector that rejects its input does not abort the evaluation. The
//! failure is recorded as a `detector_error` incident so it stays visible.

mod duplicate;
mod empty;
mod late;
mod missing;
mod previous;
mod volume;

pub use duplicate::DuplicatedFailedFileDetector;
pub use empty::UnexpectedEmptyFileDetector;
pub use late::LateUploadDetector;
pub use missing::MissingFileDetector;
pub use previous::{previous_period_notes, stamped_date, PREVIOUS_PERIOD_GRACE_DAYS};
pub use volume::UnexpectedVolumeVariationDetector;

use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, Incident, ObservedFile, Severity};
use serde_json::json;
use tracing::{debug, warn};

/// One anomaly category
pub trait Detector: Send + Sync {
    fn id(&self) -> DetectorId;

    fn detect(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError>;
}

/// Ordered collection of detectors run against one source
pub struct DetectorSet {
    detectors: Vec<Box<dyn Detector>>,
}

impl DetectorSet {
    /// All five detectors in their canonical order
    pub fn standard() -> Self {
        Self {
            detectors: vec![
                Box::new(MissingFileDetector),
                Box::new(UnexpectedEmptyFileDetector),
                Box::new(UnexpectedVolumeVariationDetector),
                Box::new(LateUploadDetector),
                Box::new(DuplicatedFailedFileDetector),
            ],
        }
    }

    pub fn with_detectors(detectors: Vec<Box<dyn Detector>>) -> Self {
        Self { detectors }
    }

    pub fn ids(&self) -> Vec<DetectorId> {
        self.detectors.iter().map(|d| d.id()).collect()
    }

    /// Run every detector over one source's files for the run date
    pub fn evaluate(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Vec<Incident> {
        let mut ordered = files.to_vec();
        ordered.sort_by(|a, b| {
            a.arrived_at
                .cmp(&b.arrived_at)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        let mut incidents = Vec::new();
        for detector in &self.detectors {
            match detector.detect(ctx, profile, &ordered) {
                Ok(found) => {
                    debug!(
                        "{} on {}: {} incident(s)",
                        detector.id(),
                        profile.source_id,
                        found.len()
                    );
                    incidents.extend(found);
                }
                Err(e) => {
                    warn!(
                        "[!]  Detector {} failed on {}: {}",
                        detector.id(),
                        profile.source_id,
                        e
                    );
                    incidents.push(detector_error_incident(detector.id(), &profile.source_id, &e));
                }
            }
        }
        incidents
    }
}

impl Default for DetectorSet {
    fn default() -> Self {
        Self::standard()
    }
}

fn detector_error_incident(failed: DetectorId, source_id: &str, error: &DetectorError) -> Incident {
    Incident::new(
        DetectorId::DetectorError,
        source_id,
        Severity::NeedsAttention,
        format!("Detector {} could not evaluate this source: {}", failed, error),
        json!({ "failed_detector": failed.as_str(), "error": error.to_string() }),
        "Inspect the CV and the file metadata for malformed values; the check did not run.",
    )
}

/// Every file handed to a detector must belong to the profile's source
pub(crate) fn ensure_owned(profile: &SourceProfile, files: &[ObservedFile]) -> Result<(), DetectorError> {
    match files.iter().find(|f| f.source_id != profile.source_id) {
        Some(foreign) => Err(DetectorError::ForeignFile {
            file_name: foreign.file_name.clone(),
            expected: profile.source_id.clone(),
            found: foreign.source_id.clone(),
        }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use crate::model::FileStatus;

    struct AlwaysFails;

    impl Detector for AlwaysFails {
        fn id(&self) -> DetectorId {
            DetectorId::LateUpload
        }

        fn detect(
            &self,
            _ctx: &RunContext,
            _profile: &SourceProfile,
            _files: &[ObservedFile],
        ) -> Result<Vec<Incident>, DetectorError> {
            Err(DetectorError::Malformed("bad window".into()))
        }
    }

    fn ctx() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
    }

    #[test]
    fn test_failing_detector_is_isolated() {
        let set = DetectorSet::with_detectors(vec![
            Box::new(AlwaysFails),
            Box::new(MissingFileDetector),
        ]);
        let mut profile = SourceProfile::new("BankX");
        profile.entities.push(crate::cv::EntityExpectation {
            entity_id: "daily".into(),
            required_on: None,
            volume_baseline: Default::default(),
        });

        let incidents = set.evaluate(&ctx(), &profile, &[]);
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].detector, DetectorId::DetectorError);
        assert_eq!(incidents[0].severity, Severity::NeedsAttention);
        assert_eq!(incidents[0].evidence.data["failed_detector"], "late_upload");
        assert_eq!(incidents[1].detector, DetectorId::MissingFile);
    }

    #[test]
    fn test_foreign_file_becomes_detector_error() {
        let profile = SourceProfile::new("BankX");
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 8, 0, 0).unwrap();
        let files = vec![ObservedFile::new("Rappi", None, "r.csv", 5, at, FileStatus::Ok)];

        let incidents = DetectorSet::standard().evaluate(&ctx(), &profile, &files);
        assert!(!incidents.is_empty());
        assert!(incidents.iter().all(|i| i.detector == DetectorId::DetectorError));
        assert!(incidents.iter().all(|i| i.severity <= Severity::NeedsAttention));
    }

    #[test]
    fn test_standard_order() {
        assert_eq!(
            DetectorSet::standard().ids(),
            vec![
                DetectorId::MissingFile,
                DetectorId::UnexpectedEmptyFile,
                DetectorId::UnexpectedVolumeVariation,
                DetectorId::LateUpload,
                DetectorId::DuplicatedFailedFile,
            ]
        );
    }
}
