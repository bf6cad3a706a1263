use super::{ensure_owned, Detector};
use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, Incident, ObservedFile, Severity};
use serde_json::json;
use tracing::debug;

/// Required entity (or minimum file count) not delivered
pub struct MissingFileDetector;

impl Detector for MissingFileDetector {
    fn id(&self) -> DetectorId {
        DetectorId::MissingFile
    }

    fn detect(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError> {
        ensure_owned(profile, files)?;

        if let Some(exception) = ctx.exception_for(&profile.source_id) {
            debug!(
                "Missing-file check skipped for {}: {}",
                profile.source_id, exception.reason
            );
            return Ok(Vec::new());
        }

        let day = ctx.weekday();
        let mut incidents = Vec::new();

        for entity in profile.required_entities(day) {
            let delivered = files.iter().filter(|f| f.belongs_to(&entity.entity_id)).count();
            if delivered == 0 {
                incidents.push(
                    Incident::new(
                        DetectorId::MissingFile,
                        &profile.source_id,
                        Severity::Urgent,
                        format!(
                            "Expected files for entity '{}' on {} but none were received.",
                            entity.entity_id, day
                        ),
                        json!({ "entity": entity.entity_id, "weekday": day.as_str(), "found": 0 }),
                        &format!(
                            "Verify that '{}' generated its files today and request re-delivery.",
                            entity.entity_id
                        ),
                    )
                    .with_entity(&entity.entity_id),
                );
            }
        }

        // Count-based check only when no entity-level gap explains the shortfall
        if incidents.is_empty() {
            if let Some(expected) = profile.expected_files(day) {
                let found = files.len();
                if found < expected.min as usize {
                    incidents.push(Incident::new(
                        DetectorId::MissingFile,
                        &profile.source_id,
                        Severity::Urgent,
                        format!(
                            "Expected at least {} file(s) on {}, but found {}.",
                            expected.min, day, found
                        ),
                        json!({ "expected_min": expected.min, "found": found, "weekday": day.as_str() }),
                        "Contact the provider to confirm generation and request immediate re-delivery.",
                    ));
                }
            }
        }

        Ok(incidents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::{EntityExpectation, FileCountExpectation};
    use crate::model::{DayOfWeek, FileStatus};
    use chrono::{NaiveDate, TimeZone, Utc};
    use std::collections::BTreeSet;

    fn tuesday() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
    }

    fn profile_with(entities: &[(&str, Option<&[DayOfWeek]>)]) -> SourceProfile {
        let mut profile = SourceProfile::new("BankX");
        for (id, days) in entities {
            profile.entities.push(EntityExpectation {
                entity_id: id.to_string(),
                required_on: days.map(|d| d.iter().copied().collect::<BTreeSet<_>>()),
                volume_baseline: Default::default(),
            });
        }
        profile
    }

    fn file(entity: &str) -> ObservedFile {
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 7, 50, 0).unwrap();
        ObservedFile::new("BankX", Some(entity), &format!("x_{}_.csv", entity), 10, at, FileStatus::Ok)
    }

    #[test]
    fn test_one_incident_per_missing_entity() {
        let profile = profile_with(&[("a", None), ("b", None), ("c", None)]);
        let incidents = MissingFileDetector
            .detect(&tuesday(), &profile, &[file("b")])
            .unwrap();

        let entities: Vec<_> = incidents.iter().filter_map(|i| i.entity_id.as_deref()).collect();
        assert_eq!(entities, vec!["a", "c"]);
        assert!(incidents.iter().all(|i| i.severity == Severity::Urgent));
    }

    #[test]
    fn test_entity_not_required_today() {
        let profile = profile_with(&[("weekly", Some(&[DayOfWeek::Mon]))]);
        let incidents = MissingFileDetector.detect(&tuesday(), &profile, &[]).unwrap();
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_failed_file_still_counts_as_delivered() {
        let profile = profile_with(&[("a", None)]);
        let mut failed = file("a");
        failed.status = FileStatus::Failed;
        let incidents = MissingFileDetector.detect(&tuesday(), &profile, &[failed]).unwrap();
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_exception_suppresses() {
        let profile = profile_with(&[("a", None)]);
        let mut ctx = tuesday();
        ctx.approve_exception("BankX", "holiday");
        assert!(MissingFileDetector.detect(&ctx, &profile, &[]).unwrap().is_empty());
    }

    #[test]
    fn test_minimum_file_count() {
        let mut profile = SourceProfile::new("BankX");
        profile
            .expected_files
            .insert(DayOfWeek::Tue, FileCountExpectation { min: 2, max: 3 });

        let incidents = MissingFileDetector.detect(&tuesday(), &profile, &[file("x")]).unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].entity_id, None);
        assert_eq!(incidents[0].evidence.data["found"], 1);
    }
}
