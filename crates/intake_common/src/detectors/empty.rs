use super::{ensure_owned, Detector};
use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, Incident, ObservedFile, Severity};
use serde_json::json;

/// Zero-row file on a day the CV does not tolerate empties
pub struct UnexpectedEmptyFileDetector;

impl Detector for UnexpectedEmptyFileDetector {
    fn id(&self) -> DetectorId {
        DetectorId::UnexpectedEmptyFile
    }

    fn detect(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError> {
        ensure_owned(profile, files)?;

        let day = ctx.weekday();
        if profile.empties_allowed(day) {
            return Ok(Vec::new());
        }

        Ok(files
            .iter()
            .filter(|f| f.rows == 0)
            .map(|f| {
                let incident = Incident::new(
                    DetectorId::UnexpectedEmptyFile,
                    &profile.source_id,
                    Severity::Urgent,
                    format!("File '{}' arrived with 0 rows; empty files are not expected on {}.", f.file_name, day),
                    json!({ "file": f.file_name, "rows": 0, "status": f.status, "weekday": day.as_str() }),
                    "Confirm with the provider whether the extract ran correctly and request a corrected file.",
                )
                .with_file(&f.file_name);
                match &f.entity_id {
                    Some(entity) => incident.with_entity(entity),
                    None => incident,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DayOfWeek, FileStatus};
    use chrono::{NaiveDate, TimeZone, Utc};

    fn tuesday() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
    }

    fn file(name: &str, rows: u64) -> ObservedFile {
        let at = Utc.with_ymd_and_hms(2025, 9, 9, 9, 0, 0).unwrap();
        ObservedFile::new("Uber", None, name, rows, at, FileStatus::Ok)
    }

    #[test]
    fn test_one_incident_per_empty_file() {
        let profile = SourceProfile::new("Uber");
        let files = vec![file("a.csv", 0), file("b.csv", 12), file("c.csv", 0)];
        let incidents = UnexpectedEmptyFileDetector.detect(&tuesday(), &profile, &files).unwrap();

        let names: Vec<_> = incidents.iter().filter_map(|i| i.file_name.as_deref()).collect();
        assert_eq!(names, vec!["a.csv", "c.csv"]);
        assert!(incidents.iter().all(|i| i.severity == Severity::Urgent));
    }

    #[test]
    fn test_empty_allowed_on_weekday() {
        let mut profile = SourceProfile::new("Uber");
        profile.empty_allowed_on.insert(DayOfWeek::Tue);
        let incidents = UnexpectedEmptyFileDetector
            .detect(&tuesday(), &profile, &[file("a.csv", 0)])
            .unwrap();
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_allow_empty_everywhere() {
        let mut profile = SourceProfile::new("Uber");
        profile.allow_empty = true;
        let incidents = UnexpectedEmptyFileDetector
            .detect(&tuesday(), &profile, &[file("a.csv", 0)])
            .unwrap();
        assert!(incidents.is_empty());
    }
}
