use super::{ensure_owned, Detector};
use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, Incident, ObservedFile, Severity};
use chrono::{Duration, TimeZone, Utc};
use serde_json::json;

/// File arrived outside the CV upload window plus tolerance
pub struct LateUploadDetector;

impl Detector for LateUploadDetector {
    fn id(&self) -> DetectorId {
        DetectorId::LateUpload
    }

    fn detect(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError> {
        ensure_owned(profile, files)?;

        let day = ctx.weekday();
        let Some(window) = profile.window(day) else {
            return Ok(Vec::new());
        };
        if window.start > window.end {
            return Err(DetectorError::InvertedWindow {
                weekday: day.to_string(),
                start: window.start.to_string(),
                end: window.end.to_string(),
            });
        }

        let tolerance = Duration::minutes(profile.late_tolerance_minutes().max(0));
        let opens = Utc.from_utc_datetime(&ctx.date.and_time(window.start)) - tolerance;
        let closes = Utc.from_utc_datetime(&ctx.date.and_time(window.end)) + tolerance;

        let mut incidents = Vec::new();
        for f in files {
            let (direction, offset) = if f.arrived_at > closes {
                ("after", f.arrived_at - closes)
            } else if f.arrived_at < opens {
                ("before", opens - f.arrived_at)
            } else {
                continue;
            };

            let incident = Incident::new(
                DetectorId::LateUpload,
                &profile.source_id,
                Severity::NeedsAttention,
                format!(
                    "File '{}' arrived at {} UTC, {} minutes {} the expected window {}-{} (tolerance {} min).",
                    f.file_name,
                    f.arrived_at.format("%H:%M:%S"),
                    offset.num_minutes(),
                    direction,
                    window.start.format("%H:%M"),
                    window.end.format("%H:%M"),
                    tolerance.num_minutes()
                ),
                json!({
                    "file": f.file_name,
                    "arrived_at": f.arrived_at.to_rfc3339(),
                    "window_start": window.start.format("%H:%M:%S").to_string(),
                    "window_end": window.end.format("%H:%M:%S").to_string(),
                    "tolerance_minutes": tolerance.num_minutes(),
                    "minutes_outside": offset.num_minutes(),
                    "direction": direction,
                }),
                "Review the provider's delivery schedule; repeated drift usually means the CV window needs updating.",
            )
            .with_file(&f.file_name);
            incidents.push(match &f.entity_id {
                Some(entity) => incident.with_entity(entity),
                None => incident,
            });
        }
        Ok(incidents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cv::UploadWindow;
    use crate::model::{DayOfWeek, FileStatus};
    use chrono::{NaiveDate, NaiveTime};

    fn tuesday() -> RunContext {
        RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
    }

    fn profile(start: (u32, u32), end: (u32, u32), tolerance: i64) -> SourceProfile {
        let mut profile = SourceProfile::new("BankX");
        profile.upload_windows.insert(
            DayOfWeek::Tue,
            UploadWindow {
                start: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
                end: NaiveTime::from_hms_opt(end.0, end.1, 0).unwrap(),
            },
        );
        profile.late_tolerance_minutes = Some(tolerance);
        profile
    }

    fn file_at(h: u32, m: u32) -> ObservedFile {
        let at = Utc.with_ymd_and_hms(2025, 9, 9, h, m, 0).unwrap();
        ObservedFile::new("BankX", None, &format!("f_{:02}{:02}.csv", h, m), 10, at, FileStatus::Ok)
    }

    #[test]
    fn test_inside_tolerance_is_fine() {
        let incidents = LateUploadDetector
            .detect(&tuesday(), &profile((7, 0), (8, 0), 30), &[file_at(8, 30), file_at(6, 30)])
            .unwrap();
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_late_and_early_files() {
        let incidents = LateUploadDetector
            .detect(&tuesday(), &profile((7, 0), (8, 0), 30), &[file_at(8, 31), file_at(6, 0)])
            .unwrap();
        assert_eq!(incidents.len(), 2);
        assert_eq!(incidents[0].evidence.data["direction"], "after");
        assert_eq!(incidents[0].evidence.data["minutes_outside"], 1);
        assert_eq!(incidents[1].evidence.data["direction"], "before");
        assert!(incidents.iter().all(|i| i.severity == Severity::NeedsAttention));
    }

    #[test]
    fn test_no_window_for_day() {
        let mut p = profile((7, 0), (8, 0), 0);
        p.upload_windows.clear();
        let incidents = LateUploadDetector.detect(&tuesday(), &p, &[file_at(23, 0)]).unwrap();
        assert!(incidents.is_empty());
    }

    #[test]
    fn test_inverted_window_rejected() {
        let result = LateUploadDetector.detect(&tuesday(), &profile((9, 0), (8, 0), 0), &[]);
        assert!(matches!(result, Err(DetectorError::InvertedWindow { .. })));
    }
}
