use super::{ensure_owned, Detector};
use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, FileStatus, Incident, ObservedFile, Severity};
use serde_json::json;

/// File count above this multiple of the CV maximum is a surge
const FILE_COUNT_SURGE_FACTOR: f64 = 1.5;

/// Row totals outside the CV baseline by more than the threshold
pub struct UnexpectedVolumeVariationDetector;

/// Percentage deviation of `observed` from a non-zero `baseline`
pub fn deviation_pct(observed: u64, baseline: u64) -> f64 {
    (observed as f64 - baseline as f64).abs() / baseline as f64 * 100.0
}

impl Detector for UnexpectedVolumeVariationDetector {
    fn id(&self) -> DetectorId {
        DetectorId::UnexpectedVolumeVariation
    }

    fn detect(
        &self,
        ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError> {
        ensure_owned(profile, files)?;

        let threshold = profile.volume_threshold_pct();
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(DetectorError::Malformed(format!(
                "volume threshold {} is not a valid percentage",
                threshold
            )));
        }

        let day = ctx.weekday();
        let processed: Vec<&ObservedFile> = files.iter().filter(|f| f.status == FileStatus::Ok).collect();
        let mut incidents = Vec::new();

        for entity in &profile.entities {
            let Some(baseline) = entity.volume_baseline.get(&day).copied() else {
                continue;
            };
            let observed: u64 = processed
                .iter()
                .filter(|f| f.belongs_to(&entity.entity_id))
                .map(|f| f.rows)
                .sum();
            if let Some(incident) = check(profile, Some(&entity.entity_id), observed, baseline, threshold) {
                incidents.push(incident);
            }
        }

        if let Some(baseline) = profile.source_baseline(day) {
            let observed: u64 = processed.iter().map(|f| f.rows).sum();
            if let Some(incident) = check(profile, None, observed, baseline, threshold) {
                incidents.push(incident);
            }
        }

        if let Some(expected) = profile.expected_files(day) {
            let limit = expected.max as f64 * FILE_COUNT_SURGE_FACTOR;
            if expected.max > 0 && files.len() as f64 > limit {
                incidents.push(Incident::new(
                    DetectorId::UnexpectedVolumeVariation,
                    &profile.source_id,
                    Severity::NeedsAttention,
                    format!(
                        "Received {} files on {}, well above the usual maximum of {}.",
                        files.len(),
                        day,
                        expected.max
                    ),
                    json!({ "files": files.len(), "expected_max": expected.max, "weekday": day.as_str() }),
                    "Check for re-sent or split deliveries before they are loaded twice.",
                ));
            }
        }

        Ok(incidents)
    }
}

fn check(
    profile: &SourceProfile,
    entity_id: Option<&str>,
    observed: u64,
    baseline: u64,
    threshold: f64,
) -> Option<Incident> {
    // Nothing to compare against, or nothing processed (missing/empty detectors own that)
    if baseline == 0 || observed == 0 {
        return None;
    }

    let deviation = deviation_pct(observed, baseline);
    if deviation <= threshold {
        return None;
    }

    let scope = match entity_id {
        Some(entity) => format!("Entity '{}'", entity),
        None => "Source".to_string(),
    };
    let direction = if observed < baseline { "below" } else { "above" };
    let incident = Incident::new(
        DetectorId::UnexpectedVolumeVariation,
        &profile.source_id,
        Severity::NeedsAttention,
        format!(
            "{} processed {} rows, {:.1}% {} the baseline of {}.",
            scope, observed, deviation, direction, baseline
        ),
        json!({
            "observed_rows": observed,
            "baseline_rows": baseline,
            "deviation_pct": (deviation * 10.0).round() / 10.0,
            "threshold_pct": threshold,
        }),
        "Compare the delivery against the provider's activity for the day; partial extracts are the usual cause.",
    );
    Some(match entity_id {
        Some(entity) => incident.with_entity(entity),
        None => incident,
    })
}
