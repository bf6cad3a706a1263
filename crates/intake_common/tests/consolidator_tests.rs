//! Consolidation properties: order independence and worst-case precedence.

use chrono::NaiveDate;
use intake_common::consolidator;
use intake_common::model::RunStatus;
use intake_common::report::{global_status, RunFlags};
use intake_common::{DetectorId, Incident, RunContext, Severity, SourceStatus};
use serde_json::json;

struct TestRng {
    state: u64,
}

impl TestRng {
    fn new(seed: u64) -> Self {
        Self { state: if seed == 0 { 1 } else { seed } }
    }

    fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }

    fn next_range(&mut self, min: u64, max: u64) -> u64 {
        if max <= min { return min; }
        min + (self.next_u64() % (max - min))
    }

    /// Fisher-Yates
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_range(0, i as u64 + 1) as usize;
            items.swap(i, j);
        }
    }
}

const DETECTORS: [DetectorId; 6] = [
    DetectorId::MissingFile,
    DetectorId::UnexpectedEmptyFile,
    DetectorId::UnexpectedVolumeVariation,
    DetectorId::LateUpload,
    DetectorId::DuplicatedFailedFile,
    DetectorId::DetectorError,
];

fn random_incidents(rng: &mut TestRng) -> Vec<Incident> {
    (0..rng.next_range(0, 10))
        .map(|i| {
            let detector = DETECTORS[rng.next_range(0, DETECTORS.len() as u64) as usize];
            let severity = if rng.next_range(0, 3) == 0 {
                Severity::Urgent
            } else {
                Severity::NeedsAttention
            };
            let incident = Incident::new(
                detector,
                "S",
                severity,
                format!("finding {}", rng.next_range(0, 4)),
                json!({ "n": i % 3 }),
                "check",
            );
            match rng.next_range(0, 3) {
                0 => incident.with_entity(&format!("e{}", rng.next_range(0, 3))),
                1 => incident.with_file(&format!("f{}.csv", rng.next_range(0, 3))),
                _ => incident,
            }
        })
        .collect()
}

fn ctx() -> RunContext {
    RunContext::new(NaiveDate::from_ymd_opt(2025, 9, 9).unwrap())
}

#[test]
fn test_prop_resolve_is_order_independent() {
    let mut rng = TestRng::new(2025);
    let ctx = ctx();

    for _ in 0..500 {
        let incidents = random_incidents(&mut rng);
        let baseline = consolidator::resolve(&ctx, "S", incidents.clone());

        for _ in 0..5 {
            let mut shuffled = incidents.clone();
            rng.shuffle(&mut shuffled);
            assert_eq!(consolidator::resolve(&ctx, "S", shuffled), baseline);
        }
    }
}

#[test]
fn test_prop_verdict_is_maximum_severity() {
    let mut rng = TestRng::new(11);
    let ctx = ctx();

    for _ in 0..500 {
        let incidents = random_incidents(&mut rng);
        let expected = incidents
            .iter()
            .map(|i| i.severity)
            .max()
            .unwrap_or(Severity::AllGood);
        let count = incidents.len();

        let verdict = consolidator::resolve(&ctx, "S", incidents);
        assert_eq!(verdict.severity, Some(expected));
        assert_eq!(verdict.status, SourceStatus::from(expected));
        // nothing dropped
        assert_eq!(verdict.incidents.len(), count);
    }
}

#[test]
fn test_prop_global_status_respects_ordering() {
    let mut rng = TestRng::new(5);
    let ctx = ctx();

    for _ in 0..200 {
        let verdicts: Vec<_> = (0..rng.next_range(1, 5))
            .map(|i| consolidator::resolve(&ctx, &format!("S{}", i), random_incidents(&mut rng)))
            .collect();
        let worst = verdicts.iter().filter_map(|v| v.severity).max().unwrap();

        let status = global_status(&verdicts, &RunFlags::default());
        assert_eq!(status, RunStatus::from(worst));
    }
}
