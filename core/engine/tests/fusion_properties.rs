//! Property checks over synthetic fix sequences.

mod common;

use chrono::Duration as ChronoDuration;
use common::{base_time, fix_with_accuracy};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use runtrack_engine::geo::distance_between;
use runtrack_engine::protocol::RawPoint;
use runtrack_engine::{FusionEngine, FusionOutput, SensorEvent};

const RUNS: u64 = 64;

#[test]
fn distance_is_monotonic_sum_of_accepted_deltas() {
    for seed in 0..RUNS {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut engine = FusionEngine::new(40.0);
        let mut accepted: Vec<RawPoint> = Vec::new();
        let mut previous_distance = 0.0;
        let mut seconds = 0;
        let mut meters = 0.0;

        for _ in 0..rng.gen_range(2..120) {
            seconds += rng.gen_range(1..8);
            meters += rng.gen_range(-5.0..25.0);
            let accuracy = if rng.gen_bool(0.2) {
                rng.gen_range(40.5..120.0)
            } else {
                rng.gen_range(0.0..40.0)
            };
            let mut fix = fix_with_accuracy(seconds, meters, accuracy);
            fix.longitude += rng.gen_range(-0.0002..0.0002);

            match engine.apply(&SensorEvent::Location(fix), base_time()) {
                FusionOutput::Snapshot { snapshot, point } => {
                    let point = point.expect("accepted fix carries a point");
                    accepted.push(point);
                    assert!(snapshot.distance_meters() >= previous_distance);
                    previous_distance = snapshot.distance_meters();
                }
                FusionOutput::Rejected(_) => {
                    assert!(accuracy > 40.0, "seed {seed}: rejected accurate fix");
                }
            }
        }

        let expected: f64 = accepted
            .windows(2)
            .map(|pair| distance_between(&pair[0], &pair[1]))
            .sum();
        let actual = engine.metrics().distance_meters;
        assert!(
            (actual - expected).abs() < 1e-6,
            "seed {seed}: expected {expected}, got {actual}"
        );

        let span = match (accepted.first(), accepted.last()) {
            (Some(first), Some(last)) => (last.timestamp - first.timestamp).num_milliseconds(),
            _ => 0,
        };
        assert_eq!(
            engine.metrics().elapsed_seconds,
            span as f64 / 1000.0,
            "seed {seed}"
        );
    }
}

#[test]
fn segments_exclude_gaps_from_elapsed_time() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut engine = FusionEngine::new(40.0);
    let mut active_ms = 0;
    let mut seconds = 0;

    for segment in 0..4 {
        if segment > 0 {
            engine.begin_segment();
            seconds += rng.gen_range(30..600);
        }
        let mut segment_start = None;
        for _ in 0..rng.gen_range(1..20) {
            seconds += rng.gen_range(1..6);
            engine.apply(
                &SensorEvent::Location(fix_with_accuracy(seconds, seconds as f64 * 3.0, 5.0)),
                base_time(),
            );
            segment_start.get_or_insert(seconds);
        }
        if let Some(start) = segment_start {
            active_ms += ChronoDuration::seconds(seconds - start).num_milliseconds();
        }
    }

    assert_eq!(engine.metrics().elapsed_seconds, active_ms as f64 / 1000.0);
}
