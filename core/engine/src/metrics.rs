//! Running aggregate maintained by the fusion engine.
//!
//! Distance and active time advance only between consecutive accepted points
//! of the same active segment. `begin_segment` drops the reference point, so a
//! pause never contributes time or distance.

use runtrack_protocol::{MotionSample, RawPoint, RunningMetrics};

use crate::geo::{distance_between, pace_from_speed};

#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    distance_m: f64,
    elapsed_s: f64,
    anchor: Option<RawPoint>,
    last_point: Option<RawPoint>,
    cadence_sum: f64,
    cadence_samples: u64,
    max_cadence: f64,
    current_pace: Option<f64>,
    fastest_pace: Option<f64>,
    fastest_point: Option<RawPoint>,
    steps_before_segment: u64,
    segment_steps: u64,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_segment(&mut self) {
        self.anchor = None;
        self.current_pace = None;
        self.steps_before_segment = self.steps_before_segment.saturating_add(self.segment_steps);
        self.segment_steps = 0;
    }

    pub fn last_point(&self) -> Option<&RawPoint> {
        self.last_point.as_ref()
    }

    pub fn record_point(&mut self, point: RawPoint) {
        if let Some(anchor) = self.anchor {
            self.distance_m += distance_between(&anchor, &point);
            let delta_ms = point
                .timestamp
                .signed_duration_since(anchor.timestamp)
                .num_milliseconds()
                .max(0);
            self.elapsed_s += delta_ms as f64 / 1000.0;
        }
        self.anchor = Some(point);
        self.last_point = Some(point);
        self.current_pace = pace_from_speed(point.speed);
        if let Some(pace) = self.current_pace {
            self.record_pace(pace, Some(point));
        }
    }

    pub fn record_motion(&mut self, sample: &MotionSample) {
        if let Some(cadence) = sample.cadence() {
            self.cadence_sum += cadence;
            self.cadence_samples += 1;
            if cadence > self.max_cadence {
                self.max_cadence = cadence;
            }
        }
        if let Some(pace) = sample.speed().and_then(pace_from_speed) {
            self.current_pace = Some(pace);
            self.record_pace(pace, self.last_point);
        }
        // Adapters restart their counters on resume; never go backwards within a segment.
        self.segment_steps = self.segment_steps.max(sample.steps);
    }

    fn record_pace(&mut self, pace: f64, at: Option<RawPoint>) {
        let faster = self.fastest_pace.map(|best| pace < best).unwrap_or(true);
        if faster {
            self.fastest_pace = Some(pace);
            self.fastest_point = at;
        }
    }

    pub fn distance_meters(&self) -> f64 {
        self.distance_m
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_s
    }

    pub fn avg_pace_sec_per_km(&self) -> Option<f64> {
        if self.distance_m > 0.0 {
            Some(self.elapsed_s / (self.distance_m / 1000.0))
        } else {
            None
        }
    }

    pub fn snapshot(&self) -> RunningMetrics {
        let avg_cadence = if self.cadence_samples == 0 {
            0.0
        } else {
            self.cadence_sum / self.cadence_samples as f64
        };
        RunningMetrics {
            distance_meters: self.distance_m,
            elapsed_seconds: self.elapsed_s,
            avg_pace_sec_per_km: self.avg_pace_sec_per_km(),
            current_pace_sec_per_km: self.current_pace,
            avg_cadence_spm: avg_cadence,
            max_cadence_spm: self.max_cadence,
            fastest_pace_sec_per_km: self.fastest_pace,
            fastest_pace_point: self.fastest_point,
            total_steps: self.steps_before_segment.saturating_add(self.segment_steps),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::meters_to_latitude_degrees;
    use chrono::{Duration, TimeZone, Utc};

    fn point(index: i64, meters_north: f64, speed: f64) -> RawPoint {
        RawPoint {
            timestamp: Utc.timestamp_opt(1_767_225_600, 0).unwrap() + Duration::seconds(index * 5),
            latitude: 37.5 + meters_to_latitude_degrees(meters_north),
            longitude: 127.0,
            altitude: 20.0,
            speed,
        }
    }

    fn motion(steps: u64, cadence: f64, pace_sec_per_meter: Option<f64>) -> MotionSample {
        MotionSample {
            steps,
            distance: None,
            elapsed_seconds: 60.0,
            average_pace_sec_per_meter: pace_sec_per_meter,
            cadence_spm: Some(cadence),
        }
    }

    #[test]
    fn first_point_sets_reference_only() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_point(point(0, 0.0, 3.0));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.distance_meters, 0.0);
        assert_eq!(snapshot.elapsed_seconds, 0.0);
        assert_eq!(snapshot.avg_pace_sec_per_km, None);
    }

    #[test]
    fn accumulates_pairwise_distance_and_time() {
        let mut metrics = MetricsAccumulator::new();
        for index in 0..5 {
            metrics.record_point(point(index, index as f64 * 50.0, 10.0));
        }
        let snapshot = metrics.snapshot();
        assert!((snapshot.distance_meters - 200.0).abs() < 1e-6);
        assert!((snapshot.elapsed_seconds - 20.0).abs() < 1e-9);
        let pace = snapshot.avg_pace_sec_per_km.expect("pace");
        assert!((pace - 100.0).abs() < 1e-6);
    }

    #[test]
    fn new_segment_does_not_bridge_the_gap() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_point(point(0, 0.0, 3.0));
        metrics.record_point(point(1, 50.0, 3.0));
        metrics.begin_segment();
        // 12 intervals later and 500 m away; the runner walked during the pause.
        metrics.record_point(point(13, 550.0, 3.0));
        metrics.record_point(point(14, 600.0, 3.0));

        let snapshot = metrics.snapshot();
        assert!((snapshot.distance_meters - 100.0).abs() < 1e-6);
        assert!((snapshot.elapsed_seconds - 10.0).abs() < 1e-9);
    }

    #[test]
    fn cadence_is_running_mean_and_max() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_motion(&motion(100, 160.0, None));
        metrics.record_motion(&motion(200, 180.0, None));
        metrics.record_motion(&motion(300, 170.0, None));
        let snapshot = metrics.snapshot();
        assert!((snapshot.avg_cadence_spm - 170.0).abs() < 1e-9);
        assert_eq!(snapshot.max_cadence_spm, 180.0);
        assert_eq!(snapshot.total_steps, 300);
    }

    #[test]
    fn fastest_pace_tracks_minimum_and_location() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_point(point(0, 0.0, 2.5));
        metrics.record_point(point(1, 50.0, 5.0));
        metrics.record_point(point(2, 100.0, 4.0));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fastest_pace_sec_per_km, Some(200.0));
        assert_eq!(snapshot.fastest_pace_point, Some(point(1, 50.0, 5.0)));
        assert_eq!(snapshot.current_pace_sec_per_km, Some(250.0));
    }

    #[test]
    fn motion_pace_uses_latest_point_for_location() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_point(point(0, 0.0, -1.0));
        // 0.2 s/m == 5 m/s == 200 s/km
        metrics.record_motion(&motion(10, 170.0, Some(0.2)));
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.fastest_pace_sec_per_km, Some(200.0));
        assert_eq!(snapshot.fastest_pace_point, Some(point(0, 0.0, -1.0)));
    }

    #[test]
    fn steps_carry_across_segments() {
        let mut metrics = MetricsAccumulator::new();
        metrics.record_motion(&motion(400, 170.0, None));
        metrics.begin_segment();
        metrics.record_motion(&motion(150, 170.0, None));
        assert_eq!(metrics.snapshot().total_steps, 550);
    }
}
