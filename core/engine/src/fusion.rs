//! Stream fusion.
//!
//! [`FusedStream`] merges the location and motion adapters into one ordered
//! sequence of events, swallowing transient per-event errors and ending with
//! the first fatal one. [`FusionEngine`] filters each event and folds it into
//! the running aggregate, producing at most one snapshot per event. It is
//! owned by a single coordination task, so an emitted snapshot never observes
//! a half-applied update.

use chrono::{DateTime, Utc};
use runtrack_protocol::{MotionSample, RawFix, RawPoint, RunningMetrics, RunningSnapshot};
use tracing::debug;

use crate::error::SensorError;
use crate::metrics::MetricsAccumulator;
use crate::sensors::SensorStream;

#[derive(Debug, Clone, PartialEq)]
pub enum SensorEvent {
    Location(RawFix),
    Motion(MotionSample),
}

#[derive(Debug)]
pub struct FusedStream {
    location: Option<SensorStream<RawFix>>,
    motion: Option<SensorStream<MotionSample>>,
}

enum Polled {
    Location(Option<Result<RawFix, SensorError>>),
    Motion(Option<Result<MotionSample, SensorError>>),
}

async fn next_from<T>(stream: &mut Option<SensorStream<T>>) -> Option<Result<T, SensorError>> {
    match stream {
        Some(stream) => stream.recv().await,
        None => std::future::pending().await,
    }
}

impl FusedStream {
    pub fn new(location: SensorStream<RawFix>, motion: SensorStream<MotionSample>) -> Self {
        Self {
            location: Some(location),
            motion: Some(motion),
        }
    }

    /// Next accepted event in arrival order. Returns `None` once both sources
    /// have ended, and `Some(Err(_))` for the first fatal adapter error.
    pub async fn next(&mut self) -> Option<Result<SensorEvent, SensorError>> {
        loop {
            let polled = tokio::select! {
                item = next_from(&mut self.location), if self.location.is_some() => Polled::Location(item),
                item = next_from(&mut self.motion), if self.motion.is_some() => Polled::Motion(item),
                else => return None,
            };

            let item = match polled {
                Polled::Location(Some(item)) => item.map(SensorEvent::Location),
                Polled::Motion(Some(item)) => item.map(SensorEvent::Motion),
                Polled::Location(None) => {
                    self.location = None;
                    continue;
                }
                Polled::Motion(None) => {
                    self.motion = None;
                    continue;
                }
            };

            match item {
                Ok(event) => return Some(Ok(event)),
                Err(err) if !err.is_fatal() => {
                    debug!(error = %err, "Swallowing transient sensor error");
                }
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    HorizontalAccuracy(f64),
    VerticalAccuracy(f64),
    InvalidCoordinate,
    OutOfOrder,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FusionOutput {
    Snapshot {
        snapshot: RunningSnapshot,
        /// Set when the event contributed a new point to the route.
        point: Option<RawPoint>,
    },
    Rejected(RejectReason),
}

#[derive(Debug, Clone)]
pub struct FusionEngine {
    max_horizontal_accuracy_m: f64,
    metrics: MetricsAccumulator,
    last_emitted_at: Option<DateTime<Utc>>,
}

impl FusionEngine {
    pub fn new(max_horizontal_accuracy_m: f64) -> Self {
        Self {
            max_horizontal_accuracy_m,
            metrics: MetricsAccumulator::new(),
            last_emitted_at: None,
        }
    }

    pub fn reset(&mut self) {
        self.metrics = MetricsAccumulator::new();
        self.last_emitted_at = None;
    }

    pub fn begin_segment(&mut self) {
        self.metrics.begin_segment();
    }

    pub fn metrics(&self) -> RunningMetrics {
        self.metrics.snapshot()
    }

    pub fn last_point(&self) -> Option<RawPoint> {
        self.metrics.last_point().copied()
    }

    pub fn check_fix(&self, fix: &RawFix) -> Result<(), RejectReason> {
        let horizontal = fix.horizontal_accuracy;
        if !(0.0..=self.max_horizontal_accuracy_m).contains(&horizontal) {
            return Err(RejectReason::HorizontalAccuracy(horizontal));
        }
        if fix.vertical_accuracy.is_nan() || fix.vertical_accuracy < 0.0 {
            return Err(RejectReason::VerticalAccuracy(fix.vertical_accuracy));
        }
        let coordinates_valid = fix.latitude.is_finite()
            && fix.longitude.is_finite()
            && (-90.0..=90.0).contains(&fix.latitude)
            && (-180.0..=180.0).contains(&fix.longitude);
        if !coordinates_valid {
            return Err(RejectReason::InvalidCoordinate);
        }
        if let Some(last) = self.metrics.last_point() {
            if fix.timestamp < last.timestamp {
                return Err(RejectReason::OutOfOrder);
            }
        }
        Ok(())
    }

    /// Applies one event. `now` stamps motion samples, which carry no time of
    /// their own; snapshot timestamps never move backwards.
    pub fn apply(&mut self, event: &SensorEvent, now: DateTime<Utc>) -> FusionOutput {
        match event {
            SensorEvent::Location(fix) => {
                if let Err(reason) = self.check_fix(fix) {
                    debug!(reason = ?reason, "Rejected location fix");
                    return FusionOutput::Rejected(reason);
                }
                let point = fix.to_point();
                self.metrics.record_point(point);
                FusionOutput::Snapshot {
                    snapshot: self.emit(point.timestamp),
                    point: Some(point),
                }
            }
            SensorEvent::Motion(sample) => {
                self.metrics.record_motion(sample);
                let stamp = self.last_emitted_at.unwrap_or(now);
                FusionOutput::Snapshot {
                    snapshot: self.emit(stamp),
                    point: None,
                }
            }
        }
    }

    fn emit(&mut self, candidate: DateTime<Utc>) -> RunningSnapshot {
        let recorded_at = match self.last_emitted_at {
            Some(last) if last > candidate => last,
            _ => candidate,
        };
        self.last_emitted_at = Some(recorded_at);
        RunningSnapshot {
            recorded_at,
            metrics: self.metrics.snapshot(),
            last_point: self.metrics.last_point().copied(),
        }
    }
}
