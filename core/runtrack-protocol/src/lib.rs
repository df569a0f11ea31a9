//! Data model and remote-store wire types for runtrack.
//!
//! This crate is shared by the engine and its hosts to prevent schema drift.
//! The engine remains the authority on filtering and validation, but hosts can
//! reuse the same types to record traces and build backend requests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const MAX_SESSION_ID_LEN: usize = 128;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

/// Remote identifier of a running session, issued by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    pub fn parse(value: impl Into<String>) -> Result<Self, ErrorInfo> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(ErrorInfo::new("invalid_session_id", "session_id is required"));
        }
        if value.len() > MAX_SESSION_ID_LEN {
            return Err(ErrorInfo::new(
                "invalid_session_id",
                format!(
                    "session_id must be {} characters or fewer",
                    MAX_SESSION_ID_LEN
                ),
            ));
        }
        let url_safe = value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~'));
        if !url_safe || value == "." || value == ".." {
            return Err(ErrorInfo::new(
                "invalid_session_id",
                "session_id may only contain ASCII letters, digits, '-', '_', '.' and '~'",
            ));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = ErrorInfo;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(value: SessionId) -> Self {
        value.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// MARK: - Sensor samples

/// One position fix as reported by the location adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawFix {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// Instantaneous speed in m/s; negative when the platform has no estimate.
    pub speed: f64,
    pub horizontal_accuracy: f64,
    pub vertical_accuracy: f64,
}

impl RawFix {
    pub fn to_point(&self) -> RawPoint {
        RawPoint {
            timestamp: self.timestamp,
            latitude: self.latitude,
            longitude: self.longitude,
            altitude: self.altitude,
            speed: self.speed,
        }
    }
}

/// One pedometer update. `steps` is cumulative since the adapter started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MotionSample {
    pub steps: u64,
    #[serde(default)]
    pub distance: Option<f64>,
    pub elapsed_seconds: f64,
    #[serde(default)]
    pub average_pace_sec_per_meter: Option<f64>,
    #[serde(default)]
    pub cadence_spm: Option<f64>,
}

impl MotionSample {
    /// Steps per minute, preferring the platform's reported cadence.
    pub fn cadence(&self) -> Option<f64> {
        match self.cadence_spm {
            Some(value) if value.is_finite() && value >= 0.0 => Some(value),
            Some(_) => None,
            None if self.elapsed_seconds > 0.0 => {
                Some(self.steps as f64 * 60.0 / self.elapsed_seconds)
            }
            None => None,
        }
    }

    /// Speed in m/s derived from the reported average pace.
    pub fn speed(&self) -> Option<f64> {
        self.average_pace_sec_per_meter
            .filter(|pace| pace.is_finite() && *pace > 0.0)
            .map(|pace| 1.0 / pace)
    }
}

// MARK: - Derived records

/// An accepted observation, owned by the engine until buffered and retained
/// in the session history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningMetrics {
    pub distance_meters: f64,
    /// Active seconds; paused intervals are never counted.
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_pace_sec_per_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_pace_sec_per_km: Option<f64>,
    pub avg_cadence_spm: f64,
    pub max_cadence_spm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_pace_sec_per_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_pace_point: Option<RawPoint>,
    pub total_steps: u64,
}

/// The unit emitted to the presentation layer once per fused event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunningSnapshot {
    pub recorded_at: DateTime<Utc>,
    pub metrics: RunningMetrics,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_point: Option<RawPoint>,
}

impl RunningSnapshot {
    pub fn distance_meters(&self) -> f64 {
        self.metrics.distance_meters
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.metrics.elapsed_seconds
    }

    pub fn avg_pace_sec_per_km(&self) -> Option<f64> {
        self.metrics.avg_pace_sec_per_km
    }

    pub fn avg_cadence_spm(&self) -> f64 {
        self.metrics.avg_cadence_spm
    }
}

/// Final aggregate handed back by `stop()`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunningDetail {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    pub metrics: RunningMetrics,
    pub points: Vec<RawPoint>,
}

// MARK: - Remote store wire types

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: SessionId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentUpload {
    pub session_id: SessionId,
    pub points: Vec<RawPoint>,
    pub metrics: RunningMetrics,
    pub is_stopped: bool,
}

impl SegmentUpload {
    pub fn validate(&self) -> Result<(), ErrorInfo> {
        if self.points.is_empty() {
            return Err(ErrorInfo::new(
                "empty_segment",
                "segment must contain at least one point",
            ));
        }
        let ordered = self
            .points
            .windows(2)
            .all(|pair| pair[0].timestamp <= pair[1].timestamp);
        if !ordered {
            return Err(ErrorInfo::new(
                "unordered_segment",
                "segment points must be ordered by timestamp",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentAck {
    pub segment_id: String,
    pub saved_count: usize,
}

/// Summary metrics sent with the terminal completion call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub distance_meters: f64,
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_pace_sec_per_km: Option<f64>,
    pub avg_cadence_spm: f64,
    pub max_cadence_spm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_pace_sec_per_km: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fastest_pace_point: Option<RawPoint>,
    pub total_steps: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl From<&RunningDetail> for CompletionSummary {
    fn from(detail: &RunningDetail) -> Self {
        let metrics = &detail.metrics;
        Self {
            distance_meters: metrics.distance_meters,
            duration_seconds: metrics.elapsed_seconds,
            avg_pace_sec_per_km: metrics.avg_pace_sec_per_km,
            avg_cadence_spm: metrics.avg_cadence_spm,
            max_cadence_spm: metrics.max_cadence_spm,
            fastest_pace_sec_per_km: metrics.fastest_pace_sec_per_km,
            fastest_pace_point: metrics.fastest_pace_point,
            total_steps: metrics.total_steps,
            started_at: detail.started_at,
            ended_at: detail.ended_at,
        }
    }
}

/// Terminal upload. The artifact travels as its own binary part, never as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub session_id: SessionId,
    pub summary: CompletionSummary,
    pub artifact: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionReceipt {
    #[serde(default)]
    pub map_image_url: Option<String>,
}
