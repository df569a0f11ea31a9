//! Error types for the tracking engine.
//!
//! Each layer owns its own enum: adapters raise [`SensorError`], the remote
//! store raises [`ApiError`], and the public controller surface speaks
//! [`TrackerError`].

use crate::session::SessionState;

// ═══════════════════════════════════════════════════════════════════════════════
// Sensor Adapter Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SensorError {
    #[error("Sensor permission denied")]
    PermissionDenied,

    #[error("Sensor is already streaming")]
    AlreadyStreaming,

    #[error("Sensor runtime failure: {0}")]
    Runtime(String),

    /// The platform could not resolve a value for this one event.
    #[error("Location temporarily unknown")]
    LocationUnknown,
}

impl SensorError {
    /// Fatal errors terminate the fused stream; the rest are swallowed per event.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, SensorError::LocationUnknown)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Remote Store Errors
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerErrorKind {
    NotFound,
    Internal,
    BadGateway,
    Status(u16),
}

impl ServerErrorKind {
    pub fn from_status(status: u16) -> Self {
        match status {
            404 => ServerErrorKind::NotFound,
            500 => ServerErrorKind::Internal,
            502 => ServerErrorKind::BadGateway,
            other => ServerErrorKind::Status(other),
        }
    }
}

impl std::fmt::Display for ServerErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerErrorKind::NotFound => f.write_str("not found"),
            ServerErrorKind::Internal => f.write_str("internal server error"),
            ServerErrorKind::BadGateway => f.write_str("bad gateway"),
            ServerErrorKind::Status(code) => write!(f, "status {}", code),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(ServerErrorKind),

    #[error("Response decode error: {0}")]
    Decode(String),

    #[error("Unknown remote error: {0}")]
    Unknown(String),
}

// ═══════════════════════════════════════════════════════════════════════════════
// Engine Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// All errors surfaced by the session and completion controllers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackerError {
    #[error("Sensor permission denied")]
    PermissionDenied,

    #[error("Sensor is already streaming")]
    AlreadyStreaming,

    #[error("Sensor adapter failed: {0}")]
    AdapterRuntime(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Server error: {0}")]
    Server(ServerErrorKind),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Cannot {operation} while session is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("No remote session; call create_session first")]
    NoSession,

    #[error("Controller is no longer running")]
    ControllerClosed,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<SensorError> for TrackerError {
    fn from(err: SensorError) -> Self {
        match err {
            SensorError::PermissionDenied => TrackerError::PermissionDenied,
            SensorError::AlreadyStreaming => TrackerError::AlreadyStreaming,
            SensorError::Runtime(message) => TrackerError::AdapterRuntime(message),
            SensorError::LocationUnknown => {
                TrackerError::AdapterRuntime("location unknown".to_string())
            }
        }
    }
}

impl From<ApiError> for TrackerError {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Network(message) => TrackerError::Network(message),
            ApiError::Server(kind) => TrackerError::Server(kind),
            ApiError::Decode(message) | ApiError::Unknown(message) => {
                TrackerError::Unknown(message)
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackerError>;
