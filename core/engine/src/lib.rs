//! # runtrack-engine
//!
//! Live running-session tracking: fuses a location stream and a motion stream
//! into running snapshots, drives the session lifecycle, buffers route points
//! for periodic upload, and gates the final completion upload on the route
//! image.
//!
//! ## Design Principles
//!
//! - **Single writer**: one coordination task owns session state, metrics and
//!   the buffer. Callers talk to it through [`SessionController`].
//! - **Seams are traits**: sensors implement [`SensorAdapter`], the backend
//!   implements [`RemoteStore`]. Hosts inject both at construction.
//! - **Uploads never fail the run**: flush and completion errors are reported
//!   and retried later; only sensor failures interrupt tracking.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use runtrack_engine::{channel_adapter, Authorization, SessionController, TrackerConfig};
//!
//! let (location, fixes) = channel_adapter(Authorization::Authorized);
//! let (motion, samples) = channel_adapter(Authorization::Authorized);
//! let controller = SessionController::spawn(TrackerConfig::default(), location, motion, store)?;
//!
//! controller.create_session().await?;
//! let mut snapshots = controller.start().await?;
//! fixes.send(fix);
//! let outcome = controller.stop().await?;
//! ```

pub mod buffer;
pub mod completion;
pub mod config;
pub mod error;
pub mod fusion;
pub mod geo;
pub mod metrics;
pub mod remote;
pub mod sensors;
pub mod session;

pub use buffer::{AccumulationBuffer, PendingFlush, SkipReason};
pub use completion::{ArtifactSink, CompletionHandle, CompletionState, CAPTURE_FAILED_MESSAGE};
pub use config::{default_config_path, load_config, TrackerConfig};
pub use error::{ApiError, Result, SensorError, ServerErrorKind, TrackerError};
pub use fusion::{FusedStream, FusionEngine, FusionOutput, RejectReason, SensorEvent};
pub use remote::RemoteStore;
pub use sensors::{channel_adapter, Authorization, ChannelAdapter, SensorAdapter, SensorFeed, SensorStream};
pub use session::{
    FlushOutcome, SessionController, SessionState, SessionStatus, SnapshotStream, StopOutcome,
    TrackerEvent,
};

pub use runtrack_protocol as protocol;
