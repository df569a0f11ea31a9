//! Trace replay.
//!
//! A trace is a JSON-lines file. Each line is one event tagged by `kind`:
//!
//! ```text
//! {"kind":"fix","timestamp":"2026-01-01T00:00:00Z","latitude":37.56,...}
//! {"kind":"motion","steps":120,"elapsed_seconds":40.0,"cadence_spm":172.0}
//! {"kind":"pause"}
//! {"kind":"resume"}
//! {"kind":"artifact","path":"route.png"}
//! ```
//!
//! Blank lines and lines starting with `#` are ignored. Artifact paths are
//! resolved relative to the trace file.

use fs_err as fs;
use runtrack_engine::{
    channel_adapter, Authorization, CompletionState, FlushOutcome, RemoteStore,
    SessionController, SnapshotStream, TrackerConfig, TrackerError,
};
use runtrack_protocol::{MotionSample, RawFix, SessionId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Trace line {line}: {message}")]
    Parse { line: usize, message: String },

    #[error(transparent)]
    Tracker(#[from] TrackerError),

    #[error("Snapshot reader failed: {0}")]
    Reader(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TraceEvent {
    Fix(RawFix),
    Motion(MotionSample),
    Pause,
    Resume,
    Artifact { path: PathBuf },
}

#[derive(Debug, Clone, Default)]
pub struct ReplayOptions {
    pub trace_path: PathBuf,
    pub complete_without_artifact: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplaySummary {
    pub session_id: Option<SessionId>,
    pub snapshots: usize,
    pub route_points: usize,
    pub distance_meters: f64,
    pub elapsed_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_pace_sec_per_km: Option<f64>,
    pub avg_cadence_spm: f64,
    pub total_steps: u64,
    pub final_flush: String,
    pub completion: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub map_image_url: Option<String>,
}

pub fn parse_trace(content: &str) -> Result<Vec<TraceEvent>, ReplayError> {
    let mut events = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event = serde_json::from_str::<TraceEvent>(trimmed).map_err(|err| {
            ReplayError::Parse {
                line: index + 1,
                message: err.to_string(),
            }
        })?;
        events.push(event);
    }
    Ok(events)
}

pub async fn run(
    options: ReplayOptions,
    config: TrackerConfig,
    store: Arc<dyn RemoteStore>,
) -> Result<ReplaySummary, ReplayError> {
    let content = fs::read_to_string(&options.trace_path)?;
    let events = parse_trace(&content)?;
    let base_dir = options
        .trace_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    info!(
        trace = %options.trace_path.display(),
        events = events.len(),
        "Replaying trace"
    );

    let (location, fixes) = channel_adapter::<RawFix>(Authorization::Authorized);
    let (motion, samples) = channel_adapter::<MotionSample>(Authorization::Authorized);
    let controller = SessionController::spawn(config, location, motion, store)?;

    controller.create_session().await?;
    let stream = controller.start().await?;
    let reader = tokio::spawn(drain_snapshots(stream));

    let mut artifact = None;
    for event in events {
        match event {
            TraceEvent::Fix(fix) => {
                if !fixes.send(fix) {
                    debug!(timestamp = %fix.timestamp, "Fix dropped; location is not streaming");
                }
            }
            TraceEvent::Motion(sample) => {
                if !samples.send(sample) {
                    debug!("Motion sample dropped; motion is not streaming");
                }
            }
            TraceEvent::Pause => {
                let flush = controller.pause().await?;
                debug!(flush = %describe_flush(&flush), "Trace paused");
            }
            TraceEvent::Resume => controller.resume().await?,
            TraceEvent::Artifact { path } => {
                artifact = Some(fs::read(base_dir.join(path))?);
            }
        }
    }

    let outcome = controller.stop().await?;
    let snapshots = reader
        .await
        .map_err(|err| ReplayError::Reader(err.to_string()))?;

    let completion = match outcome.completion {
        Some(mut completion) => {
            if let Some(bytes) = artifact {
                completion.provide_artifact(bytes);
            }
            let mut state = completion.settled().await;
            if matches!(state, CompletionState::CaptureFailed { .. })
                && options.complete_without_artifact
            {
                let mut watcher = completion.subscribe();
                completion.complete_without_artifact();
                state = match watcher
                    .wait_for(|state| {
                        matches!(
                            state,
                            CompletionState::Completed { .. } | CompletionState::Failed { .. }
                        )
                    })
                    .await
                {
                    Ok(state) => state.clone(),
                    Err(_) => completion.state(),
                };
            }
            state
        }
        None => CompletionState::CaptureFailed { attempts: 0 },
    };

    let metrics = &outcome.detail.metrics;
    let summary = ReplaySummary {
        session_id: outcome.session_id.clone(),
        snapshots,
        route_points: outcome.detail.points.len(),
        distance_meters: metrics.distance_meters,
        elapsed_seconds: metrics.elapsed_seconds,
        avg_pace_sec_per_km: metrics.avg_pace_sec_per_km,
        avg_cadence_spm: metrics.avg_cadence_spm,
        total_steps: metrics.total_steps,
        final_flush: describe_flush(&outcome.final_flush),
        completion: describe_completion(&completion),
        map_image_url: match &completion {
            CompletionState::Completed { map_image_url } => map_image_url.clone(),
            _ => None,
        },
    };
    info!(
        session_id = ?summary.session_id,
        distance_meters = summary.distance_meters,
        completion = %summary.completion,
        "Replay finished"
    );
    Ok(summary)
}

async fn drain_snapshots(mut stream: SnapshotStream) -> usize {
    let mut count = 0;
    while let Some(item) = stream.recv().await {
        match item {
            Ok(snapshot) => {
                count += 1;
                debug!(
                    distance_meters = snapshot.distance_meters(),
                    elapsed_seconds = snapshot.elapsed_seconds(),
                    avg_pace = ?snapshot.avg_pace_sec_per_km(),
                    "Snapshot"
                );
            }
            Err(err) => warn!(error = %err, "Sensor failure during replay"),
        }
    }
    count
}

fn describe_flush(outcome: &FlushOutcome) -> String {
    match outcome {
        FlushOutcome::Succeeded(ack) => format!("saved {} points as {}", ack.saved_count, ack.segment_id),
        FlushOutcome::Skipped(reason) => format!("skipped ({:?})", reason),
        FlushOutcome::Failed(err) => format!("failed: {}", err),
    }
}

fn describe_completion(state: &CompletionState) -> String {
    match state {
        CompletionState::Completed { .. } => "completed".to_string(),
        CompletionState::CaptureFailed { attempts } => {
            format!("capture failed after {} attempts", attempts)
        }
        CompletionState::Failed { error } => format!("failed: {}", error),
        other => format!("{:?}", other),
    }
}
