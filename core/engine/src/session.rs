//! Session lifecycle controller.
//!
//! One coordination task owns the session state, the fusion engine, the
//! accumulation buffer and the route history. [`SessionController`] is a thin
//! handle that sends commands to that task and awaits the reply, so every
//! mutation (sensor event, timer tick, lifecycle call) is applied by a single
//! writer and flushes never overlap.
//!
//! State machine:
//!
//! ```text
//! Ready --start--> Active --pause--> Paused --resume--> Active
//! Active|Paused --stop--> Stopped --create_session--> Ready
//! ```

use chrono::{DateTime, Utc};
use futures::Stream;
use runtrack_protocol::{
    MotionSample, RawFix, RawPoint, RunningDetail, RunningMetrics, RunningSnapshot, SegmentAck,
    SessionId,
};
use serde::Serialize;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::buffer::{AccumulationBuffer, SkipReason};
use crate::completion::CompletionHandle;
use crate::config::TrackerConfig;
use crate::error::{ApiError, Result, SensorError, TrackerError};
use crate::fusion::{FusedStream, FusionEngine, FusionOutput, SensorEvent};
use crate::remote::{with_timeout, RemoteStore};
use crate::sensors::{ensure_authorized, SensorAdapter};

const COMMAND_QUEUE_DEPTH: usize = 32;
const EVENT_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Ready,
    Active,
    Paused,
    Stopped,
}

/// Non-fatal outcomes published to [`SessionController::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    FlushSucceeded {
        segment_id: String,
        saved_count: usize,
        is_stopped: bool,
    },
    FlushFailed {
        error: ApiError,
        pending_points: usize,
        is_stopped: bool,
    },
    FlushSkipped {
        reason: SkipReason,
    },
    SensorFailed {
        error: SensorError,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    Skipped(SkipReason),
    Succeeded(SegmentAck),
    Failed(ApiError),
}

impl FlushOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, FlushOutcome::Succeeded(_))
    }
}

#[derive(Debug)]
pub struct StopOutcome {
    pub detail: RunningDetail,
    pub session_id: Option<SessionId>,
    pub final_flush: FlushOutcome,
    /// Waits for the route image and performs the terminal upload.
    pub completion: Option<CompletionHandle>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub buffered_points: usize,
    pub route_points: usize,
    pub metrics: RunningMetrics,
}

/// Snapshots for one session, in emission order. Ends after `stop`.
#[derive(Debug)]
pub struct SnapshotStream {
    receiver: mpsc::UnboundedReceiver<Result<RunningSnapshot>>,
}

impl SnapshotStream {
    pub async fn recv(&mut self) -> Option<Result<RunningSnapshot>> {
        self.receiver.recv().await
    }

    /// Returns an item that is already queued without waiting.
    pub fn try_recv(&mut self) -> Option<Result<RunningSnapshot>> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for SnapshotStream {
    type Item = Result<RunningSnapshot>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

enum Command {
    CreateSession {
        reply: oneshot::Sender<Result<SessionId>>,
    },
    Start {
        reply: oneshot::Sender<Result<SnapshotStream>>,
    },
    Pause {
        reply: oneshot::Sender<Result<FlushOutcome>>,
    },
    Resume {
        reply: oneshot::Sender<Result<()>>,
    },
    Stop {
        reply: oneshot::Sender<Result<StopOutcome>>,
    },
    FlushNow {
        reply: oneshot::Sender<Result<FlushOutcome>>,
    },
    Status {
        reply: oneshot::Sender<SessionStatus>,
    },
}

/// Handle to a running session coordinator. Must be created inside a tokio
/// runtime; dropping it cancels the coordinator and stops both adapters.
#[derive(Debug)]
pub struct SessionController {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<TrackerEvent>,
    task: JoinHandle<()>,
}

impl SessionController {
    pub fn spawn<L, M>(
        config: TrackerConfig,
        location: L,
        motion: M,
        store: Arc<dyn RemoteStore>,
    ) -> Result<Self>
    where
        L: SensorAdapter<Sample = RawFix>,
        M: SensorAdapter<Sample = MotionSample>,
    {
        config.validate().map_err(TrackerError::Config)?;
        let (commands, receiver) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (events, _) = broadcast::channel(EVENT_QUEUE_DEPTH);
        let coordinator = Coordinator {
            engine: FusionEngine::new(config.filter.max_horizontal_accuracy_m),
            config,
            location,
            motion,
            store,
            state: SessionState::Ready,
            session_id: None,
            buffer: AccumulationBuffer::new(),
            history: Vec::new(),
            started_at: None,
            fused: None,
            flush_timer: None,
            snapshots: None,
            events: events.clone(),
        };
        let task = tokio::spawn(coordinator.run(receiver));

        Ok(Self {
            commands,
            events,
            task,
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    pub async fn create_session(&self) -> Result<SessionId> {
        self.request(|reply| Command::CreateSession { reply }).await?
    }

    pub async fn start(&self) -> Result<SnapshotStream> {
        self.request(|reply| Command::Start { reply }).await?
    }

    /// Stops the adapters and the flush timer, then flushes once. The flush
    /// result is informational; a failure keeps the points buffered.
    pub async fn pause(&self) -> Result<FlushOutcome> {
        self.request(|reply| Command::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<()> {
        self.request(|reply| Command::Resume { reply }).await?
    }

    pub async fn stop(&self) -> Result<StopOutcome> {
        self.request(|reply| Command::Stop { reply }).await?
    }

    pub async fn flush_now(&self) -> Result<FlushOutcome> {
        self.request(|reply| Command::FlushNow { reply }).await?
    }

    pub async fn status(&self) -> Result<SessionStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| TrackerError::ControllerClosed)?;
        response.await.map_err(|_| TrackerError::ControllerClosed)
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::CreateSession { .. } => "create_session",
            Command::Start { .. } => "start",
            Command::Pause { .. } => "pause",
            Command::Resume { .. } => "resume",
            Command::Stop { .. } => "stop",
            Command::FlushNow { .. } => "flush_now",
            Command::Status { .. } => "status",
        };
        f.write_str(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Coordination task
// ═══════════════════════════════════════════════════════════════════════════════

struct Coordinator<L, M>
where
    L: SensorAdapter<Sample = RawFix>,
    M: SensorAdapter<Sample = MotionSample>,
{
    config: TrackerConfig,
    location: L,
    motion: M,
    store: Arc<dyn RemoteStore>,
    state: SessionState,
    session_id: Option<SessionId>,
    engine: FusionEngine,
    buffer: AccumulationBuffer,
    history: Vec<RawPoint>,
    started_at: Option<DateTime<Utc>>,
    fused: Option<FusedStream>,
    flush_timer: Option<Interval>,
    snapshots: Option<mpsc::UnboundedSender<Result<RunningSnapshot>>>,
    events: broadcast::Sender<TrackerEvent>,
}

async fn next_sensor_event(
    fused: &mut Option<FusedStream>,
) -> Option<std::result::Result<SensorEvent, SensorError>> {
    match fused {
        Some(fused) => fused.next().await,
        None => std::future::pending().await,
    }
}

async fn next_flush_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn flush_timer(period: Duration) -> Interval {
    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    timer
}

impl<L, M> Coordinator<L, M>
where
    L: SensorAdapter<Sample = RawFix>,
    M: SensorAdapter<Sample = MotionSample>,
{
    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        loop {
            // Queued sensor events are applied before any lifecycle command.
            tokio::select! {
                biased;
                event = next_sensor_event(&mut self.fused), if self.fused.is_some() => {
                    self.on_sensor_event(event).await;
                }
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = next_flush_tick(&mut self.flush_timer), if self.flush_timer.is_some() => {
                    debug!(session_id = ?self.session_id, "Periodic flush tick");
                    self.flush(false).await;
                }
            }
        }
        debug!("Session coordinator shut down");
    }

    async fn handle(&mut self, command: Command) {
        debug!(command = ?command, state = ?self.state, "Session command received");
        match command {
            Command::CreateSession { reply } => {
                let _ = reply.send(self.create_session().await);
            }
            Command::Start { reply } => {
                let _ = reply.send(self.start().await);
            }
            Command::Pause { reply } => {
                let _ = reply.send(self.pause().await);
            }
            Command::Resume { reply } => {
                let _ = reply.send(self.resume().await);
            }
            Command::Stop { reply } => {
                let _ = reply.send(self.stop().await);
            }
            Command::FlushNow { reply } => {
                let result = match self.state {
                    SessionState::Active | SessionState::Paused => Ok(self.flush(false).await),
                    state => Err(TrackerError::InvalidTransition {
                        operation: "flush",
                        state,
                    }),
                };
                let _ = reply.send(result);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    async fn create_session(&mut self) -> Result<SessionId> {
        let allowed = match self.state {
            SessionState::Ready => self.session_id.is_none(),
            SessionState::Stopped => true,
            SessionState::Active | SessionState::Paused => false,
        };
        if !allowed {
            return Err(self.invalid("create_session"));
        }

        let session_id = with_timeout(self.config.request_timeout(), self.store.create_session())
            .await
            .map_err(|err| {
                warn!(error = %err, "Failed to create remote session");
                TrackerError::from(err)
            })?;

        self.clear_session();
        self.session_id = Some(session_id.clone());
        self.transition(SessionState::Ready);
        info!(session_id = %session_id, "Remote session created");
        Ok(session_id)
    }

    async fn start(&mut self) -> Result<SnapshotStream> {
        if self.state != SessionState::Ready {
            return Err(self.invalid("start"));
        }
        let session_id = self.session_id.clone().ok_or(TrackerError::NoSession)?;

        self.start_tracking().await?;
        self.engine.reset();
        self.buffer.clear();
        self.history.clear();
        self.started_at = Some(Utc::now());

        let (sender, receiver) = mpsc::unbounded_channel();
        self.snapshots = Some(sender);
        self.flush_timer = Some(flush_timer(self.config.flush_interval()));
        self.transition(SessionState::Active);
        info!(session_id = %session_id, "Session started");
        Ok(SnapshotStream { receiver })
    }

    async fn pause(&mut self) -> Result<FlushOutcome> {
        if self.state != SessionState::Active {
            return Err(self.invalid("pause"));
        }
        self.halt_tracking();
        self.transition(SessionState::Paused);
        info!(
            session_id = ?self.session_id,
            buffered_points = self.buffer.len(),
            "Session paused"
        );
        Ok(self.flush(false).await)
    }

    async fn resume(&mut self) -> Result<()> {
        if self.state != SessionState::Paused {
            return Err(self.invalid("resume"));
        }
        self.start_tracking().await?;
        self.engine.begin_segment();
        self.flush_timer = Some(flush_timer(self.config.flush_interval()));
        self.transition(SessionState::Active);
        info!(session_id = ?self.session_id, "Session resumed");
        Ok(())
    }

    async fn stop(&mut self) -> Result<StopOutcome> {
        if !matches!(self.state, SessionState::Active | SessionState::Paused) {
            return Err(self.invalid("stop"));
        }
        self.halt_tracking();
        self.transition(SessionState::Stopped);

        let final_flush = self.flush(true).await;
        let detail = self.detail();
        let session_id = self.session_id.clone();
        let completion = session_id.as_ref().map(|id| {
            CompletionHandle::spawn(&self.config, Arc::clone(&self.store), id.clone(), &detail)
        });
        info!(
            session_id = ?session_id,
            distance_meters = detail.metrics.distance_meters,
            elapsed_seconds = detail.metrics.elapsed_seconds,
            points = detail.points.len(),
            final_flush_ok = final_flush.is_success(),
            "Session stopped"
        );

        self.clear_session();
        Ok(StopOutcome {
            detail,
            session_id,
            final_flush,
            completion,
        })
    }

    async fn on_sensor_event(&mut self, event: Option<std::result::Result<SensorEvent, SensorError>>) {
        match event {
            Some(Ok(event)) => self.apply_event(&event),
            Some(Err(error)) => self.on_sensor_failure(error).await,
            None => {
                debug!(session_id = ?self.session_id, "Sensor streams ended");
                self.fused = None;
            }
        }
    }

    fn apply_event(&mut self, event: &SensorEvent) {
        let (snapshot, point) = match self.engine.apply(event, Utc::now()) {
            FusionOutput::Snapshot { snapshot, point } => (snapshot, point),
            FusionOutput::Rejected(_) => return,
        };
        match point {
            Some(point) => {
                self.buffer.push(point, snapshot.metrics.clone());
                self.history.push(point);
            }
            None => self.buffer.update_metrics(snapshot.metrics.clone()),
        }
        if let Some(snapshots) = self.snapshots.as_ref() {
            let _ = snapshots.send(Ok(snapshot));
        }
    }

    async fn on_sensor_failure(&mut self, error: SensorError) {
        warn!(
            session_id = ?self.session_id,
            error = %error,
            "Sensor stream failed; pausing session"
        );
        self.emit(TrackerEvent::SensorFailed {
            error: error.clone(),
        });
        if let Some(snapshots) = self.snapshots.as_ref() {
            let _ = snapshots.send(Err(TrackerError::from(error)));
        }
        self.halt_tracking();
        self.transition(SessionState::Paused);
        self.flush(false).await;
    }

    async fn start_tracking(&mut self) -> Result<()> {
        ensure_authorized(&mut self.location).await?;
        ensure_authorized(&mut self.motion).await?;

        let location = self.location.start_tracking()?;
        let motion = match self.motion.start_tracking() {
            Ok(stream) => stream,
            Err(err) => {
                self.location.stop_tracking();
                return Err(err.into());
            }
        };
        self.fused = Some(FusedStream::new(location, motion));
        Ok(())
    }

    /// Cancels sensor subscriptions and the flush timer. Events still queued
    /// in the adapters are dropped with the streams.
    fn halt_tracking(&mut self) {
        self.location.stop_tracking();
        self.motion.stop_tracking();
        self.fused = None;
        self.flush_timer = None;
    }

    async fn flush(&mut self, is_stopped: bool) -> FlushOutcome {
        let pending = match self
            .buffer
            .prepare_flush(self.session_id.as_ref(), is_stopped)
        {
            Ok(pending) => pending,
            Err(reason) => {
                debug!(reason = ?reason, is_stopped, "Flush skipped");
                self.emit(TrackerEvent::FlushSkipped { reason });
                return FlushOutcome::Skipped(reason);
            }
        };

        let result = with_timeout(
            self.config.request_timeout(),
            self.store.append_segment(&pending.upload),
        )
        .await;

        match result {
            Ok(ack) => {
                let removed = self.buffer.acknowledge(&pending);
                info!(
                    session_id = %pending.upload.session_id,
                    segment_id = %ack.segment_id,
                    sent = removed,
                    saved = ack.saved_count,
                    remaining = self.buffer.len(),
                    is_stopped,
                    "Segment flushed"
                );
                self.emit(TrackerEvent::FlushSucceeded {
                    segment_id: ack.segment_id.clone(),
                    saved_count: ack.saved_count,
                    is_stopped,
                });
                FlushOutcome::Succeeded(ack)
            }
            Err(error) => {
                warn!(
                    session_id = %pending.upload.session_id,
                    error = %error,
                    pending_points = self.buffer.len(),
                    is_stopped,
                    "Segment flush failed; points retained"
                );
                self.emit(TrackerEvent::FlushFailed {
                    error: error.clone(),
                    pending_points: self.buffer.len(),
                    is_stopped,
                });
                FlushOutcome::Failed(error)
            }
        }
    }

    fn detail(&self) -> RunningDetail {
        RunningDetail {
            started_at: self
                .history
                .first()
                .map(|point| point.timestamp)
                .or(self.started_at),
            ended_at: Some(
                self.history
                    .last()
                    .map(|point| point.timestamp)
                    .unwrap_or_else(Utc::now),
            ),
            metrics: self.engine.metrics(),
            points: self.history.clone(),
        }
    }

    fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            session_id: self.session_id.clone(),
            buffered_points: self.buffer.len(),
            route_points: self.history.len(),
            metrics: self.engine.metrics(),
        }
    }

    fn clear_session(&mut self) {
        self.session_id = None;
        self.engine.reset();
        self.buffer.clear();
        self.history.clear();
        self.started_at = None;
        self.snapshots = None;
    }

    fn transition(&mut self, to: SessionState) {
        let from = self.state;
        if from == to {
            return;
        }
        self.state = to;
        self.emit(TrackerEvent::StateChanged { from, to });
    }

    fn emit(&self, event: TrackerEvent) {
        // No receivers is fine; events are advisory.
        let _ = self.events.send(event);
    }

    fn invalid(&self, operation: &'static str) -> TrackerError {
        debug!(operation, state = ?self.state, "Rejected lifecycle call");
        TrackerError::InvalidTransition {
            operation,
            state: self.state,
        }
    }
}

// Runs on normal shutdown and when the controller aborts the task.
impl<L, M> Drop for Coordinator<L, M>
where
    L: SensorAdapter<Sample = RawFix>,
    M: SensorAdapter<Sample = MotionSample>,
{
    fn drop(&mut self) {
        self.halt_tracking();
    }
}
