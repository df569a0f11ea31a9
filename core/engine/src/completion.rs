//! Completion and capture-retry controller.
//!
//! After a session stops, the terminal "complete session" upload waits for the
//! route image. The wait is a fixed window restarted up to `max_attempts`
//! times; when it runs out the controller reports a capture failure and never
//! uploads on its own. Once the image arrives the upload is issued once; a
//! failed upload keeps its exact request for [`CompletionHandle::retry_completion`].

use runtrack_protocol::{CompletionRequest, CompletionSummary, RunningDetail, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::config::TrackerConfig;
use crate::error::ApiError;
use crate::remote::{with_timeout, RemoteStore};

pub const CAPTURE_FAILED_MESSAGE: &str =
    "The route map could not be captured. Please try saving the run again.";

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionState {
    WaitingForArtifact { attempt: u32 },
    ReadyToComplete,
    Completing,
    Completed { map_image_url: Option<String> },
    Failed { error: ApiError },
    CaptureFailed { attempts: u32 },
}

impl CompletionState {
    /// States that need caller action (or none at all) to move on.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            CompletionState::Completed { .. }
                | CompletionState::Failed { .. }
                | CompletionState::CaptureFailed { .. }
        )
    }

    pub fn user_message(&self) -> Option<String> {
        match self {
            CompletionState::CaptureFailed { .. } => Some(CAPTURE_FAILED_MESSAGE.to_string()),
            CompletionState::Failed { error } => {
                Some(format!("Saving the run failed: {}. Tap to retry.", error))
            }
            _ => None,
        }
    }
}

#[derive(Debug)]
enum CompletionCommand {
    ProvideArtifact(Vec<u8>),
    Retry,
    CompleteWithoutArtifact,
}

/// Cloneable sender for the out-of-band image renderer.
#[derive(Debug, Clone)]
pub struct ArtifactSink {
    commands: mpsc::UnboundedSender<CompletionCommand>,
}

impl ArtifactSink {
    pub fn provide(&self, bytes: Vec<u8>) -> bool {
        self.commands
            .send(CompletionCommand::ProvideArtifact(bytes))
            .is_ok()
    }
}

/// Owner handle of one completion flow. Dropping it cancels pending timers.
#[derive(Debug)]
pub struct CompletionHandle {
    session_id: SessionId,
    commands: mpsc::UnboundedSender<CompletionCommand>,
    state: watch::Receiver<CompletionState>,
    task: JoinHandle<()>,
}

impl CompletionHandle {
    pub fn spawn(
        config: &TrackerConfig,
        store: Arc<dyn RemoteStore>,
        session_id: SessionId,
        detail: &RunningDetail,
    ) -> Self {
        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(CompletionState::WaitingForArtifact { attempt: 1 });
        let worker = CompletionWorker {
            store,
            window: config.capture_window(),
            max_attempts: config.capture.max_attempts.max(1),
            request_timeout: config.request_timeout(),
            session_id: session_id.clone(),
            summary: CompletionSummary::from(detail),
            request: None,
            attempt: 1,
            state: state_tx,
        };
        info!(session_id = %session_id, "Waiting for route image before completion");
        let task = tokio::spawn(worker.run(receiver));

        Self {
            session_id,
            commands,
            state,
            task,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn artifact_sink(&self) -> ArtifactSink {
        ArtifactSink {
            commands: self.commands.clone(),
        }
    }

    pub fn provide_artifact(&self, bytes: Vec<u8>) -> bool {
        self.commands
            .send(CompletionCommand::ProvideArtifact(bytes))
            .is_ok()
    }

    /// Re-issues the failed request. Returns false when there is no failure to retry.
    pub fn retry_completion(&self) -> bool {
        if !matches!(self.state(), CompletionState::Failed { .. }) {
            return false;
        }
        self.commands.send(CompletionCommand::Retry).is_ok()
    }

    /// After capture exhaustion, uploads the summary with no route image.
    pub fn complete_without_artifact(&self) -> bool {
        if !matches!(self.state(), CompletionState::CaptureFailed { .. }) {
            return false;
        }
        self.commands
            .send(CompletionCommand::CompleteWithoutArtifact)
            .is_ok()
    }

    pub fn state(&self) -> CompletionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CompletionState> {
        self.state.clone()
    }

    /// Waits until the flow reaches a settled state.
    pub async fn settled(&mut self) -> CompletionState {
        let settled = match self.state.wait_for(CompletionState::is_settled).await {
            Ok(state) => Some(state.clone()),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| self.state.borrow().clone())
    }
}

impl Drop for CompletionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct CompletionWorker {
    store: Arc<dyn RemoteStore>,
    window: Duration,
    max_attempts: u32,
    request_timeout: Duration,
    session_id: SessionId,
    summary: CompletionSummary,
    request: Option<CompletionRequest>,
    attempt: u32,
    state: watch::Sender<CompletionState>,
}

impl CompletionWorker {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<CompletionCommand>) {
        let window = sleep(self.window);
        tokio::pin!(window);

        loop {
            let waiting = matches!(
                *self.state.borrow(),
                CompletionState::WaitingForArtifact { .. }
            );
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = &mut window, if waiting => {
                    if self.attempt < self.max_attempts {
                        self.attempt += 1;
                        debug!(
                            session_id = %self.session_id,
                            attempt = self.attempt,
                            "Route image not ready; restarting capture window"
                        );
                        self.publish(CompletionState::WaitingForArtifact { attempt: self.attempt });
                        window.as_mut().reset(Instant::now() + self.window);
                    } else {
                        warn!(
                            session_id = %self.session_id,
                            attempts = self.attempt,
                            "Route image capture failed"
                        );
                        self.publish(CompletionState::CaptureFailed { attempts: self.attempt });
                    }
                }
            }
        }
    }

    async fn handle(&mut self, command: CompletionCommand) {
        let current = self.state.borrow().clone();
        match (command, current) {
            (CompletionCommand::ProvideArtifact(bytes), CompletionState::WaitingForArtifact { .. }) => {
                debug!(
                    session_id = %self.session_id,
                    bytes = bytes.len(),
                    "Route image received"
                );
                self.request = Some(CompletionRequest {
                    session_id: self.session_id.clone(),
                    summary: self.summary.clone(),
                    artifact: Some(bytes),
                });
                self.publish(CompletionState::ReadyToComplete);
                self.submit().await;
            }
            (CompletionCommand::Retry, CompletionState::Failed { .. }) => {
                info!(session_id = %self.session_id, "Retrying session completion");
                self.submit().await;
            }
            (CompletionCommand::CompleteWithoutArtifact, CompletionState::CaptureFailed { .. }) => {
                self.request = Some(CompletionRequest {
                    session_id: self.session_id.clone(),
                    summary: self.summary.clone(),
                    artifact: None,
                });
                self.publish(CompletionState::ReadyToComplete);
                self.submit().await;
            }
            (command, state) => {
                debug!(
                    session_id = %self.session_id,
                    command = ?CommandKind::from(&command),
                    state = ?state,
                    "Ignoring completion command"
                );
            }
        }
    }

    async fn submit(&mut self) {
        let Some(request) = self.request.as_ref() else {
            return;
        };
        self.publish(CompletionState::Completing);
        let result = with_timeout(self.request_timeout, self.store.complete_session(request)).await;
        match result {
            Ok(receipt) => {
                info!(
                    session_id = %self.session_id,
                    map_image_url = ?receipt.map_image_url,
                    "Session completed"
                );
                self.publish(CompletionState::Completed {
                    map_image_url: receipt.map_image_url,
                });
            }
            Err(error) => {
                warn!(session_id = %self.session_id, error = %error, "Session completion failed");
                self.publish(CompletionState::Failed { error });
            }
        }
    }

    fn publish(&self, state: CompletionState) {
        self.state.send_replace(state);
    }
}

#[derive(Debug)]
enum CommandKind {
    ProvideArtifact,
    Retry,
    CompleteWithoutArtifact,
}

impl From<&CompletionCommand> for CommandKind {
    fn from(command: &CompletionCommand) -> Self {
        match command {
            CompletionCommand::ProvideArtifact(_) => CommandKind::ProvideArtifact,
            CompletionCommand::Retry => CommandKind::Retry,
            CompletionCommand::CompleteWithoutArtifact => CommandKind::CompleteWithoutArtifact,
        }
    }
}
