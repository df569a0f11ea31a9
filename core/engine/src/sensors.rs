//! Sensor adapter seam.
//!
//! Platform location and motion services push samples from their own
//! callbacks. Adapters bridge that push style into a pull-style
//! [`SensorStream`]: the adapter owns an unbounded channel, the callback side
//! writes into it, and `stop_tracking` drops the sender so the stream ends.
//!
//! [`ChannelAdapter`] is the in-process implementation used for trace replay
//! and tests; OS-backed adapters implement [`SensorAdapter`] the same way.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};
use tokio::sync::mpsc;

use crate::error::SensorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    NotDetermined,
    Denied,
    Authorized,
}

/// Cancellable stream of samples produced by one adapter.
#[derive(Debug)]
pub struct SensorStream<T> {
    receiver: mpsc::UnboundedReceiver<Result<T, SensorError>>,
}

impl<T> SensorStream<T> {
    pub fn new(receiver: mpsc::UnboundedReceiver<Result<T, SensorError>>) -> Self {
        Self { receiver }
    }

    pub async fn recv(&mut self) -> Option<Result<T, SensorError>> {
        self.receiver.recv().await
    }
}

impl<T> Stream for SensorStream<T> {
    type Item = Result<T, SensorError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[async_trait]
pub trait SensorAdapter: Send + 'static {
    type Sample: Send + 'static;

    fn authorization(&self) -> Authorization;

    /// Prompts for access when the outcome is not yet determined.
    async fn request_authorization(&mut self) -> Authorization;

    fn start_tracking(&mut self) -> Result<SensorStream<Self::Sample>, SensorError>;

    fn stop_tracking(&mut self);
}

/// Resolves authorization for an adapter, prompting once if undetermined.
pub async fn ensure_authorized<A: SensorAdapter>(adapter: &mut A) -> Result<(), SensorError> {
    let status = match adapter.authorization() {
        Authorization::NotDetermined => adapter.request_authorization().await,
        status => status,
    };
    match status {
        Authorization::Authorized => Ok(()),
        Authorization::Denied | Authorization::NotDetermined => Err(SensorError::PermissionDenied),
    }
}

// MARK: - Channel-backed adapter

#[derive(Debug)]
struct FeedState<T> {
    sender: Option<mpsc::UnboundedSender<Result<T, SensorError>>>,
    authorization: Authorization,
    request_outcome: Authorization,
    start_failure: Option<SensorError>,
    starts: usize,
}

fn lock<T>(shared: &Mutex<FeedState<T>>) -> MutexGuard<'_, FeedState<T>> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Adapter whose samples are pushed through a paired [`SensorFeed`].
#[derive(Debug)]
pub struct ChannelAdapter<T> {
    shared: Arc<Mutex<FeedState<T>>>,
}

/// Producer half of a [`ChannelAdapter`]. Cloneable; samples pushed while the
/// adapter is stopped are dropped, mirroring a platform service that is off.
#[derive(Debug)]
pub struct SensorFeed<T> {
    shared: Arc<Mutex<FeedState<T>>>,
}

impl<T> Clone for SensorFeed<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

pub fn channel_adapter<T>(authorization: Authorization) -> (ChannelAdapter<T>, SensorFeed<T>) {
    let shared = Arc::new(Mutex::new(FeedState {
        sender: None,
        authorization,
        request_outcome: Authorization::Authorized,
        start_failure: None,
        starts: 0,
    }));
    (
        ChannelAdapter {
            shared: Arc::clone(&shared),
        },
        SensorFeed { shared },
    )
}

#[async_trait]
impl<T: Send + 'static> SensorAdapter for ChannelAdapter<T> {
    type Sample = T;

    fn authorization(&self) -> Authorization {
        lock(&self.shared).authorization
    }

    async fn request_authorization(&mut self) -> Authorization {
        let mut state = lock(&self.shared);
        if state.authorization == Authorization::NotDetermined {
            state.authorization = state.request_outcome;
        }
        state.authorization
    }

    fn start_tracking(&mut self) -> Result<SensorStream<T>, SensorError> {
        let mut state = lock(&self.shared);
        if let Some(err) = state.start_failure.take() {
            return Err(err);
        }
        if state.authorization != Authorization::Authorized {
            return Err(SensorError::PermissionDenied);
        }
        if state
            .sender
            .as_ref()
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
        {
            return Err(SensorError::AlreadyStreaming);
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        state.sender = Some(sender);
        state.starts += 1;
        Ok(SensorStream::new(receiver))
    }

    fn stop_tracking(&mut self) {
        lock(&self.shared).sender = None;
    }
}

impl<T> SensorFeed<T> {
    /// Pushes one sample; returns false when the adapter is not streaming.
    pub fn send(&self, sample: T) -> bool {
        self.push(Ok(sample))
    }

    pub fn fail(&self, err: SensorError) -> bool {
        self.push(Err(err))
    }

    fn push(&self, item: Result<T, SensorError>) -> bool {
        let state = lock(&self.shared);
        match state.sender.as_ref() {
            Some(sender) => sender.send(item).is_ok(),
            None => false,
        }
    }

    pub fn is_streaming(&self) -> bool {
        lock(&self.shared)
            .sender
            .as_ref()
            .map(|sender| !sender.is_closed())
            .unwrap_or(false)
    }

    pub fn start_count(&self) -> usize {
        lock(&self.shared).starts
    }

    pub fn set_authorization(&self, authorization: Authorization) {
        lock(&self.shared).authorization = authorization;
    }

    /// Outcome applied when the engine prompts an undetermined adapter.
    pub fn set_request_outcome(&self, outcome: Authorization) {
        lock(&self.shared).request_outcome = outcome;
    }

    /// Makes the next `start_tracking` call fail with `err`.
    pub fn fail_next_start(&self, err: SensorError) {
        lock(&self.shared).start_failure = Some(err);
    }
}
