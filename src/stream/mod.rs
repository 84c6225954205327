//! Liveness-monitored streams.
//!
//! A [`LivenessStream`] wraps one transport and runs the heartbeat protocol on
//! it in the background: the ping scheduler (when the local role probes), the
//! probe rate limiter and reply path for probes arriving from the peer, and a
//! watch over every liveness deadline. The application only sees payloads.

use crate::config::LivenessConfig;
use crate::consts::INBOUND_CHANNEL_CAPACITY;
use crate::envelope::Payload;
use crate::errors::{LifelineError, LifelineResult};
use crate::liveness::{Direction, LivenessTracker, ProbeRateLimiter};
use crate::multiplexer::StreamMultiplexer;
use crate::transport::FrameTransport;
use futures::Stream;
use serde::{Deserialize, Serialize};
use session::StreamShared;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::DropGuard;
use uuid::Uuid;

pub mod registry;
mod session;

pub use registry::Endpoint;

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub Uuid);

impl StreamId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

impl Role {
    pub fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => write!(f, "initiator"),
            Role::Responder => write!(f, "responder"),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StreamState {
    Open,
    Closing,
    Closed,
}

/// Why a stream closed.
#[derive(Clone, Debug, PartialEq)]
pub enum Termination {
    /// Closed locally.
    Completed,
    /// The peer finished the stream.
    RemoteClosed,
    /// The transport failed underneath the stream.
    TransportFailed(String),
    /// A liveness, rate limit or protocol violation.
    Failed(LifelineError),
}

impl Termination {
    pub(crate) fn from_error(error: LifelineError) -> Self {
        match error {
            LifelineError::TransportFailure(reason) => Termination::TransportFailed(reason),
            other => Termination::Failed(other),
        }
    }

    pub fn error(&self) -> Option<&LifelineError> {
        match self {
            Termination::Failed(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Completed => write!(f, "completed"),
            Termination::RemoteClosed => write!(f, "closed by peer"),
            Termination::TransportFailed(reason) => write!(f, "transport failed: {}", reason),
            Termination::Failed(e) => write!(f, "failed: {}", e),
        }
    }
}

/// Cloneable control side of a stream: send payloads, close, observe.
///
/// When every handle and the payload receiver of a stream are dropped, the
/// stream closes as if `close` had been called.
pub struct StreamHandle<T> {
    shared: Arc<StreamShared<T>>,
    _guard: Arc<DropGuard>,
}

impl<T> Clone for StreamHandle<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            _guard: self._guard.clone(),
        }
    }
}

impl<T: Payload> StreamHandle<T> {
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<StreamState> {
        self.shared.subscribe()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.shared.termination()
    }

    pub async fn send(&self, payload: T) -> LifelineResult<()> {
        self.shared.send_payload(payload).await
    }

    /// Closes the stream. Closing a closed stream does nothing.
    pub async fn close(&self) {
        if !self.shared.terminate(Termination::Completed).await {
            self.shared.closed().await;
        }
    }

    /// Waits until the stream is closed and returns why.
    pub async fn closed(&self) -> Termination {
        self.shared.closed().await
    }

    /// Copy of the tracker for one direction, if the stream tracks it.
    pub async fn tracker(&self, direction: Direction) -> Option<LivenessTracker> {
        let tracker = match direction {
            Direction::Outbound => self.shared.outbound.as_ref(),
            Direction::Inbound => self.shared.inbound.as_ref(),
        }?;
        let snapshot = tracker.lock().await.clone();
        Some(snapshot)
    }
}

/// Application view of inbound traffic: payloads only.
pub struct PayloadReceiver<T> {
    shared: Arc<StreamShared<T>>,
    payloads: mpsc::Receiver<T>,
    _guard: Arc<DropGuard>,
}

impl<T: Payload> PayloadReceiver<T> {
    /// Next payload. `Ok(None)` once the stream closed normally, the fatal
    /// error when it was terminated by one.
    pub async fn next(&mut self) -> LifelineResult<Option<T>> {
        if let Some(payload) = self.payloads.recv().await {
            return Ok(Some(payload));
        }
        match self.shared.closed().await {
            Termination::Failed(e) => Err(e),
            _ => Ok(None),
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = LifelineResult<T>> {
        futures::stream::unfold(Some(self), |receiver| async move {
            let mut receiver = receiver?;
            match receiver.next().await {
                Ok(Some(payload)) => Some((Ok(payload), Some(receiver))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

pub struct LivenessStream<T> {
    handle: StreamHandle<T>,
    receiver: PayloadReceiver<T>,
}

impl<T: Payload> LivenessStream<T> {
    /// Opens a stream on `transport` with its own rate limiter. Must be called
    /// from within a tokio runtime.
    pub fn open(
        transport: Arc<dyn FrameTransport>,
        role: Role,
        config: &LivenessConfig,
    ) -> LifelineResult<Self> {
        config.validate()?;
        let limiter = Arc::new(ProbeRateLimiter::new(config.rate_limit));
        Self::open_with_limiter(transport, role, config, limiter)
    }

    pub(crate) fn open_with_limiter(
        transport: Arc<dyn FrameTransport>,
        role: Role,
        config: &LivenessConfig,
        limiter: Arc<ProbeRateLimiter>,
    ) -> LifelineResult<Self> {
        let mux = StreamMultiplexer::new(transport, role);
        let shared = Arc::new(StreamShared::new(mux, config, limiter.clone())?);
        limiter.register(&shared.id);

        let (payload_tx, payload_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);
        session::spawn_tasks(&shared, config, payload_tx);
        tracing::debug!(
            "Opened {} stream {} (probing: {}, inactivity: {:?})",
            role,
            shared.id,
            shared.outbound.is_some(),
            config.inactivity_timeout_for(role)
        );

        let guard = Arc::new(shared.cancel.clone().drop_guard());
        Ok(Self {
            handle: StreamHandle {
                shared: shared.clone(),
                _guard: guard.clone(),
            },
            receiver: PayloadReceiver {
                shared,
                payloads: payload_rx,
                _guard: guard,
            },
        })
    }

    pub fn id(&self) -> StreamId {
        self.handle.id()
    }

    pub fn role(&self) -> Role {
        self.handle.role()
    }

    pub fn state(&self) -> StreamState {
        self.handle.state()
    }

    pub fn termination(&self) -> Option<Termination> {
        self.handle.termination()
    }

    pub fn handle(&self) -> StreamHandle<T> {
        self.handle.clone()
    }

    pub async fn send(&self, payload: T) -> LifelineResult<()> {
        self.handle.send(payload).await
    }

    pub async fn next(&mut self) -> LifelineResult<Option<T>> {
        self.receiver.next().await
    }

    pub async fn close(&self) {
        self.handle.close().await
    }

    pub async fn closed(&self) -> Termination {
        self.handle.closed().await
    }

    pub async fn tracker(&self, direction: Direction) -> Option<LivenessTracker> {
        self.handle.tracker(direction).await
    }

    pub fn split(self) -> (StreamHandle<T>, PayloadReceiver<T>) {
        (self.handle, self.receiver)
    }

    pub fn into_payloads(self) -> impl Stream<Item = LifelineResult<T>> {
        self.receiver.into_stream()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_failures_close_without_error() {
        let termination =
            Termination::from_error(LifelineError::TransportFailure("reset".to_string()));
        assert_eq!(termination, Termination::TransportFailed("reset".to_string()));
        assert!(termination.error().is_none());

        let termination = Termination::from_error(LifelineError::StreamClosed);
        assert_eq!(termination.error(), Some(&LifelineError::StreamClosed));
    }

    #[test]
    fn test_role_peer() {
        assert_eq!(Role::Initiator.peer(), Role::Responder);
        assert_eq!(Role::Responder.peer().peer(), Role::Responder);
    }
}
