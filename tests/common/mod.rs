#![allow(dead_code)]

use async_trait::async_trait;
use lifeline_stream::multiplexer::StreamMultiplexer;
use lifeline_stream::transport::{
    memory_pair, FrameTransport, LinkConfig, LinkControl, MemoryTransport, TransportError,
};
use lifeline_stream::{LivenessConfig, LivenessStream, ProbingMode, Role};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn config(ping_interval: Duration, reply_timeout: Duration) -> LivenessConfig {
    LivenessConfig::builder()
        .with_ping_interval(ping_interval)
        .with_reply_timeout(reply_timeout)
        .build()
        .unwrap()
}

pub fn config_with(
    ping_interval: Duration,
    reply_timeout: Duration,
    probing: ProbingMode,
    inactivity_timeout: Option<Duration>,
) -> LivenessConfig {
    let mut builder = LivenessConfig::builder()
        .with_ping_interval(ping_interval)
        .with_reply_timeout(reply_timeout)
        .with_probing(probing);
    if let Some(timeout) = inactivity_timeout {
        builder = builder.with_inactivity_timeout(timeout);
    }
    builder.build().unwrap()
}

/// Initiator on end A, responder on end B.
pub fn stream_pair(
    link: LinkConfig,
    config: &LivenessConfig,
) -> (LivenessStream<String>, LivenessStream<String>, LinkControl) {
    let (a, b, control) = memory_pair(link);
    let initiator = LivenessStream::open(Arc::new(a), Role::Initiator, config).unwrap();
    let responder = LivenessStream::open(Arc::new(b), Role::Responder, config).unwrap();
    (initiator, responder, control)
}

/// A stream on end B for `role`, and a bare multiplexer on end A that the test
/// drives by hand as the peer.
pub fn stream_with_raw_peer(
    role: Role,
    config: &LivenessConfig,
) -> (LivenessStream<String>, StreamMultiplexer<String>, LinkControl) {
    let (a, b, control) = memory_pair(LinkConfig::default());
    let stream = LivenessStream::open(Arc::new(b), role, config).unwrap();
    let peer = StreamMultiplexer::new(Arc::new(a), role.peer());
    (stream, peer, control)
}

/// Wraps a [`MemoryTransport`] and can be made to fail like a reset
/// connection: sends start failing, and optionally receives too, including one
/// already waiting for a frame.
#[derive(Debug)]
pub struct FlakyTransport {
    inner: MemoryTransport,
    sends_fail: AtomicBool,
    receives_fail: CancellationToken,
}

impl FlakyTransport {
    pub fn new(inner: MemoryTransport) -> Self {
        Self {
            inner,
            sends_fail: AtomicBool::new(false),
            receives_fail: CancellationToken::new(),
        }
    }

    pub fn fail_sends(&self) {
        self.sends_fail.store(true, Ordering::Release);
    }

    pub fn reset(&self) {
        self.fail_sends();
        self.receives_fail.cancel();
    }

    fn reset_error() -> TransportError {
        TransportError::ConnectionError("connection reset by peer".to_string())
    }
}

#[async_trait]
impl FrameTransport for FlakyTransport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        if self.sends_fail.load(Ordering::Acquire) {
            return Err(Self::reset_error());
        }
        self.inner.send_frame(frame).await
    }

    async fn receive_frame(&self) -> Result<Option<Vec<u8>>, TransportError> {
        tokio::select! {
            biased;
            _ = self.receives_fail.cancelled() => Err(Self::reset_error()),
            frame = self.inner.receive_frame() => frame,
        }
    }

    async fn close(&self, reason: &str) {
        self.inner.close(reason).await
    }
}

/// Initiator over a [`FlakyTransport`] on end A, plain responder on end B.
pub fn flaky_stream_pair(
    config: &LivenessConfig,
) -> (
    LivenessStream<String>,
    Arc<FlakyTransport>,
    LivenessStream<String>,
) {
    let (a, b, _control) = memory_pair(LinkConfig::default());
    let flaky = Arc::new(FlakyTransport::new(a));
    let initiator = LivenessStream::open(flaky.clone(), Role::Initiator, config).unwrap();
    let responder = LivenessStream::open(Arc::new(b), Role::Responder, config).unwrap();
    (initiator, flaky, responder)
}
