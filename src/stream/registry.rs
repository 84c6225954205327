use crate::config::LivenessConfig;
use crate::envelope::Payload;
use crate::errors::LifelineResult;
use crate::liveness::ProbeRateLimiter;
use crate::stream::{LivenessStream, Role, StreamHandle, StreamId};
use crate::transport::FrameTransport;
use dashmap::DashMap;
use std::sync::Arc;

/// Open streams of one endpoint, keyed by stream id.
///
/// The configuration is fixed at construction and shared read-only by every
/// stream; each stream gets its own rate window in the shared limiter. Streams
/// leave the registry as soon as they close.
pub struct Endpoint<T> {
    config: Arc<LivenessConfig>,
    limiter: Arc<ProbeRateLimiter>,
    streams: Arc<DashMap<StreamId, StreamHandle<T>>>,
}

impl<T: Payload> Endpoint<T> {
    pub fn new(config: LivenessConfig) -> LifelineResult<Self> {
        config.validate()?;
        Ok(Self {
            limiter: Arc::new(ProbeRateLimiter::new(config.rate_limit)),
            config: Arc::new(config),
            streams: Arc::new(DashMap::new()),
        })
    }

    pub fn config(&self) -> &LivenessConfig {
        &self.config
    }

    pub fn rate_limiter(&self) -> &ProbeRateLimiter {
        &self.limiter
    }

    /// Opens a stream on `transport` and tracks it until it closes.
    pub fn open(
        &self,
        transport: Arc<dyn FrameTransport>,
        role: Role,
    ) -> LifelineResult<LivenessStream<T>> {
        let stream =
            LivenessStream::open_with_limiter(transport, role, &self.config, self.limiter.clone())?;
        let handle = stream.handle();
        let id = handle.id();
        self.streams.insert(id, handle.clone());

        let streams = self.streams.clone();
        tokio::spawn(async move {
            let termination = handle.closed().await;
            streams.remove(&id);
            tracing::debug!("Stream {} left the endpoint: {}", id, termination);
        });
        Ok(stream)
    }

    pub fn handle(&self, id: &StreamId) -> Option<StreamHandle<T>> {
        self.streams.get(id).map(|entry| entry.value().clone())
    }

    pub fn ids(&self) -> Vec<StreamId> {
        self.streams.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Closes every open stream.
    pub async fn shutdown(&self) {
        let handles: Vec<StreamHandle<T>> = self
            .streams
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        tracing::info!("Closing {} stream(s)", handles.len());
        for handle in handles {
            handle.close().await;
            self.streams.remove(&handle.id());
        }
    }
}
