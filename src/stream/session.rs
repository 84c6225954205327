use crate::clock::LivenessClock;
use crate::config::LivenessConfig;
use crate::envelope::{HeartbeatMessage, Payload};
use crate::errors::{LifelineError, LifelineResult};
use crate::liveness::{
    Admission, DeadlineWatch, LivenessTracker, PingScheduler, ProbeRateLimiter,
};
use crate::multiplexer::{Inbound, Outbound, StreamMultiplexer};
use crate::stream::{Role, StreamId, StreamState, Termination};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Everything one open stream owns. Shared by the stream's tasks and handles,
/// never between streams.
#[derive(Debug)]
pub(crate) struct StreamShared<T> {
    pub(crate) id: StreamId,
    pub(crate) role: Role,
    clock: LivenessClock,
    mux: StreamMultiplexer<T>,
    limiter: Arc<ProbeRateLimiter>,
    pub(crate) outbound: Option<Arc<Mutex<LivenessTracker>>>,
    pub(crate) inbound: Option<Arc<Mutex<LivenessTracker>>>,
    deadline_changed: Arc<Notify>,
    pub(crate) cancel: CancellationToken,
    state: watch::Sender<StreamState>,
    termination: OnceLock<Termination>,
}

impl<T: Payload> StreamShared<T> {
    pub(crate) fn new(
        mux: StreamMultiplexer<T>,
        config: &LivenessConfig,
        limiter: Arc<ProbeRateLimiter>,
    ) -> LifelineResult<Self> {
        let role = mux.role();
        let clock = LivenessClock::new();
        let outbound = config
            .probes(role)
            .then(|| Arc::new(Mutex::new(LivenessTracker::outbound(config.reply_timeout))));
        let inbound = config
            .inactivity_timeout_for(role)
            .map(|timeout| LivenessTracker::inbound(timeout, clock.now()))
            .transpose()?
            .map(|tracker| Arc::new(Mutex::new(tracker)));
        let (state, _) = watch::channel(StreamState::Open);
        Ok(Self {
            id: StreamId::new(),
            role,
            clock,
            mux,
            limiter,
            outbound,
            inbound,
            deadline_changed: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            state,
            termination: OnceLock::new(),
        })
    }

    pub(crate) fn state(&self) -> StreamState {
        *self.state.borrow()
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<StreamState> {
        self.state.subscribe()
    }

    pub(crate) fn termination(&self) -> Option<Termination> {
        self.termination.get().cloned()
    }

    /// Closes the stream. Only the first call has any effect; it returns
    /// whether this call was the one that closed the stream.
    pub(crate) async fn terminate(&self, termination: Termination) -> bool {
        if self.termination.set(termination.clone()).is_err() {
            return false;
        }
        self.state.send_replace(StreamState::Closing);
        self.cancel.cancel();
        match &termination {
            Termination::Failed(e) => tracing::warn!("Stream terminated: {}", e),
            Termination::TransportFailed(reason) => {
                tracing::info!("Stream lost its transport: {}", reason)
            }
            other => tracing::debug!("Stream closed: {}", other),
        }
        self.mux.close(&termination.to_string()).await;
        self.state.send_replace(StreamState::Closed);
        true
    }

    pub(crate) async fn closed(&self) -> Termination {
        let mut state = self.state.subscribe();
        // The sender lives as long as `self`, so this only returns once closed.
        let _ = state.wait_for(|s| *s == StreamState::Closed).await;
        self.termination().unwrap_or(Termination::Completed)
    }

    pub(crate) async fn send_payload(&self, payload: T) -> LifelineResult<()> {
        if self.state() != StreamState::Open {
            return Err(LifelineError::StreamClosed);
        }
        if let Err(e) = self.mux.send(Outbound::Payload(payload)).await {
            self.terminate(Termination::from_error(e.clone())).await;
            return Err(e);
        }
        Ok(())
    }

    async fn handle_heartbeat(&self, heartbeat: HeartbeatMessage) -> LifelineResult<()> {
        let now = self.clock.now();
        match heartbeat {
            HeartbeatMessage::Probe { issued_at } => {
                if self.limiter.admit(&self.id, now) == Admission::Rejected {
                    let limit = self.limiter.limit();
                    return Err(LifelineError::RateLimitExceeded {
                        max_probes: limit.max_probes,
                        window: limit.window,
                    });
                }
                if let Some(inbound) = &self.inbound {
                    inbound
                        .lock()
                        .await
                        .on_probe_received(self.clock.wall(now), now)?;
                    self.deadline_changed.notify_one();
                }
                tracing::trace!("Answering probe issued at {}", issued_at);
                let reply = HeartbeatMessage::reply_to(issued_at, self.clock.wall(now));
                self.mux.send(Outbound::Heartbeat(reply)).await
            }
            HeartbeatMessage::Reply {
                probe_issued_at,
                responded_at,
            } => {
                let matched = match &self.outbound {
                    Some(outbound) => {
                        outbound
                            .lock()
                            .await
                            .on_reply_received(probe_issued_at, responded_at, now)
                    }
                    None => Err(LifelineError::StaleOrMismatchedReply),
                };
                match matched {
                    Ok(round_trip) => {
                        tracing::trace!("Probe answered after {:?}", round_trip);
                        self.deadline_changed.notify_one();
                        Ok(())
                    }
                    Err(LifelineError::StaleOrMismatchedReply) => {
                        tracing::warn!(
                            "Ignoring reply to unknown probe issued at {}",
                            probe_issued_at
                        );
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Spawns the receive loop, the ping scheduler and the deadline watch of a
/// freshly created stream. All of them stop on the stream's cancellation token.
pub(crate) fn spawn_tasks<T: Payload>(
    shared: &Arc<StreamShared<T>>,
    config: &LivenessConfig,
    payloads: mpsc::Sender<T>,
) {
    let span = tracing::info_span!("stream", id = %shared.id, role = %shared.role);

    spawn_supervised(shared, span.clone(), receive_loop(shared.clone(), payloads));

    if let Some(outbound) = &shared.outbound {
        let scheduler = PingScheduler::new(
            config.ping_interval,
            shared.clock,
            outbound.clone(),
            shared.deadline_changed.clone(),
            shared.cancel.clone(),
        );
        let stream = shared.clone();
        spawn_supervised(shared, span.clone(), async move {
            let sender = stream.clone();
            let result = scheduler
                .run(move |probe| {
                    let sender = sender.clone();
                    async move { sender.mux.send(Outbound::Heartbeat(probe)).await }
                })
                .await;
            if let Err(e) = result {
                stream.terminate(Termination::from_error(e)).await;
            }
        });
    }

    let trackers: Vec<Arc<Mutex<LivenessTracker>>> = shared
        .outbound
        .iter()
        .chain(shared.inbound.iter())
        .cloned()
        .collect();
    if !trackers.is_empty() {
        let watch = DeadlineWatch::new(
            trackers,
            shared.deadline_changed.clone(),
            shared.cancel.clone(),
        );
        let stream = shared.clone();
        spawn_supervised(shared, span, async move {
            if let Err(e) = watch.run().await {
                stream.terminate(Termination::Failed(e)).await;
            }
        });
    }
}

/// Runs one stream task. A panic fails the stream instead of leaving it open
/// without the task.
fn spawn_supervised<T, F>(shared: &Arc<StreamShared<T>>, span: tracing::Span, task: F)
where
    T: Payload,
    F: Future<Output = ()> + Send + 'static,
{
    let stream = shared.clone();
    tokio::spawn(
        async move {
            if AssertUnwindSafe(task).catch_unwind().await.is_err() {
                tracing::error!("Stream task panicked");
                stream
                    .terminate(Termination::Failed(LifelineError::Generic(
                        "stream task panicked".to_string(),
                    )))
                    .await;
                stream.limiter.release(&stream.id);
            }
        }
        .instrument(span),
    );
}

async fn receive_loop<T: Payload>(shared: Arc<StreamShared<T>>, payloads: mpsc::Sender<T>) {
    loop {
        let received = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            received = shared.mux.receive() => received,
        };
        let outcome = match received {
            Ok(Some(Inbound::Payload(payload))) => {
                tokio::select! {
                    biased;
                    _ = shared.cancel.cancelled() => break,
                    sent = payloads.send(payload) => {
                        if sent.is_err() {
                            tracing::trace!("Payload dropped, no receiver");
                        }
                        Ok(())
                    }
                }
            }
            Ok(Some(Inbound::Heartbeat(heartbeat))) => shared.handle_heartbeat(heartbeat).await,
            Ok(None) => {
                shared.terminate(Termination::RemoteClosed).await;
                break;
            }
            Err(e) => Err(e),
        };
        if let Err(e) = outcome {
            shared.terminate(Termination::from_error(e)).await;
            break;
        }
    }
    // Covers cancellation through a dropped handle, where nothing else closed it.
    shared.terminate(Termination::Completed).await;
    shared.limiter.release(&shared.id);
}
