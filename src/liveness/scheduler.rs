use crate::clock::LivenessClock;
use crate::envelope::HeartbeatMessage;
use crate::errors::{LifelineError, LifelineResult};
use crate::liveness::tracker::LivenessTracker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Emits probes on a fixed cadence for one stream.
///
/// The first probe goes out immediately. A tick that finds the previous probe
/// still unanswered is skipped, so probes never pile up.
pub struct PingScheduler {
    cadence: Duration,
    clock: LivenessClock,
    tracker: Arc<Mutex<LivenessTracker>>,
    deadline_changed: Arc<Notify>,
    cancel: CancellationToken,
}

impl PingScheduler {
    pub fn new(
        cadence: Duration,
        clock: LivenessClock,
        tracker: Arc<Mutex<LivenessTracker>>,
        deadline_changed: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            cadence,
            clock,
            tracker,
            deadline_changed,
            cancel,
        }
    }

    /// Runs until cancelled. Returns an error when the tracker has already
    /// declared the peer dead or when `send_probe` fails.
    pub async fn run<F, Fut>(self, mut send_probe: F) -> LifelineResult<()>
    where
        F: FnMut(HeartbeatMessage) -> Fut,
        Fut: Future<Output = LifelineResult<()>>,
    {
        let mut ticker = tokio::time::interval(self.cadence);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let now = self.clock.now();
            let issued_at = self.clock.wall(now);
            let registered = self.tracker.lock().await.on_probe_sent(issued_at, now);
            match registered {
                Ok(()) => self.deadline_changed.notify_one(),
                Err(LifelineError::ProbeOutstanding) => {
                    tracing::trace!("Previous probe still outstanding, skipping tick");
                    continue;
                }
                Err(e) => return Err(e),
            }

            tracing::trace!("Sending probe issued at {}", issued_at);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                sent = send_probe(HeartbeatMessage::probe(issued_at)) => sent?,
            }
        }
    }
}
