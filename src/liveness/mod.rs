use crate::errors::LifelineResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub mod rate_limiter;
pub mod scheduler;
pub mod tracker;

pub use rate_limiter::{Admission, ProbeRateLimiter, RateWindow};
pub use scheduler::PingScheduler;
pub use tracker::{LivenessPhase, LivenessState, LivenessTracker, OutstandingProbe};

/// Which half of the heartbeat exchange a tracker watches.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Direction {
    /// This endpoint probes and waits for replies.
    Outbound,
    /// The peer probes and this endpoint waits for its probes.
    Inbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Outbound => write!(f, "outbound"),
            Direction::Inbound => write!(f, "inbound"),
        }
    }
}

/// Sleeps until the earliest deadline among a stream's trackers and reports
/// the first one that expires. Re-arms whenever a tracker signals that its
/// deadline moved.
pub struct DeadlineWatch {
    trackers: Vec<Arc<Mutex<LivenessTracker>>>,
    deadline_changed: Arc<Notify>,
    cancel: CancellationToken,
}

impl DeadlineWatch {
    pub fn new(
        trackers: Vec<Arc<Mutex<LivenessTracker>>>,
        deadline_changed: Arc<Notify>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            trackers,
            deadline_changed,
            cancel,
        }
    }

    async fn earliest_deadline(&self) -> Option<Instant> {
        let mut earliest: Option<Instant> = None;
        for tracker in &self.trackers {
            if let Some(deadline) = tracker.lock().await.deadline() {
                earliest = Some(earliest.map_or(deadline, |current| current.min(deadline)));
            }
        }
        earliest
    }

    /// Returns `Ok` when cancelled, or the timeout of the tracker that died.
    pub async fn run(self) -> LifelineResult<()> {
        loop {
            let deadline = self.earliest_deadline().await;
            let expiry = async move {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                _ = self.deadline_changed.notified() => continue,
                _ = expiry => {
                    let now = Instant::now();
                    for tracker in &self.trackers {
                        tracker.lock().await.expire(now)?;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LifelineError;
    use std::time::Duration;
    use time::OffsetDateTime;

    #[tokio::test(start_paused = true)]
    async fn test_watch_reports_expired_probe_at_deadline() {
        let start = Instant::now();
        let tracker = Arc::new(Mutex::new(LivenessTracker::outbound(Duration::from_secs(15))));
        let notify = Arc::new(Notify::new());
        let watch = DeadlineWatch::new(
            vec![tracker.clone()],
            notify.clone(),
            CancellationToken::new(),
        );
        let task = tokio::spawn(watch.run());

        tokio::time::sleep(Duration::from_secs(10)).await;
        tracker
            .lock()
            .await
            .on_probe_sent(OffsetDateTime::now_utc(), Instant::now())
            .unwrap();
        notify.notify_one();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(LifelineError::LivenessTimeout {
                direction: Direction::Outbound,
                ..
            })
        ));
        assert!(start.elapsed() >= Duration::from_secs(25));
        assert!(start.elapsed() < Duration::from_secs(26));
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_stops_on_cancel() {
        let cancel = CancellationToken::new();
        let tracker = Arc::new(Mutex::new(
            LivenessTracker::inbound(Duration::from_secs(30), Instant::now()).unwrap(),
        ));
        let task = tokio::spawn(
            DeadlineWatch::new(vec![tracker.clone()], Arc::new(Notify::new()), cancel.clone())
                .run(),
        );
        tokio::time::sleep(Duration::from_secs(5)).await;
        cancel.cancel();
        assert_eq!(task.await.unwrap(), Ok(()));
        assert_eq!(tracker.lock().await.phase(), LivenessPhase::Idle);
    }
}
