use time::OffsetDateTime;
use tokio::time::Instant;

/// Pairs the monotonic clock used for deadlines with the wall-clock timestamps
/// carried inside heartbeat messages.
///
/// Wall-clock values are derived from a fixed origin, so they advance exactly
/// as the monotonic clock does (including under tokio's paused test clock) and
/// two probes issued at different instants never share a timestamp.
#[derive(Clone, Copy, Debug)]
pub struct LivenessClock {
    origin: Instant,
    origin_wall: OffsetDateTime,
}

impl LivenessClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_wall: OffsetDateTime::now_utc(),
        }
    }

    pub fn now(&self) -> Instant {
        Instant::now()
    }

    /// Wall-clock timestamp for a monotonic instant taken from this clock.
    pub fn wall(&self, at: Instant) -> OffsetDateTime {
        self.origin_wall + at.saturating_duration_since(self.origin)
    }
}

impl Default for LivenessClock {
    fn default() -> Self {
        Self::new()
    }
}
