use crate::config::RateLimit;
use crate::stream::StreamId;
use dashmap::DashMap;
use std::collections::VecDeque;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Admission {
    Admitted,
    Rejected,
}

/// Sliding window of admitted probe arrivals for one stream.
#[derive(Clone, Debug, Default)]
pub struct RateWindow {
    admitted: VecDeque<Instant>,
}

impl RateWindow {
    pub fn admit(&mut self, limit: &RateLimit, now: Instant) -> Admission {
        while let Some(oldest) = self.admitted.front() {
            if now.saturating_duration_since(*oldest) >= limit.window {
                self.admitted.pop_front();
            } else {
                break;
            }
        }
        if self.admitted.len() < limit.max_probes {
            self.admitted.push_back(now);
            Admission::Admitted
        } else {
            Admission::Rejected
        }
    }

    /// Probes counted in the window as of the last admission check.
    pub fn len(&self) -> usize {
        self.admitted.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }
}

/// Rate windows of every stream on an endpoint, under one read-only limit.
#[derive(Debug)]
pub struct ProbeRateLimiter {
    limit: RateLimit,
    windows: DashMap<StreamId, RateWindow>,
}

impl ProbeRateLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            windows: DashMap::new(),
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    pub fn admit(&self, stream: &StreamId, now: Instant) -> Admission {
        self.windows
            .entry(*stream)
            .or_default()
            .admit(&self.limit, now)
    }

    pub fn register(&self, stream: &StreamId) {
        self.windows.entry(*stream).or_default();
    }

    pub fn release(&self, stream: &StreamId) {
        self.windows.remove(stream);
    }

    pub fn tracked_streams(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn limit() -> RateLimit {
        RateLimit {
            max_probes: 10,
            window: Duration::from_secs(10),
        }
    }

    #[test]
    fn test_ten_probes_in_five_seconds_then_reject() {
        let start = Instant::now();
        let mut window = RateWindow::default();
        for i in 0..10 {
            let now = start + Duration::from_millis(500 * i);
            assert_eq!(window.admit(&limit(), now), Admission::Admitted);
        }
        assert_eq!(
            window.admit(&limit(), start + Duration::from_secs(6)),
            Admission::Rejected
        );
        assert_eq!(window.len(), 10);
    }

    #[test]
    fn test_window_slides() {
        let start = Instant::now();
        let mut window = RateWindow::default();
        for i in 0..10 {
            assert_eq!(
                window.admit(&limit(), start + Duration::from_secs(i)),
                Admission::Admitted
            );
        }
        // The probe at t=0 has left the window.
        assert_eq!(
            window.admit(&limit(), start + Duration::from_secs(10)),
            Admission::Admitted
        );
        assert_eq!(
            window.admit(&limit(), start + Duration::from_millis(10_500)),
            Admission::Rejected
        );
    }

    #[test]
    fn test_cadence_traffic_is_always_admitted() {
        let start = Instant::now();
        let mut window = RateWindow::default();
        for i in 0..100 {
            assert_eq!(
                window.admit(&limit(), start + Duration::from_secs(10 * i)),
                Admission::Admitted
            );
        }
        assert_eq!(window.len(), 1);
    }

    #[test]
    fn test_streams_are_limited_independently() {
        let limiter = ProbeRateLimiter::new(limit());
        let first = StreamId::new();
        let second = StreamId::new();
        let now = Instant::now();
        for _ in 0..10 {
            assert_eq!(limiter.admit(&first, now), Admission::Admitted);
        }
        assert_eq!(limiter.admit(&first, now), Admission::Rejected);
        assert_eq!(limiter.admit(&second, now), Admission::Admitted);
        assert_eq!(limiter.tracked_streams(), 2);

        limiter.release(&first);
        assert_eq!(limiter.tracked_streams(), 1);
        assert_eq!(limiter.admit(&first, now), Admission::Admitted);
    }

    #[test]
    fn test_concurrent_admission_never_exceeds_limit() {
        let limiter = ProbeRateLimiter::new(limit());
        let stream = StreamId::new();
        let now = Instant::now();
        let admitted: usize = std::thread::scope(|scope| {
            let workers: Vec<_> = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        (0..10)
                            .filter(|_| limiter.admit(&stream, now) == Admission::Admitted)
                            .count()
                    })
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(admitted, 10);
        assert_eq!(limiter.tracked_streams(), 1);
    }
}
