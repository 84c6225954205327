use crate::errors::{LifelineError, LifelineResult};
use crate::liveness::Direction;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LivenessPhase {
    /// No deadline pending on the outbound direction, or the inbound direction
    /// is waiting for the next probe.
    Idle,
    AwaitingReply,
    /// Terminal.
    Dead,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct OutstandingProbe {
    pub issued_at: OffsetDateTime,
    pub sent_at: Instant,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LivenessState {
    pub last_probe_sent_at: Option<OffsetDateTime>,
    pub last_reply_received_at: Option<OffsetDateTime>,
    pub outstanding_probe: Option<OutstandingProbe>,
    pub timeout_deadline: Option<Instant>,
}

/// Liveness verdict for one direction of one stream.
///
/// An outbound tracker times probe/reply round trips: a probe arms
/// `timeout_deadline`, the matching reply disarms it. An inbound tracker
/// watches probes arriving from the peer: each probe pushes the inactivity
/// deadline forward. In both cases reaching the deadline moves the tracker to
/// `Dead`, from which it never recovers.
#[derive(Clone, Debug)]
pub struct LivenessTracker {
    direction: Direction,
    phase: LivenessPhase,
    state: LivenessState,
    timeout: Duration,
}

impl LivenessTracker {
    pub fn outbound(reply_timeout: Duration) -> Self {
        Self {
            direction: Direction::Outbound,
            phase: LivenessPhase::Idle,
            state: LivenessState::default(),
            timeout: reply_timeout,
        }
    }

    /// The inactivity clock starts running immediately.
    pub fn inbound(inactivity_timeout: Duration, now: Instant) -> LifelineResult<Self> {
        let mut tracker = Self {
            direction: Direction::Inbound,
            phase: LivenessPhase::Idle,
            state: LivenessState::default(),
            timeout: inactivity_timeout,
        };
        tracker.state.timeout_deadline = Some(tracker.deadline_from(now)?);
        Ok(tracker)
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn phase(&self) -> LivenessPhase {
        self.phase
    }

    pub fn state(&self) -> &LivenessState {
        &self.state
    }

    pub fn is_dead(&self) -> bool {
        self.phase == LivenessPhase::Dead
    }

    pub fn deadline(&self) -> Option<Instant> {
        match self.phase {
            LivenessPhase::Dead => None,
            _ => self.state.timeout_deadline,
        }
    }

    fn deadline_from(&self, now: Instant) -> LifelineResult<Instant> {
        now.checked_add(self.timeout).ok_or_else(|| {
            LifelineError::InvalidConfig(format!(
                "{} timeout {:?} is out of range",
                self.direction, self.timeout
            ))
        })
    }

    fn timed_out(&mut self) -> LifelineError {
        self.phase = LivenessPhase::Dead;
        self.state.timeout_deadline = None;
        LifelineError::LivenessTimeout {
            direction: self.direction,
            waited: self.timeout,
        }
    }

    fn expect_direction(&self, direction: Direction) -> LifelineResult<()> {
        if self.direction != direction {
            crate::lifeline_bail!(
                Generic,
                "operation requires an {} tracker, this one is {}",
                direction,
                self.direction
            );
        }
        Ok(())
    }

    /// Registers a freshly issued probe. Refuses while another probe is still
    /// within its deadline.
    pub fn on_probe_sent(&mut self, issued_at: OffsetDateTime, now: Instant) -> LifelineResult<()> {
        self.expect_direction(Direction::Outbound)?;
        if self.is_dead() {
            return Err(LifelineError::LivenessTimeout {
                direction: self.direction,
                waited: self.timeout,
            });
        }
        if self.state.outstanding_probe.is_some() {
            return match self.state.timeout_deadline {
                Some(deadline) if now >= deadline => Err(self.timed_out()),
                _ => Err(LifelineError::ProbeOutstanding),
            };
        }
        let deadline = self.deadline_from(now)?;
        self.state.outstanding_probe = Some(OutstandingProbe {
            issued_at,
            sent_at: now,
        });
        self.state.last_probe_sent_at = Some(issued_at);
        self.state.timeout_deadline = Some(deadline);
        self.phase = LivenessPhase::AwaitingReply;
        Ok(())
    }

    /// Matches a reply against the outstanding probe and returns the round
    /// trip time. Anything else is reported as stale and changes nothing.
    pub fn on_reply_received(
        &mut self,
        probe_issued_at: OffsetDateTime,
        responded_at: OffsetDateTime,
        now: Instant,
    ) -> LifelineResult<Duration> {
        self.expect_direction(Direction::Outbound)?;
        if self.is_dead() {
            return Err(LifelineError::StaleOrMismatchedReply);
        }
        match self.state.outstanding_probe {
            Some(outstanding) if outstanding.issued_at == probe_issued_at => {
                self.state.outstanding_probe = None;
                self.state.timeout_deadline = None;
                self.state.last_reply_received_at = Some(responded_at);
                self.phase = LivenessPhase::Idle;
                Ok(now.saturating_duration_since(outstanding.sent_at))
            }
            _ => Err(LifelineError::StaleOrMismatchedReply),
        }
    }

    /// Records a probe from the peer and restarts the inactivity clock.
    pub fn on_probe_received(
        &mut self,
        received_at: OffsetDateTime,
        now: Instant,
    ) -> LifelineResult<()> {
        if self.direction != Direction::Inbound || self.is_dead() {
            return Ok(());
        }
        let deadline = self.deadline_from(now)?;
        self.state.last_probe_sent_at = Some(received_at);
        self.state.timeout_deadline = Some(deadline);
        Ok(())
    }

    /// Moves to `Dead` when the deadline has been reached.
    pub fn expire(&mut self, now: Instant) -> LifelineResult<()> {
        if self.is_dead() {
            return Err(LifelineError::LivenessTimeout {
                direction: self.direction,
                waited: self.timeout,
            });
        }
        let Some(deadline) = self.state.timeout_deadline else {
            return Ok(());
        };
        if now < deadline {
            return Ok(());
        }
        match self.direction {
            Direction::Outbound if self.state.outstanding_probe.is_none() => Ok(()),
            _ => Err(self.timed_out()),
        }
    }
}
