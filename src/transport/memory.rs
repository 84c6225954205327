use crate::transport::{FrameTransport, TransportError};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// One direction of an in-process link.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Leg {
    AToB,
    BToA,
}

#[derive(Clone, Debug, Default)]
pub struct LinkConfig {
    a_to_b_latency: Duration,
    b_to_a_latency: Duration,
}

impl LinkConfig {
    pub fn with_latency(mut self, leg: Leg, latency: Duration) -> Self {
        match leg {
            Leg::AToB => self.a_to_b_latency = latency,
            Leg::BToA => self.b_to_a_latency = latency,
        }
        self
    }
}

#[derive(Debug, Default)]
struct LegState {
    stalled: AtomicBool,
    resumed: Notify,
}

impl LegState {
    fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Acquire)
    }
}

/// Behaves like an intermediary sitting on the link.
///
/// A stalled leg accepts frames from the sender without error but delivers
/// nothing, and it hides the sender closing, until the leg is resumed.
#[derive(Clone, Debug)]
pub struct LinkControl {
    a_to_b: Arc<LegState>,
    b_to_a: Arc<LegState>,
}

impl LinkControl {
    fn leg(&self, leg: Leg) -> &LegState {
        match leg {
            Leg::AToB => &self.a_to_b,
            Leg::BToA => &self.b_to_a,
        }
    }

    pub fn stall(&self, leg: Leg) {
        tracing::debug!("Stalling {:?}", leg);
        self.leg(leg).stalled.store(true, Ordering::Release);
    }

    /// Deliver every held frame in order and resume normal forwarding.
    pub fn resume(&self, leg: Leg) {
        tracing::debug!("Resuming {:?}", leg);
        let state = self.leg(leg);
        state.stalled.store(false, Ordering::Release);
        state.resumed.notify_one();
    }
}

type TimedFrame = (Instant, Vec<u8>);

/// One end of an in-process link created by [`memory_pair`].
#[derive(Debug)]
pub struct MemoryTransport {
    outbound: std::sync::Mutex<Option<UnboundedSender<TimedFrame>>>,
    inbound: Mutex<UnboundedReceiver<Vec<u8>>>,
    close_reason: std::sync::Mutex<Option<String>>,
}

impl MemoryTransport {
    fn new(outbound: UnboundedSender<TimedFrame>, inbound: UnboundedReceiver<Vec<u8>>) -> Self {
        Self {
            outbound: std::sync::Mutex::new(Some(outbound)),
            inbound: Mutex::new(inbound),
            close_reason: std::sync::Mutex::new(None),
        }
    }

    fn release_outbound(&self, reason: &str) {
        if let Ok(mut outbound) = self.outbound.lock() {
            outbound.take();
        }
        if let Ok(mut close_reason) = self.close_reason.lock() {
            close_reason.get_or_insert_with(|| reason.to_string());
        }
    }

    /// Reason given to the first `close` call, if any.
    pub fn close_reason(&self) -> Option<String> {
        self.close_reason
            .lock()
            .map(|reason| reason.clone())
            .unwrap_or_default()
    }
}

/// Creates two connected transports. Must be called from within a tokio runtime.
pub fn memory_pair(config: LinkConfig) -> (MemoryTransport, MemoryTransport, LinkControl) {
    let control = LinkControl {
        a_to_b: Arc::new(LegState::default()),
        b_to_a: Arc::new(LegState::default()),
    };

    let (a_out, a_to_b_upstream) = unbounded_channel();
    let (a_to_b_downstream, b_in) = unbounded_channel();
    let (b_out, b_to_a_upstream) = unbounded_channel();
    let (b_to_a_downstream, a_in) = unbounded_channel();

    tokio::spawn(forward(
        a_to_b_upstream,
        a_to_b_downstream,
        config.a_to_b_latency,
        control.a_to_b.clone(),
    ));
    tokio::spawn(forward(
        b_to_a_upstream,
        b_to_a_downstream,
        config.b_to_a_latency,
        control.b_to_a.clone(),
    ));

    (
        MemoryTransport::new(a_out, a_in),
        MemoryTransport::new(b_out, b_in),
        control,
    )
}

fn flush(held: &mut VecDeque<Vec<u8>>, downstream: &UnboundedSender<Vec<u8>>) -> bool {
    while let Some(frame) = held.pop_front() {
        if downstream.send(frame).is_err() {
            return false;
        }
    }
    true
}

async fn forward(
    mut upstream: UnboundedReceiver<TimedFrame>,
    downstream: UnboundedSender<Vec<u8>>,
    latency: Duration,
    leg: Arc<LegState>,
) {
    let mut held: VecDeque<Vec<u8>> = VecDeque::new();
    loop {
        tokio::select! {
            frame = upstream.recv() => match frame {
                Some((sent_at, frame)) => {
                    if leg.is_stalled() {
                        held.push_back(frame);
                        continue;
                    }
                    tokio::time::sleep_until(sent_at + latency).await;
                    // Stalled while in flight.
                    if leg.is_stalled() {
                        held.push_back(frame);
                        continue;
                    }
                    held.push_back(frame);
                    if !flush(&mut held, &downstream) {
                        break;
                    }
                }
                None => {
                    while leg.is_stalled() {
                        leg.resumed.notified().await;
                    }
                    flush(&mut held, &downstream);
                    break;
                }
            },
            _ = leg.resumed.notified(), if !held.is_empty() => {
                if !leg.is_stalled() && !flush(&mut held, &downstream) {
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl FrameTransport for MemoryTransport {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError> {
        let outbound = self.outbound.lock().map_err(|_| TransportError::Closed)?;
        match outbound.as_ref() {
            Some(sender) => sender
                .send((Instant::now(), frame))
                .map_err(|_| TransportError::Closed),
            None => Err(TransportError::Closed),
        }
    }

    async fn receive_frame(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut inbound = self.inbound.lock().await;
        Ok(inbound.recv().await)
    }

    async fn close(&self, reason: &str) {
        self.release_outbound(reason);
        self.inbound.lock().await.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_frames_arrive_in_order_after_latency() -> Result<(), TransportError> {
        let (a, b, _link) =
            memory_pair(LinkConfig::default().with_latency(Leg::AToB, Duration::from_secs(3)));
        let start = Instant::now();
        a.send_frame(vec![1]).await?;
        a.send_frame(vec![2]).await?;

        assert_eq!(b.receive_frame().await?, Some(vec![1]));
        assert_eq!(b.receive_frame().await?, Some(vec![2]));
        assert!(start.elapsed() >= Duration::from_secs(3));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_leg_absorbs_frames_and_close() -> Result<(), TransportError> {
        let (a, b, link) = memory_pair(LinkConfig::default());
        link.stall(Leg::BToA);

        // The sender sees no failure while the intermediary holds its frames.
        b.send_frame(vec![7]).await?;
        b.close("gone").await;
        let pending = tokio::time::timeout(Duration::from_secs(60), a.receive_frame()).await;
        assert!(pending.is_err());

        link.resume(Leg::BToA);
        assert_eq!(a.receive_frame().await?, Some(vec![7]));
        assert_eq!(a.receive_frame().await?, None);
        assert_eq!(b.close_reason().as_deref(), Some("gone"));
        Ok(())
    }

    #[tokio::test]
    async fn test_send_after_close_fails() {
        let (a, _b, _link) = memory_pair(LinkConfig::default());
        a.close("done").await;
        a.close("again").await;
        assert!(matches!(
            a.send_frame(vec![1]).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(a.close_reason().as_deref(), Some("done"));
    }
}
