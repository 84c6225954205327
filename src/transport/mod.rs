use async_trait::async_trait;
use std::fmt::Debug;
use thiserror::Error;

pub mod memory;
pub mod tcp;

pub use memory::{memory_pair, Leg, LinkConfig, LinkControl, MemoryTransport};
pub use tcp::TcpTransport;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to connect: {0}")]
    ConnectionError(String),
    #[error("Frame of {0} bytes exceeds the frame limit")]
    FrameTooLarge(usize),
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Transport closed")]
    Closed,
}

/// Ordered, reliable, bidirectional frame transport underneath a stream.
///
/// Implementations serialize concurrent `send_frame` calls so frames are never
/// interleaved. `receive_frame` has a single consumer and returns `Ok(None)` once
/// the remote end has finished.
#[async_trait]
pub trait FrameTransport: Send + Sync + Debug {
    async fn send_frame(&self, frame: Vec<u8>) -> Result<(), TransportError>;

    async fn receive_frame(&self) -> Result<Option<Vec<u8>>, TransportError>;

    /// Stop sending and release the connection. Closing twice is harmless.
    async fn close(&self, reason: &str);
}
