use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use time::OffsetDateTime;

/// Application payloads carried on a liveness-monitored stream.
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

impl<T> Payload for T where T: Serialize + DeserializeOwned + Send + Sync + Debug + 'static {}

/// Protocol heartbeat, carried inside the payload stream so intermediaries
/// forward it like any other message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeartbeatMessage {
    Probe {
        issued_at: OffsetDateTime,
    },
    Reply {
        probe_issued_at: OffsetDateTime,
        responded_at: OffsetDateTime,
    },
}

impl HeartbeatMessage {
    pub fn probe(issued_at: OffsetDateTime) -> Self {
        HeartbeatMessage::Probe { issued_at }
    }

    /// Reply echoing the exact issue time of the probe it answers.
    pub fn reply_to(probe_issued_at: OffsetDateTime, responded_at: OffsetDateTime) -> Self {
        HeartbeatMessage::Reply {
            probe_issued_at,
            responded_at,
        }
    }
}

/// The single unit written to the transport. Exactly one content variant is
/// populated per envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub content: Content<T>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Content<T> {
    /// Payload travelling from the initiator to the responder.
    Request(T),
    /// Payload travelling from the responder to the initiator.
    Response(T),
    Ping {
        timestamp: OffsetDateTime,
    },
    Pong {
        original_timestamp: OffsetDateTime,
        responder_timestamp: OffsetDateTime,
    },
}

impl<T> Envelope<T> {
    pub fn new(content: Content<T>) -> Self {
        Self { content }
    }

    pub fn request(payload: T) -> Self {
        Self::new(Content::Request(payload))
    }

    pub fn response(payload: T) -> Self {
        Self::new(Content::Response(payload))
    }

    pub fn heartbeat(message: HeartbeatMessage) -> Self {
        Self::new(message.into())
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self.content, Content::Ping { .. } | Content::Pong { .. })
    }
}

impl<T> From<HeartbeatMessage> for Content<T> {
    fn from(value: HeartbeatMessage) -> Self {
        match value {
            HeartbeatMessage::Probe { issued_at } => Content::Ping {
                timestamp: issued_at,
            },
            HeartbeatMessage::Reply {
                probe_issued_at,
                responded_at,
            } => Content::Pong {
                original_timestamp: probe_issued_at,
                responder_timestamp: responded_at,
            },
        }
    }
}
