use crate::codec;
use crate::envelope::{Content, Envelope, HeartbeatMessage, Payload};
use crate::errors::{LifelineError, LifelineResult};
use crate::stream::Role;
use crate::transport::FrameTransport;
use std::marker::PhantomData;
use std::sync::Arc;

/// Something to put on the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound<T> {
    Payload(T),
    Heartbeat(HeartbeatMessage),
}

/// Something taken off the stream, tagged by kind.
#[derive(Clone, Debug, PartialEq)]
pub enum Inbound<T> {
    Payload(T),
    Heartbeat(HeartbeatMessage),
}

/// Carries payload and heartbeat messages over one transport.
///
/// Payloads are wrapped as `Request` when sent by the initiator and as
/// `Response` when sent by the responder; a payload of the wrong kind for the
/// local role is a protocol violation.
#[derive(Debug)]
pub struct StreamMultiplexer<T> {
    transport: Arc<dyn FrameTransport>,
    role: Role,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Payload> StreamMultiplexer<T> {
    pub fn new(transport: Arc<dyn FrameTransport>, role: Role) -> Self {
        Self {
            transport,
            role,
            _payload: PhantomData,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn wrap(&self, message: Outbound<T>) -> Envelope<T> {
        match (message, self.role) {
            (Outbound::Payload(payload), Role::Initiator) => Envelope::request(payload),
            (Outbound::Payload(payload), Role::Responder) => Envelope::response(payload),
            (Outbound::Heartbeat(heartbeat), _) => Envelope::heartbeat(heartbeat),
        }
    }

    fn unwrap(&self, envelope: Envelope<T>) -> LifelineResult<Inbound<T>> {
        match (envelope.content, self.role) {
            (Content::Response(payload), Role::Initiator)
            | (Content::Request(payload), Role::Responder) => Ok(Inbound::Payload(payload)),
            (Content::Request(_), Role::Initiator) => Err(LifelineError::UnexpectedContent(
                "initiator received a request".to_string(),
            )),
            (Content::Response(_), Role::Responder) => Err(LifelineError::UnexpectedContent(
                "responder received a response".to_string(),
            )),
            (Content::Ping { timestamp }, _) => {
                Ok(Inbound::Heartbeat(HeartbeatMessage::probe(timestamp)))
            }
            (
                Content::Pong {
                    original_timestamp,
                    responder_timestamp,
                },
                _,
            ) => Ok(Inbound::Heartbeat(HeartbeatMessage::reply_to(
                original_timestamp,
                responder_timestamp,
            ))),
        }
    }

    /// Sends one message as a single frame.
    pub async fn send(&self, message: Outbound<T>) -> LifelineResult<()> {
        let frame = codec::encode(&self.wrap(message))?;
        self.transport.send_frame(frame).await?;
        Ok(())
    }

    /// Next inbound message, or `None` once the remote end has finished.
    pub async fn receive(&self) -> LifelineResult<Option<Inbound<T>>> {
        match self.transport.receive_frame().await? {
            Some(frame) => self.unwrap(codec::decode(&frame)?).map(Some),
            None => Ok(None),
        }
    }

    pub async fn close(&self, reason: &str) {
        self.transport.close(reason).await
    }
}
