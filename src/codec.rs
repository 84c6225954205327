use crate::envelope::{Envelope, Payload};
use crate::errors::LifelineResult;

pub fn encode<T: Payload>(envelope: &Envelope<T>) -> LifelineResult<Vec<u8>> {
    Ok(bincode::serialize(envelope)?)
}

pub fn decode<T: Payload>(frame: &[u8]) -> LifelineResult<Envelope<T>> {
    Ok(bincode::deserialize(frame)?)
}
