pub mod clock;
pub mod codec;
pub mod config;
pub mod consts;
pub mod envelope;
pub mod errors;
pub mod liveness;
pub mod multiplexer;
pub mod stream;
pub mod transport;
mod utils;

pub use config::{LivenessConfig, ProbingMode, RateLimit};
pub use envelope::{Content, Envelope, HeartbeatMessage, Payload};
pub use errors::{LifelineError, LifelineResult};
pub use stream::{
    Endpoint, LivenessStream, PayloadReceiver, Role, StreamHandle, StreamId, StreamState,
    Termination,
};

// Liveness over an opaque payload stream:
// [Ping Scheduler] => [Multiplexer] => peer [Multiplexer] => [Rate Limiter] => [Tracker] => reply
// Heartbeats share the payload envelope, so intermediaries forward them like any payload.
