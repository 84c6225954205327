use std::time::Duration;

pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(15);

// Matches one probe per ping interval with slack for client jitter.
pub const DEFAULT_MAX_PROBES: usize = 10;
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(10);

/// Longest accepted reply, inactivity or rate window duration.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

pub(crate) const INBOUND_CHANNEL_CAPACITY: usize = 64;

/// Upper bound on a single encoded envelope on length-delimited transports.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;
