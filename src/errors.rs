use crate::liveness::Direction;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub type LifelineResult<T> = Result<T, LifelineError>;

#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum LifelineError {
    #[error("Generic: {0}")]
    Generic(String),

    #[error("Liveness timeout on {direction} direction after {waited:?}")]
    LivenessTimeout { direction: Direction, waited: Duration },

    #[error("Peer exceeded {max_probes} probes per {window:?}")]
    RateLimitExceeded { max_probes: usize, window: Duration },

    #[error("Reply does not match any outstanding probe")]
    StaleOrMismatchedReply,

    #[error("A probe is already outstanding")]
    ProbeOutstanding,

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Unexpected content: {0}")]
    UnexpectedContent(String),

    #[error("Codec: {0}")]
    Codec(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Stream is closed")]
    StreamClosed,
}

impl LifelineError {
    /// Whether this error ends the stream it was raised on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            LifelineError::StaleOrMismatchedReply | LifelineError::ProbeOutstanding
        )
    }
}

#[macro_export]
macro_rules! lifeline_bail {
    ($err:ident, $msg:literal $(,)?) => {
        return Err($crate::errors::LifelineError::$err($msg.to_owned()))
    };
    ($err:ident, $fmt:expr, $($arg:tt)*) => {
        return Err($crate::errors::LifelineError::$err(format!($fmt, $($arg)*)))
    };
}

macro_rules! lifeline_error_from {
    ($err:ty, $lifeline_err:ident, $func:expr) => {
        impl From<$err> for LifelineError {
            fn from(value: $err) -> Self {
                LifelineError::$lifeline_err($func(value))
            }
        }
    };
    ($err:ty, $lifeline_err:ident) => {
        impl From<$err> for LifelineError {
            fn from(value: $err) -> Self {
                LifelineError::$lifeline_err(value.to_string())
            }
        }
    };
}

lifeline_error_from!(bincode::Error, Codec);
lifeline_error_from!(crate::transport::TransportError, TransportFailure);
lifeline_error_from!(serde_yaml::Error, InvalidConfig);
lifeline_error_from!(std::io::Error, Generic, |e: std::io::Error| format!(
    "IOError: {}",
    e
));

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_positive(value: i64) -> LifelineResult<i64> {
        if value <= 0 {
            lifeline_bail!(InvalidConfig, "expected a positive value, got {}", value);
        }
        Ok(value)
    }

    #[test]
    fn test_bail_formats_message() {
        assert_eq!(
            parse_positive(-1),
            Err(LifelineError::InvalidConfig(
                "expected a positive value, got -1".to_string()
            ))
        );
        assert_eq!(parse_positive(3), Ok(3));
    }

    #[test]
    fn test_recoverable_errors_are_not_fatal() {
        assert!(!LifelineError::StaleOrMismatchedReply.is_fatal());
        assert!(!LifelineError::ProbeOutstanding.is_fatal());
        assert!(LifelineError::RateLimitExceeded {
            max_probes: 10,
            window: Duration::from_secs(10)
        }
        .is_fatal());
    }
}
