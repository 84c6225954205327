pub mod builder;

use crate::consts::{
    DEFAULT_MAX_PROBES, DEFAULT_PING_INTERVAL, DEFAULT_RATE_WINDOW, DEFAULT_REPLY_TIMEOUT,
    MAX_TIMEOUT,
};
use crate::errors::{LifelineError, LifelineResult};
use crate::stream::Role;
use builder::{LivenessConfigBuilder, LivenessYamlSpec};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Inbound probe budget for a single stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RateLimit {
    pub max_probes: usize,
    pub window: Duration,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            max_probes: DEFAULT_MAX_PROBES,
            window: DEFAULT_RATE_WINDOW,
        }
    }
}

/// Which side(s) of a stream run a ping scheduler.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ProbingMode {
    #[default]
    Initiator,
    Responder,
    Both,
    Disabled,
}

impl ProbingMode {
    pub fn probes(self, role: Role) -> bool {
        match self {
            ProbingMode::Initiator => role == Role::Initiator,
            ProbingMode::Responder => role == Role::Responder,
            ProbingMode::Both => true,
            ProbingMode::Disabled => false,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LivenessConfig {
    pub ping_interval: Duration,
    pub reply_timeout: Duration,
    /// How long a side waits for the peer's next probe before declaring it dead.
    pub inactivity_timeout: Option<Duration>,
    pub rate_limit: RateLimit,
    pub probing: ProbingMode,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
            inactivity_timeout: None,
            rate_limit: RateLimit::default(),
            probing: ProbingMode::default(),
        }
    }
}

impl LivenessConfig {
    pub fn builder() -> LivenessConfigBuilder {
        LivenessConfigBuilder::new()
    }

    pub fn from_yaml_str(yaml: &str) -> LifelineResult<Self> {
        let spec: LivenessYamlSpec = serde_yaml::from_str(yaml)?;
        LivenessConfig::try_from(&spec)
    }

    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> LifelineResult<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            LifelineError::InvalidConfig(format!(
                "Could not read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> LifelineResult<()> {
        if self.ping_interval.is_zero() {
            crate::lifeline_bail!(InvalidConfig, "ping interval must be greater than zero");
        }
        // A timeout at or below the cadence makes every probe look lost.
        if self.reply_timeout <= self.ping_interval {
            crate::lifeline_bail!(
                InvalidConfig,
                "reply timeout {:?} must exceed ping interval {:?}",
                self.reply_timeout,
                self.ping_interval
            );
        }
        let bounded = [
            ("reply timeout", Some(self.reply_timeout)),
            ("inactivity timeout", self.inactivity_timeout),
            ("rate window", Some(self.rate_limit.window)),
        ];
        for (name, value) in bounded {
            if let Some(value) = value.filter(|value| *value > MAX_TIMEOUT) {
                crate::lifeline_bail!(
                    InvalidConfig,
                    "{} {:?} exceeds the maximum of {:?}",
                    name,
                    value,
                    MAX_TIMEOUT
                );
            }
        }
        if matches!(self.inactivity_timeout, Some(timeout) if timeout.is_zero()) {
            crate::lifeline_bail!(InvalidConfig, "inactivity timeout must be greater than zero");
        }
        if self.rate_limit.max_probes == 0 || self.rate_limit.window.is_zero() {
            crate::lifeline_bail!(
                InvalidConfig,
                "rate limit needs at least one probe over a non-empty window"
            );
        }
        Ok(())
    }

    pub fn probes(&self, role: Role) -> bool {
        self.probing.probes(role)
    }

    /// Inactivity timeout applied by `role`, present only when its peer probes.
    pub fn inactivity_timeout_for(&self, role: Role) -> Option<Duration> {
        self.inactivity_timeout
            .filter(|_| self.probing.probes(role.peer()))
    }
}
