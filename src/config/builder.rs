use crate::config::{LivenessConfig, ProbingMode, RateLimit};
use crate::errors::{LifelineError, LifelineResult};
use crate::utils::parse_time::parse_time_str;
use serde::Deserialize;
use std::time::Duration;

/// YAML form of [`LivenessConfig`]. Durations are strings such as `10s`.
///
/// ```yaml
/// probing: initiator
/// pingInterval: 10s
/// replyTimeout: 15s
/// inactivityTimeout: 30s
/// rateLimit:
///   maxProbes: 10
///   window: 10s
/// ```
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LivenessYamlSpec {
    #[serde(default)]
    pub probing: Option<ProbingMode>,
    #[serde(default)]
    pub ping_interval: Option<String>,
    #[serde(default)]
    pub reply_timeout: Option<String>,
    #[serde(default)]
    pub inactivity_timeout: Option<String>,
    #[serde(default)]
    pub rate_limit: Option<RateLimitYamlSpec>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RateLimitYamlSpec {
    pub max_probes: usize,
    pub window: String,
}

fn parse_optional(value: &Option<String>) -> LifelineResult<Option<Duration>> {
    value.as_deref().map(parse_time_str).transpose()
}

impl TryFrom<&LivenessYamlSpec> for LivenessConfig {
    type Error = LifelineError;

    fn try_from(value: &LivenessYamlSpec) -> LifelineResult<Self> {
        let mut builder = LivenessConfigBuilder::new();
        if let Some(probing) = value.probing {
            builder = builder.with_probing(probing);
        }
        if let Some(interval) = parse_optional(&value.ping_interval)? {
            builder = builder.with_ping_interval(interval);
        }
        if let Some(timeout) = parse_optional(&value.reply_timeout)? {
            builder = builder.with_reply_timeout(timeout);
        }
        if let Some(timeout) = parse_optional(&value.inactivity_timeout)? {
            builder = builder.with_inactivity_timeout(timeout);
        }
        if let Some(rate_limit) = &value.rate_limit {
            builder = builder.with_rate_limit(RateLimit {
                max_probes: rate_limit.max_probes,
                window: parse_time_str(&rate_limit.window)?,
            });
        }
        builder.build()
    }
}

#[derive(Default)]
pub struct LivenessConfigBuilder {
    ping_interval: Option<Duration>,
    reply_timeout: Option<Duration>,
    inactivity_timeout: Option<Duration>,
    rate_limit: Option<RateLimit>,
    probing: Option<ProbingMode>,
}

impl LivenessConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = Some(interval);
        self
    }

    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = Some(timeout);
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = Some(timeout);
        self
    }

    pub fn with_rate_limit(mut self, rate_limit: RateLimit) -> Self {
        self.rate_limit = Some(rate_limit);
        self
    }

    pub fn with_probing(mut self, probing: ProbingMode) -> Self {
        self.probing = Some(probing);
        self
    }

    /// Fills unset values with defaults and validates the result.
    pub fn build(self) -> LifelineResult<LivenessConfig> {
        let defaults = LivenessConfig::default();
        let config = LivenessConfig {
            ping_interval: self.ping_interval.unwrap_or(defaults.ping_interval),
            reply_timeout: self.reply_timeout.unwrap_or(defaults.reply_timeout),
            inactivity_timeout: self.inactivity_timeout.or(defaults.inactivity_timeout),
            rate_limit: self.rate_limit.unwrap_or(defaults.rate_limit),
            probing: self.probing.unwrap_or(defaults.probing),
        };
        config.validate()?;
        Ok(config)
    }
}
