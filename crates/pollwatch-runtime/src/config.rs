#![forbid(unsafe_code)]

//! Registry configuration.
//!
//! Defaults can be layered with environment overrides:
//!
//! | Variable | Form | Field |
//! |----------|------|-------|
//! | `POLLWATCH_DEFAULT_PRIORITY` | non-empty string | `default_priority` |
//! | `POLLWATCH_DEFAULT_INTERVAL` | `frame`, `manual`, `<n>`, `<n>s`, `<n>ms`, `<n>us`, `<n>ns` | `default_interval` |
//! | `POLLWATCH_FALLBACK_INTERVAL_MS` | positive integer | `fallback_interval` |
//!
//! [`RegistryConfig::from_env`] skips invalid values with a warning;
//! [`RegistryConfig::try_from_env`] rejects them.

use web_time::Duration;

use crate::error::ConfigError;
use crate::interval::{DEFAULT_FALLBACK_INTERVAL, Interval};

pub const ENV_DEFAULT_PRIORITY: &str = "POLLWATCH_DEFAULT_PRIORITY";
pub const ENV_DEFAULT_INTERVAL: &str = "POLLWATCH_DEFAULT_INTERVAL";
pub const ENV_FALLBACK_INTERVAL_MS: &str = "POLLWATCH_FALLBACK_INTERVAL_MS";

/// Key of the scheduler used when no priority is named.
pub const DEFAULT_PRIORITY: &str = "default";

/// Prefix of schedulers the registry creates for interval placements.
pub const AUTO_PRIORITY_PREFIX: &str = "auto:";

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RegistryConfig {
    /// Key used when an operation names no priority.
    pub default_priority: String,
    /// Interval the default scheduler gets when it is created lazily.
    pub default_interval: Interval,
    /// Timer cadence for frame loops on hosts without a frame clock.
    pub fallback_interval: Duration,
    /// Prefix for schedulers created on demand for a timer interval.
    pub auto_priority_prefix: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY.to_string(),
            default_interval: Interval::Frame,
            fallback_interval: DEFAULT_FALLBACK_INTERVAL,
            auto_priority_prefix: AUTO_PRIORITY_PREFIX.to_string(),
        }
    }
}

impl RegistryConfig {
    #[must_use]
    pub fn with_default_priority(mut self, key: impl Into<String>) -> Self {
        self.default_priority = key.into();
        self
    }

    #[must_use]
    pub fn with_default_interval(mut self, interval: Interval) -> Self {
        self.default_interval = interval;
        self
    }

    #[must_use]
    pub fn with_fallback_interval(mut self, fallback: Duration) -> Self {
        self.fallback_interval = fallback;
        self
    }

    #[must_use]
    pub fn with_auto_priority_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.auto_priority_prefix = prefix.into();
        self
    }

    /// Defaults with process environment overrides; invalid values are
    /// logged and skipped.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`from_env`](Self::from_env) but fails on the first invalid value.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(|var| std::env::var(var).ok())
    }

    /// Lenient loading from an arbitrary variable source.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        for result in parse_overrides(&lookup) {
            match result {
                Ok(apply) => apply.apply(&mut config),
                Err(err) => tracing::warn!(error = %err, "ignoring configuration override"),
            }
        }
        config
    }

    /// Strict loading from an arbitrary variable source.
    pub fn try_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        for result in parse_overrides(&lookup) {
            result?.apply(&mut config);
        }
        Ok(config)
    }
}

enum Override {
    DefaultPriority(String),
    DefaultInterval(Interval),
    FallbackInterval(Duration),
}

impl Override {
    fn apply(self, config: &mut RegistryConfig) {
        match self {
            Self::DefaultPriority(key) => config.default_priority = key,
            Self::DefaultInterval(interval) => config.default_interval = interval,
            Self::FallbackInterval(fallback) => config.fallback_interval = fallback,
        }
    }
}

fn parse_overrides(lookup: &impl Fn(&str) -> Option<String>) -> Vec<Result<Override, ConfigError>> {
    let invalid = |var: &'static str, value: &str, reason: String| ConfigError::InvalidVar {
        var,
        value: value.to_string(),
        reason,
    };
    let mut out = Vec::new();

    if let Some(raw) = lookup(ENV_DEFAULT_PRIORITY) {
        let key = raw.trim();
        out.push(if key.is_empty() {
            Err(invalid(ENV_DEFAULT_PRIORITY, &raw, "priority key must not be empty".into()))
        } else {
            Ok(Override::DefaultPriority(key.to_string()))
        });
    }

    if let Some(raw) = lookup(ENV_DEFAULT_INTERVAL) {
        out.push(
            raw.parse::<Interval>()
                .map(Override::DefaultInterval)
                .map_err(|err| invalid(ENV_DEFAULT_INTERVAL, &raw, err.to_string())),
        );
    }

    if let Some(raw) = lookup(ENV_FALLBACK_INTERVAL_MS) {
        out.push(match raw.trim().parse::<u64>() {
            Ok(0) => Err(invalid(ENV_FALLBACK_INTERVAL_MS, &raw, "must be positive".into())),
            Ok(ms) => Ok(Override::FallbackInterval(Duration::from_millis(ms))),
            Err(err) => Err(invalid(ENV_FALLBACK_INTERVAL_MS, &raw, err.to_string())),
        });
    }

    out
}
