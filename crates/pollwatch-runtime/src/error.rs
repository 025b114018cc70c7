//! Error types for registry routing and configuration parsing.

#![deny(missing_docs)]

use thiserror::Error;

/// Result of a registry operation; fails only on an unknown priority key.
pub type Result<T, E = RegistryError> = std::result::Result<T, E>;

/// A registry call that addressed a priority it does not know.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No scheduler is registered under `key`.
    #[error(
        "unknown priority `{key}`: register it first with `Registry::init(interval, Some(\"{key}\"))`"
    )]
    UnknownPriority {
        /// The key as the caller passed it.
        key: String,
    },
}

impl RegistryError {
    /// Build an [`RegistryError::UnknownPriority`] for `key`.
    #[must_use]
    pub fn unknown_priority(key: impl Into<String>) -> Self {
        Self::UnknownPriority { key: key.into() }
    }

    /// The priority key the failing call referenced.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::UnknownPriority { key } => key,
        }
    }
}

/// Configuration input that could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// An interval string outside the accepted forms.
    #[error("invalid interval `{value}`: {reason}")]
    InvalidInterval {
        /// The rejected input.
        value: String,
        /// What was wrong with it.
        reason: &'static str,
    },

    /// An environment variable with an unusable value.
    #[error("invalid value `{value}` for {var}: {reason}")]
    InvalidVar {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
        /// What was wrong with it.
        reason: String,
    },
}
