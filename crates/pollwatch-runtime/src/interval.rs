#![forbid(unsafe_code)]

//! Scheduler cadence: what the caller asks for ([`Interval`]) and what the
//! host can actually provide ([`LoopMode`]).

use std::fmt;
use std::str::FromStr;

use web_time::Duration;

use crate::clock::HostClocks;
use crate::error::ConfigError;

/// Cadence used when a frame loop is requested but the host has no frame
/// clock.
pub const DEFAULT_FALLBACK_INTERVAL: Duration = Duration::from_millis(16);

/// Shortest timer period a scheduler will request.
pub const MIN_TIMER_INTERVAL: Duration = Duration::from_millis(1);

/// Requested cadence for a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Interval {
    /// Tick on every display refresh, or on the fallback timer cadence when
    /// the host has no frame clock.
    #[default]
    Frame,
    /// Tick on a fixed timer period.
    Every(Duration),
    /// Never tick automatically; only explicit `run()` calls evaluate.
    Manual,
}

impl Interval {
    /// A timer cadence of `ms` milliseconds.
    #[must_use]
    pub const fn millis(ms: u64) -> Self {
        Self::Every(Duration::from_millis(ms))
    }

    /// Decide the concrete loop for a host.
    ///
    /// Timer periods below [`MIN_TIMER_INTERVAL`] are clamped up to it.
    #[must_use]
    pub fn resolve(self, clocks: &HostClocks, fallback: Duration) -> LoopMode {
        match self {
            Self::Frame if clocks.has_frame_clock() => LoopMode::Frame,
            Self::Frame => LoopMode::Timer(fallback.max(MIN_TIMER_INTERVAL)),
            Self::Every(period) => LoopMode::Timer(period.max(MIN_TIMER_INTERVAL)),
            Self::Manual => LoopMode::Manual,
        }
    }
}

impl From<Duration> for Interval {
    fn from(period: Duration) -> Self {
        Self::Every(period)
    }
}

/// Renders a period exactly, in the coarsest of `ms`, `us`, `ns` that loses
/// nothing. The output parses back to the same period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period(pub Duration);

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let nanos = self.0.as_nanos();
        if nanos % 1_000_000 == 0 {
            write!(f, "{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            write!(f, "{}us", nanos / 1_000)
        } else {
            write!(f, "{nanos}ns")
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame => f.write_str("frame"),
            Self::Every(period) => Period(*period).fmt(f),
            Self::Manual => f.write_str("manual"),
        }
    }
}

/// Accepts `frame`, `manual`, `<n>`, `<n>s`, `<n>ms`, `<n>us`, and `<n>ns`
/// (case-insensitive). A bare number is milliseconds.
impl FromStr for Interval {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim().to_ascii_lowercase();
        let invalid = |reason: &'static str| ConfigError::InvalidInterval {
            value: s.to_string(),
            reason,
        };

        match raw.as_str() {
            "" | "frame" | "default" => return Ok(Self::Frame),
            "manual" => return Ok(Self::Manual),
            _ => {}
        }

        let (digits, unit): (&str, fn(u64) -> Option<Duration>) =
            if let Some(d) = raw.strip_suffix("ms") {
                (d, |n: u64| Some(Duration::from_millis(n)))
            } else if let Some(d) = raw.strip_suffix("us") {
                (d, |n: u64| Some(Duration::from_micros(n)))
            } else if let Some(d) = raw.strip_suffix("ns") {
                (d, |n: u64| Some(Duration::from_nanos(n)))
            } else if let Some(d) = raw.strip_suffix('s') {
                (d, |n: u64| n.checked_mul(1000).map(Duration::from_millis))
            } else {
                (raw.as_str(), |n: u64| Some(Duration::from_millis(n)))
            };

        let n: u64 = digits
            .trim()
            .parse()
            .map_err(|_| invalid("expected `frame`, `manual`, or a whole number of s/ms/us/ns"))?;
        if n == 0 {
            return Err(invalid("period must be positive"));
        }
        let period = unit(n).ok_or_else(|| invalid("period is too large"))?;
        Ok(Self::Every(period))
    }
}

/// The loop a scheduler actually runs, fixed when it is (re)initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopMode {
    /// Driven by the host frame clock.
    Frame,
    /// Driven by the host timer at this period.
    Timer(Duration),
    /// No automatic loop.
    Manual,
}

impl LoopMode {
    #[must_use]
    pub const fn is_manual(self) -> bool {
        matches!(self, Self::Manual)
    }

    /// Timer period, if timer-driven.
    #[must_use]
    pub const fn period(self) -> Option<Duration> {
        match self {
            Self::Timer(period) => Some(period),
            _ => None,
        }
    }
}

impl fmt::Display for LoopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frame => f.write_str("frame"),
            Self::Timer(period) => write!(f, "timer({})", Period(*period)),
            Self::Manual => f.write_str("manual"),
        }
    }
}
