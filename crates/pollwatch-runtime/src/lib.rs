#![forbid(unsafe_code)]

//! Runtime: run loops, schedulers, and the priority registry.
//!
//! # Role in pollwatch
//! `pollwatch-core` decides *whether* something changed. This crate decides
//! *when* to ask: a [`Scheduler`] drives its watchers and actions from a host
//! frame clock, a timer, or explicit `run()` calls, and a [`Registry`] keeps
//! several independently clocked schedulers under string priority keys.
//!
//! The host's timing capabilities are injected once as [`HostClocks`]. The
//! bundled [`EventLoop`] implements them for native programs and, with lab
//! time, for deterministic tests.
//!
//! # How it fits in the system
//! ```text
//! HostClocks ──▶ Scheduler ──▶ Watcher::run / actions
//!                   ▲
//! Registry ─────────┘ (priority key → Scheduler)
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod event_loop;
pub mod interval;
pub mod registry;
pub mod scheduler;

pub use clock::{FrameClock, HostClocks, RequestId, TickFn, TimerClock};
pub use config::RegistryConfig;
pub use error::{ConfigError, RegistryError, Result};
pub use event_loop::EventLoop;
pub use interval::{Interval, LoopMode, Period};
pub use registry::{Placement, Registry};
pub use scheduler::{EntryKind, Scheduler, SchedulerStats, Subscription, SubscriptionGuard};
