#![forbid(unsafe_code)]

//! Core: snapshot values, deep diffing, and watchers.
//!
//! - [`Snapshot`]: what a watched expression returns, and how two readings
//!   are compared (shallow identity/value, or deep structure).
//! - [`Value`]: a dynamic graph of scalars, lists and maps with shared,
//!   in-place mutable nodes.
//! - [`Watcher`]: one expression/callback pair plus its baseline.
//!
//! Scheduling lives in `pollwatch-runtime`; nothing here knows about time.

pub mod diff;
pub mod snapshot;
pub mod value;
pub mod watcher;

pub use snapshot::Snapshot;
pub use value::{InexactNumber, Members, Shared, Value};
pub use watcher::{Evaluate, WatchMode, Watcher};
