#![forbid(unsafe_code)]

//! pollwatch public facade crate.
//!
//! Polling change detection: register an expression and a callback, and a
//! scheduler re-evaluates the expression every frame, on a timer, or on
//! demand, firing the callback when the result changed.
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use pollwatch::prelude::*;
//!
//! let host = EventLoop::lab();
//! let registry = Registry::new(&host.clocks());
//!
//! let score = Rc::new(Cell::new(1));
//! let seen = Rc::new(Cell::new((0, 0)));
//! let (s, out) = (Rc::clone(&score), Rc::clone(&seen));
//! registry
//!     .watch(move || s.get(), move |new, old| out.set((*new, *old)), WatchMode::Shallow, None)
//!     .unwrap();
//!
//! score.set(5);
//! host.next_frame();
//! assert_eq!(seen.get(), (5, 1));
//! ```

pub use pollwatch_core as core;
pub use pollwatch_runtime as runtime;

pub mod prelude {
    pub use pollwatch_core::{Snapshot, Value, WatchMode, Watcher};
    pub use pollwatch_runtime::{
        EventLoop, HostClocks, Interval, Placement, Registry, RegistryConfig, RegistryError,
        Scheduler, Subscription,
    };
}
