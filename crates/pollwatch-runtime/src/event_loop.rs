#![forbid(unsafe_code)]

//! A single-threaded reference host for [`FrameClock`] and [`TimerClock`].
//!
//! [`EventLoop`] keeps every pending request in one deadline-ordered queue.
//! Frame requests are due on the next frame boundary (multiples of the frame
//! interval since the loop's epoch); timer requests are due `delay` after the
//! moment they were made. [`EventLoop::run_for`] fires due callbacks in
//! deadline order, ties broken by request order.
//!
//! # Time sources
//!
//! - **Real**: wall-clock time via `web_time::Instant`; `run_for` sleeps
//!   between deadlines.
//! - **Lab**: virtual time that only moves inside `run_for`, jumping straight
//!   from one deadline to the next. Tick counts are exact, which is what the
//!   scheduler tests rely on.
//!
//! # Example
//!
//! ```
//! use std::cell::Cell;
//! use std::rc::Rc;
//! use pollwatch_runtime::clock::TimerClock;
//! use pollwatch_runtime::event_loop::EventLoop;
//! use web_time::Duration;
//!
//! let host = EventLoop::lab();
//! let fired = Rc::new(Cell::new(false));
//! let f = Rc::clone(&fired);
//! host.request_after(Duration::from_millis(10), Box::new(move || f.set(true)));
//!
//! host.run_for(Duration::from_millis(9));
//! assert!(!fired.get());
//! host.run_for(Duration::from_millis(1));
//! assert!(fired.get());
//! ```

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::rc::Rc;

use web_time::{Duration, Instant};

use crate::clock::{FrameClock, HostClocks, RequestId, TickFn, TimerClock};

/// Default refresh period: 60 Hz.
pub const DEFAULT_FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

#[derive(Debug)]
enum TimeSource {
    /// Real wall-clock time.
    Real { epoch: Instant },
    /// Virtual time, advanced only by `run_for`.
    Lab { now: Cell<Duration> },
}

/// Queue position: deadline since epoch, then request order.
type Slot = (Duration, u64);

struct Pending {
    id: RequestId,
    tick: TickFn,
}

#[derive(Default)]
struct Queue {
    pending: BTreeMap<Slot, Pending>,
    slots: HashMap<RequestId, Slot>,
}

struct LoopInner {
    time: TimeSource,
    frame_interval: Duration,
    frames: bool,
    queue: RefCell<Queue>,
    next_id: Cell<u64>,
    fired: Cell<u64>,
}

/// Deadline-ordered host loop. Cloning shares the same loop.
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<LoopInner>,
}

impl EventLoop {
    fn with_source(time: TimeSource) -> Self {
        Self {
            inner: Rc::new(LoopInner {
                time,
                frame_interval: DEFAULT_FRAME_INTERVAL,
                frames: true,
                queue: RefCell::new(Queue::default()),
                next_id: Cell::new(1),
                fired: Cell::new(0),
            }),
        }
    }

    /// A loop driven by wall-clock time.
    #[must_use]
    pub fn real() -> Self {
        Self::with_source(TimeSource::Real {
            epoch: Instant::now(),
        })
    }

    /// A loop driven by virtual time starting at zero.
    #[must_use]
    pub fn lab() -> Self {
        Self::with_source(TimeSource::Lab {
            now: Cell::new(Duration::ZERO),
        })
    }

    /// Set the frame period. Zero is clamped to one microsecond.
    ///
    /// Only valid before the loop is shared; returns `self` unchanged if
    /// other handles already exist.
    #[must_use]
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        if let Some(inner) = Rc::get_mut(&mut self.inner) {
            inner.frame_interval = interval.max(Duration::from_micros(1));
        }
        self
    }

    /// Model a host without a display refresh: [`clocks`](Self::clocks)
    /// will offer no frame clock.
    #[must_use]
    pub fn without_frames(mut self) -> Self {
        if let Some(inner) = Rc::get_mut(&mut self.inner) {
            inner.frames = false;
        }
        self
    }

    /// The capabilities this loop offers, for schedulers and registries.
    #[must_use]
    pub fn clocks(&self) -> HostClocks {
        let timer: Rc<dyn TimerClock> = Rc::new(self.clone());
        let clocks = HostClocks::timer_only(timer);
        if self.inner.frames {
            let frame: Rc<dyn FrameClock> = Rc::new(self.clone());
            clocks.with_frame_clock(Some(frame))
        } else {
            clocks
        }
    }

    #[must_use]
    pub fn is_lab(&self) -> bool {
        matches!(self.inner.time, TimeSource::Lab { .. })
    }

    #[must_use]
    pub fn frame_interval(&self) -> Duration {
        self.inner.frame_interval
    }

    /// Time elapsed since the loop's epoch.
    #[must_use]
    pub fn now(&self) -> Duration {
        match &self.inner.time {
            TimeSource::Real { epoch } => epoch.elapsed(),
            TimeSource::Lab { now } => now.get(),
        }
    }

    /// Number of requests waiting to fire.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.queue.borrow().pending.len()
    }

    /// Total callbacks fired since creation.
    #[must_use]
    pub fn fired(&self) -> u64 {
        self.inner.fired.get()
    }

    /// Fire everything due within the next `span`, then return.
    ///
    /// Callbacks may request or cancel further work; requests that fall due
    /// inside the window fire in the same call. Returns how many callbacks
    /// fired.
    pub fn run_for(&self, span: Duration) -> usize {
        let end = self.now() + span;
        let mut fired = 0;
        while let Some((slot, pending)) = self.pop_due(end) {
            match &self.inner.time {
                TimeSource::Real { .. } => {
                    let now = self.now();
                    if slot.0 > now {
                        std::thread::sleep(slot.0 - now);
                    }
                }
                TimeSource::Lab { now } => now.set(now.get().max(slot.0)),
            }
            self.fire(pending);
            fired += 1;
        }
        match &self.inner.time {
            TimeSource::Real { .. } => {
                let now = self.now();
                if end > now {
                    std::thread::sleep(end - now);
                }
            }
            TimeSource::Lab { now } => now.set(now.get().max(end)),
        }
        fired
    }

    /// Run until the next frame boundary has been processed.
    pub fn next_frame(&self) -> usize {
        let now = self.now();
        let boundary = self.next_frame_deadline(now);
        self.run_for(boundary - now)
    }

    fn fire(&self, pending: Pending) {
        self.inner.fired.set(self.inner.fired.get() + 1);
        tracing::trace!(request = %pending.id, "event loop firing");
        (pending.tick)();
    }

    /// Remove the earliest request due at or before `end`.
    ///
    /// The queue borrow ends before the callback runs, so callbacks may
    /// re-enter the loop.
    fn pop_due(&self, end: Duration) -> Option<(Slot, Pending)> {
        let mut queue = self.inner.queue.borrow_mut();
        let slot = *queue.pending.keys().next()?;
        if slot.0 > end {
            return None;
        }
        let pending = queue.pending.remove(&slot)?;
        queue.slots.remove(&pending.id);
        Some((slot, pending))
    }

    fn enqueue(&self, deadline: Duration, tick: TickFn) -> RequestId {
        let seq = self.inner.next_id.get();
        self.inner.next_id.set(seq + 1);
        let id = RequestId::new(seq);
        let slot = (deadline, seq);
        let mut queue = self.inner.queue.borrow_mut();
        queue.pending.insert(slot, Pending { id, tick });
        queue.slots.insert(id, slot);
        id
    }

    fn cancel(&self, id: RequestId) {
        let mut queue = self.inner.queue.borrow_mut();
        if let Some(slot) = queue.slots.remove(&id) {
            queue.pending.remove(&slot);
        }
    }

    /// First frame boundary strictly after `now`.
    fn next_frame_deadline(&self, now: Duration) -> Duration {
        let period = self.inner.frame_interval.as_nanos();
        let frames = now.as_nanos() / period + 1;
        let nanos = frames.saturating_mul(period).min(u128::from(u64::MAX));
        Duration::from_nanos(nanos as u64)
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::real()
    }
}

impl FrameClock for EventLoop {
    fn request_frame(&self, tick: TickFn) -> RequestId {
        let deadline = self.next_frame_deadline(self.now());
        self.enqueue(deadline, tick)
    }

    fn cancel_frame(&self, id: RequestId) {
        self.cancel(id);
    }
}

impl TimerClock for EventLoop {
    fn request_after(&self, delay: Duration, tick: TickFn) -> RequestId {
        let deadline = self.now() + delay;
        self.enqueue(deadline, tick)
    }

    fn cancel_after(&self, id: RequestId) {
        self.cancel(id);
    }
}

impl fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoop")
            .field("time", &self.inner.time)
            .field("frame_interval", &self.inner.frame_interval)
            .field("frames", &self.inner.frames)
            .field("pending", &self.pending())
            .finish()
    }
}
