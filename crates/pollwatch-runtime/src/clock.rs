#![forbid(unsafe_code)]

//! Host timing capabilities consumed by schedulers.
//!
//! A scheduler never sleeps or spawns. It asks the host for *one* callback at
//! a time, either on the next display refresh ([`FrameClock`]) or after a
//! delay ([`TimerClock`]), and keeps the returned [`RequestId`] so it can
//! cancel the request on stop or reconfigure.
//!
//! Whether a frame clock exists is decided once, when the host builds its
//! [`HostClocks`]. Schedulers read that answer; they never query the host again.
//!
//! # Contract for implementors
//!
//! 1. `request_*` must not invoke the tick synchronously; it fires later,
//!    from the host's loop.
//! 2. A cancelled request never fires. Cancelling an unknown or already fired
//!    id is a no-op.
//! 3. Each tick fires at most once.

use std::fmt;
use std::rc::Rc;

use web_time::Duration;

/// One-shot callback handed to a clock.
pub type TickFn = Box<dyn FnOnce()>;

/// Opaque handle of a pending clock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a host-specific request number.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// "Call me on the next display refresh."
pub trait FrameClock {
    fn request_frame(&self, tick: TickFn) -> RequestId;

    fn cancel_frame(&self, id: RequestId);
}

/// "Call me after `delay`."
pub trait TimerClock {
    fn request_after(&self, delay: Duration, tick: TickFn) -> RequestId;

    fn cancel_after(&self, id: RequestId);
}

/// The clocks a host offers, resolved once at startup.
#[derive(Clone)]
pub struct HostClocks {
    frame: Option<Rc<dyn FrameClock>>,
    timer: Rc<dyn TimerClock>,
}

impl HostClocks {
    /// A host with a timer but no frame clock.
    #[must_use]
    pub fn timer_only(timer: Rc<dyn TimerClock>) -> Self {
        Self { frame: None, timer }
    }

    /// A host with both clocks.
    #[must_use]
    pub fn new(frame: Rc<dyn FrameClock>, timer: Rc<dyn TimerClock>) -> Self {
        Self {
            frame: Some(frame),
            timer,
        }
    }

    /// Replace or remove the frame clock.
    #[must_use]
    pub fn with_frame_clock(mut self, frame: Option<Rc<dyn FrameClock>>) -> Self {
        self.frame = frame;
        self
    }

    #[must_use]
    pub fn has_frame_clock(&self) -> bool {
        self.frame.is_some()
    }

    #[must_use]
    pub fn frame(&self) -> Option<&Rc<dyn FrameClock>> {
        self.frame.as_ref()
    }

    #[must_use]
    pub fn timer(&self) -> &Rc<dyn TimerClock> {
        &self.timer
    }
}

impl fmt::Debug for HostClocks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClocks")
            .field("frame", &self.frame.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingTimer {
        delays: RefCell<Vec<Duration>>,
    }

    impl TimerClock for RecordingTimer {
        fn request_after(&self, delay: Duration, _tick: TickFn) -> RequestId {
            let mut delays = self.delays.borrow_mut();
            delays.push(delay);
            RequestId::new(delays.len() as u64)
        }

        fn cancel_after(&self, _id: RequestId) {}
    }

    struct NoopFrames;

    impl FrameClock for NoopFrames {
        fn request_frame(&self, _tick: TickFn) -> RequestId {
            RequestId::new(0)
        }

        fn cancel_frame(&self, _id: RequestId) {}
    }

    #[test]
    fn frame_capability_is_explicit() {
        let timer = Rc::new(RecordingTimer::default());
        let clocks = HostClocks::timer_only(timer.clone());
        assert!(!clocks.has_frame_clock());

        let clocks = clocks.with_frame_clock(Some(Rc::new(NoopFrames)));
        assert!(clocks.has_frame_clock());
        assert!(clocks.frame().is_some());

        let id = clocks.timer().request_after(Duration::from_millis(5), Box::new(|| {}));
        assert_eq!(id.get(), 1);
        assert_eq!(timer.delays.borrow().as_slice(), &[Duration::from_millis(5)]);
    }

    #[test]
    fn request_id_display() {
        assert_eq!(RequestId::new(7).to_string(), "req#7");
    }
}
