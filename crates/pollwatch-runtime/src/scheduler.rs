#![forbid(unsafe_code)]

//! A run loop plus the watchers and scheduled actions it drives.
//!
//! # State machine
//!
//! ```text
//!            init(Frame | Every)                stop()
//! Stopped ──────────────────────▶ Running ───────────────▶ Stopped
//!    ▲  │                          │   ▲
//!    │  │ init(Manual)             │   │ init(..) stops first, then restarts
//!    │  ▼                          └───┘
//!  Stopped (manual: stays here until a non-manual init)
//! ```
//!
//! The loop mode is resolved once per `init` ([`Interval::resolve`]): a frame
//! request without a host frame clock becomes a timer loop at the fallback
//! cadence, silently.
//!
//! # Ticks
//!
//! Starting a loop runs one pass immediately, then requests the next tick
//! from the host. Each tick runs a pass and requests the following one, so at
//! most one host request is outstanding per scheduler. A pass
//! ([`Scheduler::run`]) evaluates every watcher in registration order, then
//! executes every scheduled action in registration order.
//!
//! Registering onto a running loop does not trigger an extra pass; registering
//! onto a stopped (non-manual) scheduler restarts it.
//!
//! # Re-entrancy
//!
//! Callbacks may freely call back into the scheduler. Entries added during a
//! pass first run on the next pass; entries removed during a pass are skipped
//! for the rest of it. A watcher or action already executing further up the
//! stack is skipped by a nested pass instead of being re-entered.
//!
//! # Invariants
//!
//! 1. At most one outstanding host request per scheduler.
//! 2. A tick belonging to a stopped or reconfigured loop never runs a pass.
//! 3. `stop()` keeps all watchers and actions.
//! 4. Entry ids are never reused, so a stale [`Subscription`] can never
//!    remove someone else's entry.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};

use pollwatch_core::{Evaluate, Snapshot, WatchMode, Watcher};
use web_time::Duration;

use crate::clock::{HostClocks, RequestId, TickFn};
use crate::interval::{DEFAULT_FALLBACK_INTERVAL, Interval, LoopMode};

type WatcherSlot = Rc<RefCell<dyn Evaluate>>;
type ActionSlot = Rc<RefCell<dyn FnMut()>>;

/// Label given to schedulers built outside a registry.
pub const UNLABELED: &str = "scheduler";

/// The pending host request of a running loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopHandle {
    Frame(RequestId),
    Timer(RequestId),
}

#[derive(Debug)]
struct LoopState {
    interval: Interval,
    mode: LoopMode,
    running: bool,
    active: Option<LoopHandle>,
    /// Bumped on every start and stop; ticks carry the epoch they were
    /// requested in and are ignored once it moves on.
    epoch: u64,
}

/// Counters for diagnostics and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// Full passes run (automatic or manual).
    pub passes: u64,
    /// Watcher callbacks fired.
    pub callbacks_fired: u64,
    /// Scheduled action invocations.
    pub actions_executed: u64,
}

pub(crate) struct SchedulerInner {
    label: String,
    clocks: HostClocks,
    fallback: Duration,
    state: RefCell<LoopState>,
    watchers: RefCell<BTreeMap<u64, WatcherSlot>>,
    actions: RefCell<BTreeMap<u64, ActionSlot>>,
    next_entry: Cell<u64>,
    stats: Cell<SchedulerStats>,
}

impl SchedulerInner {
    fn cancel(&self, handle: LoopHandle) {
        match handle {
            LoopHandle::Frame(id) => {
                if let Some(frame) = self.clocks.frame() {
                    frame.cancel_frame(id);
                }
            }
            LoopHandle::Timer(id) => self.clocks.timer().cancel_after(id),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut SchedulerStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        if let Some(handle) = self.state.get_mut().active.take() {
            self.cancel(handle);
        }
    }
}

/// Builder for a [`Scheduler`] with a label or a non-default fallback.
#[derive(Debug, Clone)]
pub struct SchedulerBuilder {
    clocks: HostClocks,
    label: String,
    fallback: Duration,
}

impl SchedulerBuilder {
    /// Label used in log events (registries use the priority key).
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Timer cadence used when a frame loop is requested without a frame
    /// clock.
    #[must_use]
    pub fn with_fallback_interval(mut self, fallback: Duration) -> Self {
        self.fallback = fallback;
        self
    }

    /// Create the scheduler and `init` it with `interval`.
    #[must_use]
    pub fn build(self, interval: Interval) -> Scheduler {
        let mode = interval.resolve(&self.clocks, self.fallback);
        let scheduler = Scheduler {
            inner: Rc::new(SchedulerInner {
                label: self.label,
                clocks: self.clocks,
                fallback: self.fallback,
                state: RefCell::new(LoopState {
                    interval,
                    mode,
                    running: false,
                    active: None,
                    epoch: 0,
                }),
                watchers: RefCell::new(BTreeMap::new()),
                actions: RefCell::new(BTreeMap::new()),
                next_entry: Cell::new(1),
                stats: Cell::new(SchedulerStats::default()),
            }),
        };
        scheduler.init(interval);
        scheduler
    }
}

/// Owns watchers, scheduled actions, and one run loop.
///
/// Cloning a `Scheduler` creates a new handle to the **same** scheduler.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Create a scheduler on `clocks` and start it per `interval`.
    #[must_use]
    pub fn new(clocks: &HostClocks, interval: Interval) -> Self {
        Self::builder(clocks).build(interval)
    }

    #[must_use]
    pub fn builder(clocks: &HostClocks) -> SchedulerBuilder {
        SchedulerBuilder {
            clocks: clocks.clone(),
            label: UNLABELED.to_string(),
            fallback: DEFAULT_FALLBACK_INTERVAL,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// (Re)configure and (re)start the loop.
    ///
    /// Any running loop is stopped first. A non-manual interval starts the
    /// new loop with an immediate pass.
    pub fn init(&self, interval: Interval) {
        self.halt();
        let mode = interval.resolve(&self.inner.clocks, self.inner.fallback);
        {
            let mut state = self.inner.state.borrow_mut();
            state.interval = interval;
            state.mode = mode;
        }
        tracing::debug!(
            priority = %self.inner.label,
            %interval,
            %mode,
            "scheduler configured"
        );
        if !mode.is_manual() {
            self.start();
        }
    }

    /// Cancel the loop. Watchers and actions are kept. No-op when stopped.
    pub fn stop(&self) {
        if self.halt() {
            tracing::debug!(priority = %self.inner.label, "scheduler stopped");
        }
    }

    /// Cancel the outstanding request and mark stopped. Returns whether the
    /// loop was running.
    fn halt(&self) -> bool {
        let (was_running, active) = {
            let mut state = self.inner.state.borrow_mut();
            let was_running = state.running;
            state.running = false;
            state.epoch += 1;
            (was_running, state.active.take())
        };
        if let Some(handle) = active {
            self.inner.cancel(handle);
        }
        was_running
    }

    fn start(&self) {
        let (epoch, mode) = {
            let mut state = self.inner.state.borrow_mut();
            state.running = true;
            state.epoch += 1;
            (state.epoch, state.mode)
        };
        tracing::debug!(priority = %self.inner.label, %mode, "scheduler started");
        self.tick(epoch);
    }

    /// Start the loop if it is stopped and not manual.
    fn ensure_running(&self) {
        let needs_start = {
            let state = self.inner.state.borrow();
            !state.running && !state.mode.is_manual()
        };
        if needs_start {
            self.start();
        }
    }

    fn tick(&self, epoch: u64) {
        {
            let mut state = self.inner.state.borrow_mut();
            if !state.running || state.epoch != epoch {
                return;
            }
            state.active = None;
        }
        self.run();
        self.request_next(epoch);
    }

    fn request_next(&self, epoch: u64) {
        let mode = {
            let state = self.inner.state.borrow();
            if !state.running || state.epoch != epoch || state.active.is_some() {
                return;
            }
            state.mode
        };

        let weak: Weak<SchedulerInner> = Rc::downgrade(&self.inner);
        let tick: TickFn = Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Scheduler { inner }.tick(epoch);
            }
        });

        let clocks = &self.inner.clocks;
        let handle = match (mode, clocks.frame()) {
            (LoopMode::Frame, Some(frame)) => LoopHandle::Frame(frame.request_frame(tick)),
            (LoopMode::Frame, None) => {
                LoopHandle::Timer(clocks.timer().request_after(self.inner.fallback, tick))
            }
            (LoopMode::Timer(period), _) => {
                LoopHandle::Timer(clocks.timer().request_after(period, tick))
            }
            (LoopMode::Manual, _) => return,
        };
        self.inner.state.borrow_mut().active = Some(handle);
    }

    // ── Registration ─────────────────────────────────────────────────

    fn next_entry_id(&self) -> u64 {
        let id = self.inner.next_entry.get();
        self.inner.next_entry.set(id + 1);
        id
    }

    /// Register an action to run on every pass.
    ///
    /// Starts the loop if it is stopped (unless manual).
    pub fn schedule(&self, action: impl FnMut() + 'static) -> Subscription {
        let id = self.next_entry_id();
        let slot: ActionSlot = Rc::new(RefCell::new(action));
        self.inner.actions.borrow_mut().insert(id, slot);
        self.ensure_running();
        Subscription::new(&self.inner, EntryKind::Action, id)
    }

    /// Register a watcher.
    ///
    /// The expression is evaluated once, now, to capture the baseline; the
    /// callback does not fire for it. Starts the loop if it is stopped
    /// (unless manual).
    pub fn watch<T: Snapshot>(
        &self,
        expression: impl Fn() -> T + 'static,
        callback: impl FnMut(&T, &T) + 'static,
        mode: WatchMode,
    ) -> Subscription {
        let watcher = Watcher::new(expression, callback, mode);
        let id = self.next_entry_id();
        let slot: WatcherSlot = Rc::new(RefCell::new(watcher));
        self.inner.watchers.borrow_mut().insert(id, slot);
        self.ensure_running();
        Subscription::new(&self.inner, EntryKind::Watcher, id)
    }

    /// Remove every watcher. The loop keeps running.
    pub fn clear_watchers(&self) {
        let drained = std::mem::take(&mut *self.inner.watchers.borrow_mut());
        drop(drained);
    }

    /// Remove every scheduled action. The loop keeps running.
    pub fn clear_scheduled_actions(&self) {
        let drained = std::mem::take(&mut *self.inner.actions.borrow_mut());
        drop(drained);
    }

    // ── Passes ───────────────────────────────────────────────────────

    /// One full pass: all watchers, then all actions.
    pub fn run(&self) {
        let fired = self.evaluate_watchers();
        let executed = self.execute_scheduled_actions();
        self.inner.bump(|s| s.passes += 1);
        tracing::trace!(
            priority = %self.inner.label,
            fired,
            executed,
            "scheduler pass"
        );
    }

    /// Evaluate every watcher in registration order. Returns how many
    /// callbacks fired.
    pub fn evaluate_watchers(&self) -> usize {
        let batch: Vec<(u64, WatcherSlot)> = self
            .inner
            .watchers
            .borrow()
            .iter()
            .map(|(id, slot)| (*id, Rc::clone(slot)))
            .collect();

        let mut fired = 0;
        for (id, slot) in batch {
            if !self.inner.watchers.borrow().contains_key(&id) {
                continue;
            }
            let Ok(mut watcher) = slot.try_borrow_mut() else {
                tracing::trace!(priority = %self.inner.label, entry = id, "skipping re-entrant watcher");
                continue;
            };
            if watcher.evaluate() {
                fired += 1;
            }
        }
        self.inner.bump(|s| s.callbacks_fired += fired as u64);
        fired
    }

    /// Execute every scheduled action in registration order. Returns how
    /// many ran.
    pub fn execute_scheduled_actions(&self) -> usize {
        let batch: Vec<(u64, ActionSlot)> = self
            .inner
            .actions
            .borrow()
            .iter()
            .map(|(id, slot)| (*id, Rc::clone(slot)))
            .collect();

        let mut executed = 0;
        for (id, slot) in batch {
            if !self.inner.actions.borrow().contains_key(&id) {
                continue;
            }
            let Ok(mut action) = slot.try_borrow_mut() else {
                tracing::trace!(priority = %self.inner.label, entry = id, "skipping re-entrant action");
                continue;
            };
            (&mut *action)();
            executed += 1;
        }
        self.inner.bump(|s| s.actions_executed += executed as u64);
        executed
    }

    // ── Introspection ────────────────────────────────────────────────

    #[must_use]
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// The interval given to the last `init`.
    #[must_use]
    pub fn interval(&self) -> Interval {
        self.inner.state.borrow().interval
    }

    /// The loop that interval resolved to on this host.
    #[must_use]
    pub fn mode(&self) -> LoopMode {
        self.inner.state.borrow().mode
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.state.borrow().running
    }

    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.inner.watchers.borrow().len()
    }

    #[must_use]
    pub fn action_count(&self) -> usize {
        self.inner.actions.borrow().len()
    }

    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.inner.stats.get()
    }

    /// Whether both handles refer to the same scheduler.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.borrow();
        f.debug_struct("Scheduler")
            .field("label", &self.inner.label)
            .field("interval", &state.interval)
            .field("mode", &state.mode)
            .field("running", &state.running)
            .field("watchers", &self.inner.watchers.borrow().len())
            .field("actions", &self.inner.actions.borrow().len())
            .finish()
    }
}

// ─── Subscriptions ───────────────────────────────────────────────────────────

/// Which collection a [`Subscription`] points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    Watcher,
    Action,
}

/// Handle returned by [`Scheduler::watch`] and [`Scheduler::schedule`].
///
/// Dropping it does **not** unregister anything; call
/// [`unsubscribe`](Self::unsubscribe), or convert it with
/// [`into_guard`](Self::into_guard) for unsubscribe-on-drop.
pub struct Subscription {
    owner: Weak<SchedulerInner>,
    kind: EntryKind,
    id: u64,
}

impl Subscription {
    fn new(owner: &Rc<SchedulerInner>, kind: EntryKind, id: u64) -> Self {
        Self {
            owner: Rc::downgrade(owner),
            kind,
            id,
        }
    }

    /// Remove exactly this registration.
    ///
    /// Returns `true` if it was still registered. Safe to call repeatedly,
    /// after a clear, or after the scheduler is gone.
    pub fn unsubscribe(&self) -> bool {
        let Some(owner) = self.owner.upgrade() else {
            return false;
        };
        // Removed entries drop after the collection borrow is released.
        match self.kind {
            EntryKind::Watcher => {
                let removed = owner.watchers.borrow_mut().remove(&self.id);
                removed.is_some()
            }
            EntryKind::Action => {
                let removed = owner.actions.borrow_mut().remove(&self.id);
                removed.is_some()
            }
        }
    }

    /// Whether the registration is still present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.owner.upgrade().is_some_and(|owner| match self.kind {
            EntryKind::Watcher => owner.watchers.borrow().contains_key(&self.id),
            EntryKind::Action => owner.actions.borrow().contains_key(&self.id),
        })
    }

    #[must_use]
    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Unsubscribe automatically when the guard is dropped.
    #[must_use]
    pub fn into_guard(self) -> SubscriptionGuard {
        SubscriptionGuard { inner: Some(self) }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

/// RAII form of a [`Subscription`]: unsubscribes on drop.
#[derive(Debug)]
pub struct SubscriptionGuard {
    inner: Option<Subscription>,
}

impl SubscriptionGuard {
    /// Whether the guarded registration is still present.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.as_ref().is_some_and(Subscription::is_active)
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(subscription) = self.inner.take() {
            subscription.unsubscribe();
        }
    }
}
