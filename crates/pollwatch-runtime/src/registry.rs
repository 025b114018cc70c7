#![forbid(unsafe_code)]

//! Priority-keyed schedulers behind one entry point.
//!
//! A [`Registry`] maps priority keys to independent [`Scheduler`]s, each with
//! its own loop. It is an ordinary value owned by the application root; there
//! is no global instance.
//!
//! # Addressing
//!
//! Operations take `Option<&str>`:
//!
//! - `None` broadcasts to every registered scheduler (`stop`, `clear_*`,
//!   `evaluate_watchers`, `execute_scheduled_actions`, `run`) or, for
//!   registrations, targets the default priority, creating it on first use.
//! - `Some(key)` targets exactly that scheduler and fails with
//!   [`RegistryError::UnknownPriority`] when it was never created. A failing
//!   call has no side effect.
//!
//! Only [`Registry::init`] creates named priorities.
//!
//! # Interval placement
//!
//! [`Placement::Interval`] attaches an action to any scheduler already
//! running a timer loop at that period, so two requests for "every 100ms"
//! share one host timer. Otherwise a scheduler keyed
//! `{auto_priority_prefix}{period}` is created for it, with the period in
//! the coarsest exact unit (`auto:100ms`, `auto:1500us`).

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;

use pollwatch_core::{Snapshot, WatchMode};
use web_time::Duration;

use crate::clock::HostClocks;
use crate::config::RegistryConfig;
use crate::error::{RegistryError, Result};
use crate::interval::{Interval, Period};
use crate::scheduler::{Scheduler, Subscription};

/// Where [`Registry::schedule`] puts an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Placement<'a> {
    /// The default priority, created on first use.
    #[default]
    Default,
    /// An existing priority; unknown keys are rejected.
    Priority(&'a str),
    /// Any scheduler ticking at this timer period, created on demand.
    Interval(Duration),
}

impl<'a> From<&'a str> for Placement<'a> {
    fn from(key: &'a str) -> Self {
        Self::Priority(key)
    }
}

impl From<Duration> for Placement<'_> {
    fn from(period: Duration) -> Self {
        Self::Interval(period)
    }
}

/// Owns the priority key → scheduler map.
pub struct Registry {
    clocks: HostClocks,
    config: RegistryConfig,
    schedulers: RefCell<BTreeMap<String, Scheduler>>,
}

impl Registry {
    #[must_use]
    pub fn new(clocks: &HostClocks) -> Self {
        Self::with_config(clocks, RegistryConfig::default())
    }

    #[must_use]
    pub fn with_config(clocks: &HostClocks, config: RegistryConfig) -> Self {
        Self {
            clocks: clocks.clone(),
            config,
            schedulers: RefCell::new(BTreeMap::new()),
        }
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Priorities ───────────────────────────────────────────────────

    /// Get or create the scheduler for `priority` (the default key when
    /// `None`) and `init` it with `interval`.
    pub fn init(&self, interval: Interval, priority: Option<&str>) -> Scheduler {
        let key = priority.unwrap_or(self.config.default_priority.as_str());
        let existing = self.schedulers.borrow().get(key).cloned();
        match existing {
            Some(scheduler) => {
                scheduler.init(interval);
                scheduler
            }
            None => self.create(key, interval),
        }
    }

    /// The scheduler registered under `key`, if any.
    #[must_use]
    pub fn scheduler(&self, key: &str) -> Option<Scheduler> {
        self.schedulers.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.schedulers.borrow().contains_key(key)
    }

    /// Registered keys, sorted.
    #[must_use]
    pub fn priorities(&self) -> Vec<String> {
        self.schedulers.borrow().keys().cloned().collect()
    }

    /// Stop the scheduler under `key` and forget it.
    pub fn remove_priority(&self, key: &str) -> Result<Scheduler> {
        let removed = self.schedulers.borrow_mut().remove(key);
        let scheduler = removed.ok_or_else(|| self.reject(key))?;
        scheduler.stop();
        tracing::debug!(priority = key, "priority removed");
        Ok(scheduler)
    }

    fn create(&self, key: &str, interval: Interval) -> Scheduler {
        let scheduler = Scheduler::builder(&self.clocks)
            .with_label(key)
            .with_fallback_interval(self.config.fallback_interval)
            .build(interval);
        self.schedulers
            .borrow_mut()
            .insert(key.to_string(), scheduler.clone());
        tracing::debug!(priority = key, %interval, "priority created");
        scheduler
    }

    fn default_scheduler(&self) -> Scheduler {
        let key = &self.config.default_priority;
        let existing = self.schedulers.borrow().get(key).cloned();
        existing.unwrap_or_else(|| self.create(key, self.config.default_interval))
    }

    fn lookup(&self, key: &str) -> Result<Scheduler> {
        let found = self.schedulers.borrow().get(key).cloned();
        found.ok_or_else(|| self.reject(key))
    }

    fn reject(&self, key: &str) -> RegistryError {
        tracing::debug!(priority = key, "rejecting unknown priority");
        RegistryError::unknown_priority(key)
    }

    /// Resolve the addressed schedulers before touching any of them, so
    /// callbacks run with no registry borrow held.
    fn targets(&self, priority: Option<&str>) -> Result<Vec<Scheduler>> {
        match priority {
            None => Ok(self.schedulers.borrow().values().cloned().collect()),
            Some(key) => self.lookup(key).map(|scheduler| vec![scheduler]),
        }
    }

    fn for_each(&self, priority: Option<&str>, f: impl Fn(&Scheduler)) -> Result<()> {
        for scheduler in self.targets(priority)? {
            f(&scheduler);
        }
        Ok(())
    }

    fn interval_scheduler(&self, period: Duration) -> Scheduler {
        let wanted = Interval::Every(period).resolve(&self.clocks, self.config.fallback_interval);
        let reusable = self
            .schedulers
            .borrow()
            .iter()
            .find(|(_, scheduler)| scheduler.mode() == wanted)
            .map(|(key, scheduler)| (key.clone(), scheduler.clone()));
        if let Some((key, scheduler)) = reusable {
            tracing::debug!(priority = %key, mode = %wanted, "hooking onto existing interval scheduler");
            return scheduler;
        }

        let period = Period(wanted.period().unwrap_or(period));
        let base = format!("{}{period}", self.config.auto_priority_prefix);
        let mut key = base.clone();
        let mut n = 2;
        while self.contains(&key) {
            key = format!("{base}#{n}");
            n += 1;
        }
        self.create(&key, Interval::Every(period.0))
    }

    // ── Registration ─────────────────────────────────────────────────

    /// Register an action that runs on every pass of the chosen scheduler.
    pub fn schedule(
        &self,
        action: impl FnMut() + 'static,
        placement: Placement<'_>,
    ) -> Result<Subscription> {
        let scheduler = match placement {
            Placement::Default => self.default_scheduler(),
            Placement::Priority(key) => self.lookup(key)?,
            Placement::Interval(period) => self.interval_scheduler(period),
        };
        Ok(scheduler.schedule(action))
    }

    /// Register a watcher on `priority`, or on the default priority
    /// (created on first use) when `None`.
    pub fn watch<T: Snapshot>(
        &self,
        expression: impl Fn() -> T + 'static,
        callback: impl FnMut(&T, &T) + 'static,
        mode: WatchMode,
        priority: Option<&str>,
    ) -> Result<Subscription> {
        let scheduler = match priority {
            Some(key) => self.lookup(key)?,
            None => self.default_scheduler(),
        };
        Ok(scheduler.watch(expression, callback, mode))
    }

    // ── Broadcast-or-targeted ────────────────────────────────────────

    pub fn stop(&self, priority: Option<&str>) -> Result<()> {
        self.for_each(priority, Scheduler::stop)
    }

    pub fn clear_watchers(&self, priority: Option<&str>) -> Result<()> {
        self.for_each(priority, Scheduler::clear_watchers)
    }

    pub fn clear_scheduled_actions(&self, priority: Option<&str>) -> Result<()> {
        self.for_each(priority, Scheduler::clear_scheduled_actions)
    }

    /// Both `clear_watchers` and `clear_scheduled_actions`.
    pub fn clear(&self, priority: Option<&str>) -> Result<()> {
        self.for_each(priority, |scheduler| {
            scheduler.clear_watchers();
            scheduler.clear_scheduled_actions();
        })
    }

    /// Returns the number of callbacks fired.
    pub fn evaluate_watchers(&self, priority: Option<&str>) -> Result<usize> {
        let targets = self.targets(priority)?;
        Ok(targets.iter().map(Scheduler::evaluate_watchers).sum())
    }

    /// Returns the number of actions executed.
    pub fn execute_scheduled_actions(&self, priority: Option<&str>) -> Result<usize> {
        let targets = self.targets(priority)?;
        Ok(targets.iter().map(Scheduler::execute_scheduled_actions).sum())
    }

    /// One full pass on the addressed schedulers.
    pub fn run(&self, priority: Option<&str>) -> Result<()> {
        self.for_each(priority, Scheduler::run)
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("config", &self.config)
            .field("schedulers", &*self.schedulers.borrow())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::interval::LoopMode;
    use std::cell::Cell;
    use std::rc::Rc;

    fn registry() -> (EventLoop, Registry) {
        let host = EventLoop::lab();
        let registry = Registry::new(&host.clocks());
        (host, registry)
    }

    #[test]
    fn init_creates_then_reconfigures() {
        let (host, registry) = registry();
        let first = registry.init(Interval::millis(50), Some("ui"));
        let again = registry.init(Interval::Manual, Some("ui"));
        assert!(first.ptr_eq(&again));
        assert_eq!(first.mode(), LoopMode::Manual);
        assert_eq!(registry.priorities(), ["ui"]);
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn init_without_key_uses_default() {
        let (_host, registry) = registry();
        let scheduler = registry.init(Interval::Frame, None);
        assert_eq!(scheduler.label(), "default");
        assert!(registry.contains("default"));
    }

    #[test]
    fn unknown_key_is_rejected_without_side_effects() {
        let (_host, registry) = registry();
        let ran = Rc::new(Cell::new(false));
        let r = Rc::clone(&ran);
        let err = registry
            .schedule(move || r.set(true), Placement::Priority("WrongPriority"))
            .unwrap_err();
        assert_eq!(err.key(), "WrongPriority");

        let err = registry
            .watch(|| 0, |_, _| {}, WatchMode::Shallow, Some("nope"))
            .unwrap_err();
        assert_eq!(err, RegistryError::unknown_priority("nope"));

        assert!(registry.stop(Some("nope")).is_err());
        assert!(registry.clear(Some("nope")).is_err());
        assert!(registry.run(Some("nope")).is_err());
        assert!(registry.remove_priority("nope").is_err());
        assert!(registry.priorities().is_empty());
        assert!(!ran.get());
    }

    #[test]
    fn default_priority_is_lazy() {
        let (host, registry) = registry();
        assert!(registry.priorities().is_empty());
        registry.schedule(|| {}, Placement::Default).unwrap();
        assert_eq!(registry.priorities(), ["default"]);
        assert_eq!(host.pending(), 1);

        registry.watch(|| 1, |_, _| {}, WatchMode::Deep, None).unwrap();
        assert_eq!(registry.priorities(), ["default"]);
    }

    #[test]
    fn configured_default_interval_applies_to_lazy_creation() {
        let host = EventLoop::lab();
        let config = RegistryConfig::default()
            .with_default_priority("raf")
            .with_default_interval(Interval::Manual);
        let registry = Registry::with_config(&host.clocks(), config);
        registry.schedule(|| {}, Placement::Default).unwrap();

        let scheduler = registry.scheduler("raf").unwrap();
        assert_eq!(scheduler.mode(), LoopMode::Manual);
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn interval_placement_creates_auto_priority() {
        let (_host, registry) = registry();
        registry
            .schedule(|| {}, Placement::Interval(Duration::from_millis(250)))
            .unwrap();
        registry
            .schedule(|| {}, Duration::from_millis(250).into())
            .unwrap();
        assert_eq!(registry.priorities(), ["auto:250ms"]);
        assert_eq!(registry.scheduler("auto:250ms").unwrap().action_count(), 2);
    }

    #[test]
    fn auto_key_collision_gets_suffix() {
        let (_host, registry) = registry();
        registry.init(Interval::Manual, Some("auto:100ms"));
        registry
            .schedule(|| {}, Placement::Interval(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(registry.priorities(), ["auto:100ms", "auto:100ms#2"]);
    }

    #[test]
    fn sub_millisecond_period_keeps_its_own_key() {
        let (_host, registry) = registry();
        registry
            .schedule(|| {}, Placement::Interval(Duration::from_micros(100_500)))
            .unwrap();
        registry
            .schedule(|| {}, Placement::Interval(Duration::from_millis(100)))
            .unwrap();
        assert_eq!(registry.priorities(), ["auto:100500us", "auto:100ms"]);
    }

    #[test]
    fn frame_fallback_counts_as_timer_for_reuse() {
        let host = EventLoop::lab().without_frames();
        let registry = Registry::new(&host.clocks());
        registry.init(Interval::Frame, None);
        registry
            .schedule(|| {}, Placement::Interval(Duration::from_millis(16)))
            .unwrap();
        assert_eq!(registry.priorities(), ["default"]);
    }

    #[test]
    fn remove_priority_stops_and_forgets() {
        let (host, registry) = registry();
        registry.init(Interval::millis(10), Some("a"));
        let removed = registry.remove_priority("a").unwrap();
        assert!(!removed.is_running());
        assert!(!registry.contains("a"));
        assert_eq!(host.pending(), 0);
    }

    #[test]
    fn placement_conversions() {
        assert_eq!(Placement::from("x"), Placement::Priority("x"));
        assert_eq!(
            Placement::from(Duration::from_millis(5)),
            Placement::Interval(Duration::from_millis(5))
        );
        assert_eq!(Placement::default(), Placement::Default);
    }
}
