#![forbid(unsafe_code)]

//! A single polled expression and the callback fired when it changes.
//!
//! # Lifecycle
//!
//! 1. [`Watcher::new`] evaluates the expression once and stores the result as
//!    the baseline. The callback does **not** fire.
//! 2. Each [`Watcher::run`] re-evaluates the expression and compares it with
//!    the baseline according to the [`WatchMode`]. On a change the callback
//!    receives `(new, old)` and the new snapshot becomes the baseline.
//!
//! # Invariants
//!
//! 1. The baseline always equals (per the mode) the value seen by the most
//!    recent `run()`, whether or not that run fired.
//! 2. In [`WatchMode::Deep`] the baseline is a structural copy: mutating the
//!    live object after a run cannot alter it.
//! 3. In [`WatchMode::Shallow`] the baseline is the value itself (no copy).
//! 4. A run fires the callback at most once, however many members changed.

use std::fmt;

use crate::snapshot::Snapshot;

/// How consecutive snapshots are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WatchMode {
    /// Value equality for primitives, identity for shared nodes.
    #[default]
    Shallow,
    /// Recursive structural comparison over the union of members.
    Deep,
}

impl WatchMode {
    /// `Deep` if `deep` is true, else `Shallow`.
    #[must_use]
    pub const fn from_flag(deep: bool) -> Self {
        if deep { Self::Deep } else { Self::Shallow }
    }

    #[must_use]
    pub const fn is_deep(self) -> bool {
        matches!(self, Self::Deep)
    }
}

type Expression<T> = Box<dyn Fn() -> T>;
type Callback<T> = Box<dyn FnMut(&T, &T)>;

/// A bound expression/callback pair with its last observed snapshot.
pub struct Watcher<T: Snapshot> {
    expression: Expression<T>,
    callback: Callback<T>,
    last: T,
    mode: WatchMode,
    fire_count: u64,
}

impl<T: Snapshot> Watcher<T> {
    /// Create a watcher and capture its baseline.
    pub fn new(
        expression: impl Fn() -> T + 'static,
        callback: impl FnMut(&T, &T) + 'static,
        mode: WatchMode,
    ) -> Self {
        let first = expression();
        let last = match mode {
            WatchMode::Shallow => first,
            WatchMode::Deep => first.structural_copy(),
        };
        Self {
            expression: Box::new(expression),
            callback: Box::new(callback),
            last,
            mode,
            fire_count: 0,
        }
    }

    /// Re-evaluate the expression. Does not touch the baseline.
    pub fn value(&self) -> T {
        (self.expression)()
    }

    /// Evaluate, compare, and fire the callback on change.
    ///
    /// Returns whether the callback fired.
    pub fn run(&mut self) -> bool {
        let value = self.value();
        let changed = match self.mode {
            WatchMode::Shallow => !value.same(&self.last),
            WatchMode::Deep => value.deep_changed(&self.last),
        };
        if !changed {
            return false;
        }

        (self.callback)(&value, &self.last);
        self.last = match self.mode {
            WatchMode::Shallow => value,
            WatchMode::Deep => value.structural_copy(),
        };
        self.fire_count += 1;
        true
    }

    /// The baseline the next run compares against.
    pub fn last_value(&self) -> &T {
        &self.last
    }

    pub fn mode(&self) -> WatchMode {
        self.mode
    }

    /// How many times the callback has fired.
    pub fn fire_count(&self) -> u64 {
        self.fire_count
    }
}

impl<T: Snapshot + fmt::Debug> fmt::Debug for Watcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("last", &self.last)
            .field("mode", &self.mode)
            .field("fire_count", &self.fire_count)
            .finish()
    }
}

/// Object-safe view of a watcher, so one scheduler can drive watchers of
/// different snapshot types.
pub trait Evaluate {
    /// Run one change-detection pass. Returns whether the callback fired.
    fn evaluate(&mut self) -> bool;

    fn mode(&self) -> WatchMode;
}

impl<T: Snapshot> Evaluate for Watcher<T> {
    fn evaluate(&mut self) -> bool {
        self.run()
    }

    fn mode(&self) -> WatchMode {
        self.mode
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    fn recorder<T: Clone + 'static>() -> (Rc<RefCell<Vec<(T, T)>>>, impl FnMut(&T, &T)) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        (log, move |new: &T, old: &T| {
            sink.borrow_mut().push((new.clone(), old.clone()))
        })
    }

    #[test]
    fn value_reads_current_expression() {
        let source = Rc::new(Cell::new(1));
        let s = Rc::clone(&source);
        let watcher = Watcher::new(move || s.get(), |_, _| {}, WatchMode::Shallow);
        assert_eq!(watcher.value(), 1);
        source.set(3);
        assert_eq!(watcher.value(), 3);
        assert_eq!(*watcher.last_value(), 1, "value() leaves the baseline alone");
    }

    #[test]
    fn construction_does_not_fire() {
        let (log, cb) = recorder::<i32>();
        let mut w = Watcher::new(|| 7, cb, WatchMode::Shallow);
        assert!(log.borrow().is_empty());
        assert!(!w.run());
        assert_eq!(w.fire_count(), 0);
    }

    #[test]
    fn shallow_fires_with_new_and_old() {
        let source = Rc::new(Cell::new(1));
        let s = Rc::clone(&source);
        let (log, cb) = recorder::<i32>();
        let mut w = Watcher::new(move || s.get(), cb, WatchMode::Shallow);

        source.set(5);
        assert!(w.run());
        assert_eq!(log.borrow().as_slice(), &[(5, 1)]);

        assert!(!w.run(), "no change since last run");
        assert_eq!(*w.last_value(), 5);
    }

    #[test]
    fn shallow_ignores_in_place_mutation_of_same_node() {
        let live = Value::map([("foo", Value::from(1))]);
        let l = live.clone();
        let (log, cb) = recorder::<Value>();
        let mut w = Watcher::new(move || l.clone(), cb, WatchMode::Shallow);

        live.insert("foo", 5);
        assert!(!w.run(), "same node: shallow sees no change");
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn shallow_fires_on_node_replacement() {
        let slot = Rc::new(RefCell::new(Value::map([("foo", Value::from(1))])));
        let s = Rc::clone(&slot);
        let mut w = Watcher::new(move || s.borrow().clone(), |_, _| {}, WatchMode::Shallow);

        *slot.borrow_mut() = Value::map([("foo", Value::from(1))]);
        assert!(w.run(), "new node, even with equal contents");
    }

    #[test]
    fn deep_fires_once_then_settles() {
        let live = Value::map([("foo", Value::from(1))]);
        let l = live.clone();
        let (log, cb) = recorder::<Value>();
        let mut w = Watcher::new(move || l.clone(), cb, WatchMode::Deep);

        live.insert("foo", 5);
        live.insert("bar", 6);
        assert!(w.run());
        assert!(!w.run());

        let log = log.borrow();
        assert_eq!(log.len(), 1, "one firing for several member changes");
        let (new, old) = &log[0];
        assert_eq!(new.get("foo"), Some(Value::from(5)));
        assert_eq!(old.get("foo"), Some(Value::from(1)));
        assert_eq!(old.get("bar"), None);
    }

    #[test]
    fn deep_baseline_is_a_copy() {
        let live = Value::map([("foo", Value::from(1))]);
        let l = live.clone();
        let mut w = Watcher::new(move || l.clone(), |_, _| {}, WatchMode::Deep);

        assert!(!w.last_value().same(&live));
        live.insert("foo", 2);
        assert_eq!(w.last_value().get("foo"), Some(Value::from(1)));
        assert!(w.run());
        live.insert("foo", 3);
        assert_eq!(w.last_value().get("foo"), Some(Value::from(2)));
    }

    #[test]
    fn deep_detects_replacement_from_scalar_to_object() {
        let slot = Rc::new(RefCell::new(Value::from(1)));
        let s = Rc::clone(&slot);
        let mut w = Watcher::new(move || s.borrow().clone(), |_, _| {}, WatchMode::Deep);

        *slot.borrow_mut() = Value::map([("foo", Value::from(1))]);
        assert!(w.run());

        slot.borrow().insert("foo", 5);
        assert!(w.run());
        assert_eq!(w.fire_count(), 2);
    }

    #[test]
    fn evaluate_trait_object() {
        let source = Rc::new(Cell::new(0u8));
        let s = Rc::clone(&source);
        let mut boxed: Box<dyn Evaluate> =
            Box::new(Watcher::new(move || s.get(), |_, _| {}, WatchMode::from_flag(false)));
        assert_eq!(boxed.mode(), WatchMode::Shallow);
        source.set(1);
        assert!(boxed.evaluate());
        assert!(!boxed.evaluate());
    }
}
