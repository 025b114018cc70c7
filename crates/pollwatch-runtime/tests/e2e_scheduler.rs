//! E2E: schedulers driven by the lab event loop.
//!
//! Lab time makes tick counts exact. Every test builds its own loop, so
//! nothing is shared between tests.
//!
//! Run with `RUST_LOG=pollwatch_runtime=trace` to see per-pass events.

#![forbid(unsafe_code)]

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use pollwatch_core::{Value, WatchMode};
use pollwatch_runtime::{EventLoop, Interval, LoopMode, Scheduler};
use web_time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

type Calls<T> = Rc<RefCell<Vec<(T, T)>>>;

fn recorder<T: Clone + 'static>() -> (Calls<T>, impl FnMut(&T, &T) + 'static) {
    let calls: Calls<T> = Rc::new(RefCell::new(Vec::new()));
    let c = Rc::clone(&calls);
    (calls, move |new: &T, old: &T| {
        c.borrow_mut().push((new.clone(), old.clone()))
    })
}

// ── Watch scenarios ─────────────────────────────────────────────────────

#[test]
fn shallow_watch_reports_new_and_old() {
    init_tracing();
    let host = EventLoop::lab().with_frame_interval(Duration::from_millis(16));
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);

    let variable = Rc::new(Cell::new(1));
    let v = Rc::clone(&variable);
    let (calls, callback) = recorder::<i32>();
    scheduler.watch(move || v.get(), callback, WatchMode::Shallow);

    host.next_frame();
    assert!(calls.borrow().is_empty(), "baseline never fires");

    variable.set(5);
    host.next_frame();
    assert_eq!(*calls.borrow(), [(5, 1)]);

    host.next_frame();
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn deep_watch_sees_member_change_once() {
    init_tracing();
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);

    let object = Value::map([("foo", Value::from(1))]);
    let o = object.clone();
    let (calls, callback) = recorder::<Value>();
    scheduler.watch(move || o.clone(), callback, WatchMode::Deep);

    object.insert("foo", 5);
    host.next_frame();
    {
        let calls = calls.borrow();
        assert_eq!(calls.len(), 1);
        let (new, old) = &calls[0];
        assert_eq!(new.get("foo"), Some(Value::from(5)));
        assert_eq!(old.get("foo"), Some(Value::from(1)), "old is a snapshot");
    }

    host.next_frame();
    host.next_frame();
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn deep_watch_sees_added_member() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);

    let object = Value::map([("foo", Value::from(1))]);
    let o = object.clone();
    let (calls, callback) = recorder::<Value>();
    scheduler.watch(move || o.clone(), callback, WatchMode::Deep);

    object.insert("bar", 5);
    host.next_frame();
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn shallow_watch_ignores_in_place_mutation() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);

    let object = Value::map([("foo", Value::from(1))]);
    let o = object.clone();
    let (calls, callback) = recorder::<Value>();
    scheduler.watch(move || o.clone(), callback, WatchMode::Shallow);

    object.insert("foo", 2);
    host.next_frame();
    assert!(calls.borrow().is_empty(), "same node, same identity");
}

#[test]
fn deep_watch_fires_once_for_many_changes() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::millis(10));

    let inner = Value::list([Value::from(1), Value::from(2)]);
    let object = Value::map([("a", Value::from(true)), ("nested", inner.clone())]);
    let o = object.clone();
    let (calls, callback) = recorder::<Value>();
    scheduler.watch(move || o.clone(), callback, WatchMode::Deep);

    object.insert("a", false);
    object.remove("nested");
    inner.push(3);
    object.insert("c", "new");
    host.run_for(Duration::from_millis(10));
    assert_eq!(calls.borrow().len(), 1);
}

// ── Timing ──────────────────────────────────────────────────────────────

#[test]
fn timer_action_fires_four_times_in_410ms() {
    init_tracing();
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::millis(100));

    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    scheduler.schedule(move || c.set(c.get() + 1));

    host.run_for(Duration::from_millis(410));
    assert_eq!(count.get(), 4);
    assert_eq!(host.pending(), 1);
}

#[test]
fn frame_request_falls_back_to_16ms_timer() {
    let host = EventLoop::lab().without_frames();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);
    assert_eq!(scheduler.mode(), LoopMode::Timer(Duration::from_millis(16)));

    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    scheduler.schedule(move || c.set(c.get() + 1));

    host.run_for(Duration::from_millis(100));
    assert_eq!(count.get(), 6, "16, 32, 48, 64, 80, 96");
}

#[test]
fn manual_mode_only_runs_on_request() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Manual);

    let variable = Rc::new(Cell::new(0));
    let v = Rc::clone(&variable);
    let (calls, callback) = recorder::<i32>();
    scheduler.watch(move || v.get(), callback, WatchMode::Shallow);

    variable.set(1);
    host.run_for(Duration::from_secs(5));
    assert!(calls.borrow().is_empty());

    assert_eq!(scheduler.evaluate_watchers(), 1);
    assert_eq!(*calls.borrow(), [(1, 0)]);
}

#[test]
fn switching_modes_keeps_one_request() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::Frame);
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    scheduler.schedule(move || c.set(c.get() + 1));

    host.run_for(Duration::from_millis(50));
    scheduler.init(Interval::millis(20));
    assert_eq!(host.pending(), 1);

    let before = count.get();
    host.run_for(Duration::from_millis(100));
    assert_eq!(count.get() - before, 5);
}

#[test]
fn stop_then_restart_resumes_cadence() {
    let host = EventLoop::lab();
    let scheduler = Scheduler::new(&host.clocks(), Interval::millis(25));
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    scheduler.schedule(move || c.set(c.get() + 1));

    host.run_for(Duration::from_millis(100));
    assert_eq!(count.get(), 4);

    scheduler.stop();
    host.run_for(Duration::from_millis(100));
    assert_eq!(count.get(), 4);

    scheduler.init(Interval::millis(25));
    assert_eq!(count.get(), 5, "restart runs immediately");
    host.run_for(Duration::from_millis(50));
    assert_eq!(count.get(), 7);
}

// ── Real time ───────────────────────────────────────────────────────────

#[test]
fn real_time_smoke() {
    let host = EventLoop::real();
    let scheduler = Scheduler::new(&host.clocks(), Interval::millis(20));
    let count = Rc::new(Cell::new(0));
    let c = Rc::clone(&count);
    scheduler.schedule(move || c.set(c.get() + 1));

    host.run_for(Duration::from_millis(210));
    let fired = count.get();
    assert!((5..=10).contains(&fired), "fired {fired} times");
}
