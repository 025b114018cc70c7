#![forbid(unsafe_code)]

//! Deep comparison and structural copy for [`Value`] graphs.
//!
//! # Algorithm
//!
//! [`deep_changed`] walks two graphs in lockstep. At each composite pair it
//! visits the **union** of keys (maps) or indices (lists) present on either
//! side; a member present on one side only is compared against an *absent*
//! sentinel, which differs from every present value. Scalars compare by value.
//! The first difference found short-circuits the walk.
//!
//! # Cycles
//!
//! Each `(new node, old node)` pair is entered at most once. Meeting a pair
//! again means the comparison is already in progress (or already finished
//! without finding a difference further up), so the revisit contributes
//! "unchanged". This is the coinductive reading of structural equality: two
//! cyclic graphs are equal iff no finite path leads to a difference.
//!
//! [`structural_copy`] memoizes node addresses, so the copy has the same
//! sharing and the same cycles as the source, and no node in common with it.
//!
//! # Invariants
//!
//! 1. `!deep_changed(v, v)` and `!deep_changed(&structural_copy(v), v)`.
//! 2. Both functions terminate on every graph, cyclic or not.
//! 3. Empty composites of the same kind are unchanged; a list is never
//!    unchanged against a map.

use std::collections::{HashMap, HashSet};

use crate::snapshot::Snapshot;
use crate::value::{Members, Shared, Value};

/// Whether `new` differs structurally from `old`.
#[must_use]
pub fn deep_changed(new: &Value, old: &Value) -> bool {
    let mut visited = HashSet::new();
    changed(new, old, &mut visited)
}

/// An independent copy of everything reachable from `value`.
#[must_use]
pub fn structural_copy(value: &Value) -> Value {
    let mut copies = HashMap::new();
    copy(value, &mut copies)
}

fn changed(new: &Value, old: &Value, visited: &mut HashSet<(usize, usize)>) -> bool {
    match (new, old) {
        (Value::List(a), Value::List(b)) => {
            if a.ptr_eq(b) || !visited.insert((a.addr(), b.addr())) {
                return false;
            }
            let (a, b) = (a.borrow(), b.borrow());
            let len = a.len().max(b.len());
            (0..len).any(|i| member_changed(a.get(i), b.get(i), visited))
        }
        (Value::Map(a), Value::Map(b)) => {
            if a.ptr_eq(b) || !visited.insert((a.addr(), b.addr())) {
                return false;
            }
            let (a, b) = (a.borrow(), b.borrow());
            a.iter()
                .any(|(k, v)| member_changed(Some(v), b.get(k), visited))
                || b.keys().any(|k| !a.contains_key(k))
        }
        (new, old) => !new.same(old),
    }
}

/// `None` is the absent sentinel.
fn member_changed(
    new: Option<&Value>,
    old: Option<&Value>,
    visited: &mut HashSet<(usize, usize)>,
) -> bool {
    match (new, old) {
        (Some(n), Some(o)) => changed(n, o, visited),
        (None, None) => false,
        _ => true,
    }
}

fn copy(value: &Value, copies: &mut HashMap<usize, Value>) -> Value {
    match value {
        Value::List(node) => {
            if let Some(done) = copies.get(&node.addr()) {
                return done.clone();
            }
            let fresh = Shared::new(Vec::new());
            copies.insert(node.addr(), Value::List(fresh.clone()));
            let items: Vec<Value> = node.borrow().iter().map(|v| copy(v, copies)).collect();
            *fresh.borrow_mut() = items;
            Value::List(fresh)
        }
        Value::Map(node) => {
            if let Some(done) = copies.get(&node.addr()) {
                return done.clone();
            }
            let fresh = Shared::new(Members::new());
            copies.insert(node.addr(), Value::Map(fresh.clone()));
            let members: Members = node
                .borrow()
                .iter()
                .map(|(k, v)| (k.clone(), copy(v, copies)))
                .collect();
            *fresh.borrow_mut() = members;
            Value::Map(fresh)
        }
        scalar => scalar.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn foo(n: i32) -> Value {
        Value::map([("foo", Value::from(n))])
    }

    #[test]
    fn unchanged_against_itself_and_copy() {
        let v = Value::map([("foo", Value::from(1)), ("obj", foo(1))]);
        assert!(!deep_changed(&v, &v));
        assert!(!deep_changed(&v, &structural_copy(&v)));
    }

    #[test]
    fn member_mutation_detected() {
        let live = foo(1);
        let baseline = structural_copy(&live);
        live.insert("foo", 5);
        assert!(deep_changed(&live, &baseline));
    }

    #[test]
    fn addition_detected_without_existing_member_change() {
        let live = foo(1);
        let baseline = structural_copy(&live);
        live.insert("bar", 5);
        assert!(deep_changed(&live, &baseline));
    }

    #[test]
    fn removal_detected() {
        let live = Value::map([("foo", Value::from(1)), ("bar", Value::from(2))]);
        let baseline = structural_copy(&live);
        live.remove("bar");
        assert!(deep_changed(&live, &baseline));
    }

    #[test]
    fn nested_mutation_detected() {
        let inner = Value::map([("fooFoo", Value::from(1))]);
        let live = Value::map([("foo", inner.clone())]);
        let baseline = structural_copy(&live);
        inner.insert("fooFoo", 5);
        assert!(deep_changed(&live, &baseline));
    }

    #[test]
    fn list_growth_and_shrink() {
        let live = Value::list([Value::from(1)]);
        let baseline = structural_copy(&live);
        live.push(Value::Null);
        assert!(deep_changed(&live, &baseline), "absent differs from null");
        assert!(deep_changed(&baseline, &live));
    }

    #[test]
    fn empty_composites() {
        assert!(!deep_changed(&Value::list([]), &Value::list([])));
        assert!(!deep_changed(&Value::empty_map(), &Value::empty_map()));
        assert!(deep_changed(&Value::list([]), &Value::empty_map()));
    }

    #[test]
    fn scalar_vs_composite() {
        assert!(deep_changed(&Value::from(1), &foo(1)));
        assert!(deep_changed(&foo(1), &Value::Null));
    }

    #[test]
    fn copy_is_independent() {
        let live = Value::map([("obj", foo(1))]);
        let baseline = structural_copy(&live);
        assert!(!live.same(&baseline));
        assert!(!live.get("obj").unwrap().same(&baseline.get("obj").unwrap()));
        live.get("obj").unwrap().insert("foo", 2);
        assert_eq!(baseline.get("obj").unwrap().get("foo"), Some(Value::from(1)));
    }

    #[test]
    fn copy_preserves_sharing() {
        let shared = foo(1);
        let live = Value::list([shared.clone(), shared]);
        let baseline = structural_copy(&live);
        let (a, b) = (baseline.at(0).unwrap(), baseline.at(1).unwrap());
        assert!(a.same(&b));
    }

    #[test]
    fn cyclic_graphs_terminate() {
        let a = Value::empty_map();
        a.insert("self", a.clone());
        a.insert("n", 1);

        let b = structural_copy(&a);
        let b_self = b.get("self").unwrap();
        assert!(b_self.same(&b), "copy keeps its own cycle");
        assert!(!b_self.same(&a), "and shares nothing with the source");

        assert!(!deep_changed(&a, &b));
        a.insert("n", 2);
        assert!(deep_changed(&a, &b));
    }

    #[test]
    fn mutually_recursive_graphs() {
        let left = Value::empty_map();
        let right = Value::empty_map();
        left.insert("peer", right.clone());
        right.insert("peer", left.clone());
        let baseline = structural_copy(&left);
        assert!(!deep_changed(&left, &baseline));

        right.insert("extra", true);
        assert!(deep_changed(&left, &baseline));
    }
}
