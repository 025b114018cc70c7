#![forbid(unsafe_code)]

//! The [`Snapshot`] trait: what a watched expression may return.
//!
//! A snapshot is a point-in-time reading of some external state. Watchers
//! compare consecutive snapshots in one of two ways:
//!
//! - **Shallow** ([`Snapshot::same`]): primitives compare by value, shared
//!   handles (`Rc<T>`, composite [`Value`](crate::Value) nodes) compare by
//!   identity. Owned containers have no identity of their own, so they compare
//!   member-wise with the same rule.
//! - **Deep** ([`Snapshot::deep_changed`]): walk the union of members present
//!   in either snapshot and report a change if any member was added, removed,
//!   or differs at any depth.
//!
//! After a deep-mode change the watcher keeps a [`Snapshot::structural_copy`]
//! as its baseline, so mutating the live object afterwards cannot rewrite
//! history.
//!
//! # Invariants
//!
//! 1. `a.same(&a)` and `!a.deep_changed(&a)` for every value `a`.
//! 2. `!a.deep_changed(&a.structural_copy())`.
//! 3. For primitives, `same` and `!deep_changed` agree.
//! 4. `structural_copy` shares no interior-mutable state with its source.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::rc::Rc;

/// A value a watcher can observe and diff.
pub trait Snapshot: Clone + 'static {
    /// Shallow comparison: value equality for primitives, identity for
    /// shared handles.
    fn same(&self, other: &Self) -> bool;

    /// Structural comparison against an older snapshot.
    ///
    /// Returns `true` if any member was added, removed, or changed at any
    /// depth.
    fn deep_changed(&self, old: &Self) -> bool {
        !self.same(old)
    }

    /// An independent copy of the whole reachable structure.
    fn structural_copy(&self) -> Self {
        self.clone()
    }
}

macro_rules! impl_snapshot_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl Snapshot for $ty {
                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

impl_snapshot_by_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    String,
    &'static str,
    Rc<str>,
);

macro_rules! impl_snapshot_float {
    ($($ty:ty),*) => {
        $(
            impl Snapshot for $ty {
                /// NaN is the same as NaN, so a NaN reading never fires forever.
                #[inline]
                fn same(&self, other: &Self) -> bool {
                    self == other || (self.is_nan() && other.is_nan())
                }
            }
        )*
    };
}

impl_snapshot_float!(f32, f64);

impl<T: Snapshot> Snapshot for Option<T> {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same(b),
            (None, None) => true,
            _ => false,
        }
    }

    fn deep_changed(&self, old: &Self) -> bool {
        match (self, old) {
            (Some(a), Some(b)) => a.deep_changed(b),
            (None, None) => false,
            _ => true,
        }
    }

    fn structural_copy(&self) -> Self {
        self.as_ref().map(Snapshot::structural_copy)
    }
}

impl<T: Snapshot> Snapshot for Vec<T> {
    fn same(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same(b))
    }

    fn deep_changed(&self, old: &Self) -> bool {
        // Indices past the shorter side are absent on one side: a change.
        self.len() != old.len() || self.iter().zip(old).any(|(a, b)| a.deep_changed(b))
    }

    fn structural_copy(&self) -> Self {
        self.iter().map(Snapshot::structural_copy).collect()
    }
}

impl<K, V> Snapshot for BTreeMap<K, V>
where
    K: Ord + Clone + 'static,
    V: Snapshot,
{
    fn same(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.same(o)))
    }

    fn deep_changed(&self, old: &Self) -> bool {
        self.iter()
            .any(|(k, v)| old.get(k).is_none_or(|o| v.deep_changed(o)))
            || old.keys().any(|k| !self.contains_key(k))
    }

    fn structural_copy(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone(), v.structural_copy()))
            .collect()
    }
}

impl<K, V, S> Snapshot for HashMap<K, V, S>
where
    K: Eq + Hash + Clone + 'static,
    V: Snapshot,
    S: std::hash::BuildHasher + Clone + Default + 'static,
{
    fn same(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self
                .iter()
                .all(|(k, v)| other.get(k).is_some_and(|o| v.same(o)))
    }

    fn deep_changed(&self, old: &Self) -> bool {
        self.iter()
            .any(|(k, v)| old.get(k).is_none_or(|o| v.deep_changed(o)))
            || old.keys().any(|k| !self.contains_key(k))
    }

    fn structural_copy(&self) -> Self {
        self.iter()
            .map(|(k, v)| (k.clone(), v.structural_copy()))
            .collect()
    }
}

impl<T: Snapshot> Snapshot for Rc<T> {
    /// Identity of the allocation, not the contents.
    fn same(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }

    fn deep_changed(&self, old: &Self) -> bool {
        !Rc::ptr_eq(self, old) && (**self).deep_changed(old)
    }

    fn structural_copy(&self) -> Self {
        Rc::new((**self).structural_copy())
    }
}

/// `RefCell<T>` is the interior-mutable half of `Rc<RefCell<T>>`.
///
/// No cycle guard here: cyclic data must be modelled with [`Value`](crate::Value).
impl<T: Snapshot> Snapshot for RefCell<T> {
    fn same(&self, other: &Self) -> bool {
        self.borrow().same(&other.borrow())
    }

    fn deep_changed(&self, old: &Self) -> bool {
        self.borrow().deep_changed(&old.borrow())
    }

    fn structural_copy(&self) -> Self {
        RefCell::new(self.borrow().structural_copy())
    }
}

macro_rules! impl_snapshot_tuple {
    ($($name:ident $idx:tt),+) => {
        impl<$($name: Snapshot),+> Snapshot for ($($name,)+) {
            fn same(&self, other: &Self) -> bool {
                $(self.$idx.same(&other.$idx))&&+
            }

            fn deep_changed(&self, old: &Self) -> bool {
                $(self.$idx.deep_changed(&old.$idx))||+
            }

            fn structural_copy(&self) -> Self {
                ($(self.$idx.structural_copy(),)+)
            }
        }
    };
}

impl_snapshot_tuple!(A 0, B 1);
impl_snapshot_tuple!(A 0, B 1, C 2);
impl_snapshot_tuple!(A 0, B 1, C 2, D 3);
