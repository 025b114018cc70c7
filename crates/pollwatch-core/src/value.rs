#![forbid(unsafe_code)]

//! Dynamic, shared, in-place mutable snapshot values.
//!
//! [`Value`] models the "arbitrary shape" a watched expression can return:
//! scalars, ordered lists, and keyed maps of further values. Composite nodes
//! live behind a [`Shared`] handle (`Rc<RefCell<..>>`), so an expression can
//! hand out the *same* live object on every evaluation while other code
//! mutates it in place. That is what makes shallow and deep watching differ:
//!
//! - shallow: two composite values are the same iff they are the same node;
//! - deep: two composite values are compared member by member.
//!
//! Because nodes are shared, a `Value` graph may contain cycles. All
//! traversals in this crate (comparison, copy, `Debug`) are cycle-safe.
//!
//! # Example
//!
//! ```
//! use pollwatch_core::{Snapshot, Value};
//!
//! let live = Value::map([("foo", Value::from(1))]);
//! let baseline = live.structural_copy();
//!
//! live.insert("foo", 5);
//! assert!(live.same(&live.clone()), "same node");
//! assert!(live.deep_changed(&baseline), "member changed");
//! ```

use std::cell::{Ref, RefCell, RefMut};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use thiserror::Error;

use crate::diff;
use crate::snapshot::Snapshot;

/// Keyed members of a map node.
pub type Members = BTreeMap<String, Value>;

/// A shared, interior-mutable composite node with reference identity.
///
/// Cloning a `Shared` creates a new handle to the **same** node.
pub struct Shared<T> {
    inner: Rc<RefCell<T>>,
}

impl<T> Shared<T> {
    /// Wrap `value` in a fresh node.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: Rc::new(RefCell::new(value)),
        }
    }

    /// Borrow the node contents.
    ///
    /// # Panics
    ///
    /// Panics if the node is currently mutably borrowed.
    pub fn borrow(&self) -> Ref<'_, T> {
        self.inner.borrow()
    }

    /// Mutably borrow the node contents.
    ///
    /// # Panics
    ///
    /// Panics if the node is currently borrowed.
    pub fn borrow_mut(&self) -> RefMut<'_, T> {
        self.inner.borrow_mut()
    }

    /// Whether both handles point at the same node.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Stable address of the node, used as a visited-set key.
    #[must_use]
    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.inner) as *const () as usize
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// A snapshot value of arbitrary shape.
///
/// Scalars compare by value. [`Value::List`] and [`Value::Map`] are shared
/// nodes: cloning the `Value` clones the handle, not the contents. Use
/// [`Snapshot::structural_copy`] for an independent copy.
#[derive(Clone, Default)]
pub enum Value {
    /// Absence of a meaningful value.
    #[default]
    Null,
    /// A boolean.
    Bool(bool),
    /// A number. NaN is treated as the same as NaN.
    Number(f64),
    /// Immutable text.
    Text(Rc<str>),
    /// An ordered list of values.
    List(Shared<Vec<Value>>),
    /// String-keyed members.
    Map(Shared<Members>),
}

impl Value {
    /// A new list node.
    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(Shared::new(items.into_iter().collect()))
    }

    /// A new map node.
    #[must_use]
    pub fn map<K: Into<String>>(members: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Shared::new(
            members.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// An empty map node.
    #[must_use]
    pub fn empty_map() -> Self {
        Self::Map(Shared::default())
    }

    /// Whether this is a list or map node.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        matches!(self, Self::List(_) | Self::Map(_))
    }

    /// Short name of the variant, for diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&Shared<Vec<Value>>> {
        match self {
            Self::List(node) => Some(node),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Shared<Members>> {
        match self {
            Self::Map(node) => Some(node),
            _ => None,
        }
    }

    /// Member `key` of a map node (a cheap handle clone).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.as_map().and_then(|m| m.borrow().get(key).cloned())
    }

    /// Element `index` of a list node (a cheap handle clone).
    #[must_use]
    pub fn at(&self, index: usize) -> Option<Value> {
        self.as_list().and_then(|l| l.borrow().get(index).cloned())
    }

    /// Number of members of a composite node; 0 for scalars.
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::List(l) => l.borrow().len(),
            Self::Map(m) => m.borrow().len(),
            _ => 0,
        }
    }

    /// Whether [`len`](Self::len) is zero.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set member `key` of a map node in place, returning the previous value.
    ///
    /// Returns `None` without effect when `self` is not a map.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.as_map()
            .and_then(|m| m.borrow_mut().insert(key.into(), value.into()))
    }

    /// Remove member `key` of a map node in place.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.as_map().and_then(|m| m.borrow_mut().remove(key))
    }

    /// Append to a list node in place. Returns `false` if `self` is not a list.
    pub fn push(&self, value: impl Into<Value>) -> bool {
        match self.as_list() {
            Some(l) => {
                l.borrow_mut().push(value.into());
                true
            }
            None => false,
        }
    }

    /// Replace element `index` of a list node in place.
    ///
    /// Returns the previous element, or `None` if out of bounds or not a list.
    pub fn set_at(&self, index: usize, value: impl Into<Value>) -> Option<Value> {
        let node = self.as_list()?;
        let mut items = node.borrow_mut();
        let slot = items.get_mut(index)?;
        Some(std::mem::replace(slot, value.into()))
    }
}

impl Snapshot for Value {
    fn same(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.same(b),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            _ => false,
        }
    }

    fn deep_changed(&self, old: &Self) -> bool {
        diff::deep_changed(self, old)
    }

    fn structural_copy(&self) -> Self {
        diff::structural_copy(self)
    }
}

/// Structural equality (cycle-safe); use [`Snapshot::same`] for identity.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        !diff::deep_changed(self, other)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        debug_value(self, f, &mut path)
    }
}

/// Renders JSON-like output; a node already on the current path prints as
/// `<cycle>`.
fn debug_value(value: &Value, f: &mut fmt::Formatter<'_>, path: &mut Vec<usize>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("null"),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Number(n) => write!(f, "{n}"),
        Value::Text(s) => write!(f, "{s:?}"),
        Value::List(node) => {
            if path.contains(&node.addr()) {
                return f.write_str("<cycle>");
            }
            path.push(node.addr());
            f.write_str("[")?;
            for (i, item) in node.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                debug_value(item, f, path)?;
            }
            path.pop();
            f.write_str("]")
        }
        Value::Map(node) => {
            if path.contains(&node.addr()) {
                return f.write_str("<cycle>");
            }
            path.push(node.addr());
            f.write_str("{")?;
            for (i, (key, item)) in node.borrow().iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key:?}: ")?;
                debug_value(item, f, path)?;
            }
            path.pop();
            f.write_str("}")
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

macro_rules! impl_from_number {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(n: $ty) -> Self {
                    Self::Number(f64::from(n))
                }
            }
        )*
    };
}

impl_from_number!(i8, i16, i32, u8, u16, u32, f32, f64);

/// An integer with no exact `f64` representation (magnitude above 2^53).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("integer {value} has no exact number representation")]
pub struct InexactNumber {
    value: i128,
}

impl InexactNumber {
    /// The rejected integer.
    #[must_use]
    pub fn value(&self) -> i128 {
        self.value
    }
}

/// Wide integers convert only when the `f64` round-trips exactly, so two
/// distinct readings never collapse into one number.
macro_rules! impl_try_from_wide_int {
    ($($ty:ty),*) => {
        $(
            impl TryFrom<$ty> for Value {
                type Error = InexactNumber;

                fn try_from(n: $ty) -> Result<Self, Self::Error> {
                    let wide = n as i128;
                    let number = n as f64;
                    if number as i128 == wide {
                        Ok(Self::Number(number))
                    } else {
                        Err(InexactNumber { value: wide })
                    }
                }
            }
        )*
    };
}

impl_try_from_wide_int!(i64, u64, isize, usize);

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(Rc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(Rc::from(s))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(Shared::new(items))
    }
}

impl From<Members> for Value {
    fn from(members: Members) -> Self {
        Self::Map(Shared::new(members))
    }
}

impl FromIterator<Value> for Value {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        Self::list(iter)
    }
}

/// JSON numbers follow the JSON number model: integers beyond 2^53 round to
/// the nearest `f64`.
#[cfg(feature = "json")]
impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => items.into_iter().map(Self::from).collect(),
            serde_json::Value::Object(members) => {
                Self::map(members.into_iter().map(|(k, v)| (k, Self::from(v))))
            }
        }
    }
}
