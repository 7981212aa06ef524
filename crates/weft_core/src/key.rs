//! Identity keys for declared children, listeners, and actions.
//!
//! Every declaration made during an evaluation is identified by a [`Key`].
//! Declarations that do not name a key get the source location of the
//! declaring call through `#[track_caller]`, so a child declared on the same
//! line keeps its identity across evaluations.
//!
//! When the same key is declared more than once in a single evaluation (a
//! loop without explicit keys, for example), the occurrences are told apart
//! by a collision index: the first occurrence resolves to index 0, the next
//! to 1, and so on. The pair is a [`Resolved`] key.
//!
//! ```ignore
//! for item in &items {
//!     // same call site every iteration: (site, 0), (site, 1), ...
//!     ctx.child(Row, item.clone());
//!     // explicit key: identity follows the item
//!     ctx.keyed_child(item.id, Row, item.clone());
//! }
//! ```

use crate::component::ComponentKind;
use rustc_hash::{FxHashMap, FxHasher};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Source location of a declaring call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct CallSite {
    file: &'static str,
    line: u32,
    column: u32,
}

impl CallSite {
    /// Capture the location of the caller
    #[track_caller]
    pub fn caller() -> Self {
        let loc = Location::caller();
        Self {
            file: loc.file(),
            line: loc.line(),
            column: loc.column(),
        }
    }

    /// Get the source location info for debugging.
    pub fn location(&self) -> (&'static str, u32, u32) {
        (self.file, self.line, self.column)
    }
}

impl fmt::Display for CallSite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// An equatable identity value
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Key {
    /// No explicit identity
    #[default]
    Unit,
    /// A string identity
    Str(Cow<'static, str>),
    /// An integer identity
    Int(i64),
    /// Hash of an arbitrary hashable value
    Hashed(u64),
    /// Call site of the declaration
    Location(CallSite),
    /// Two keys combined, e.g. declaration site plus action key
    Pair(Arc<(Key, Key)>),
}

impl Key {
    /// Key derived from the hash of `value`
    pub fn hashed<T: Hash + ?Sized>(value: &T) -> Self {
        let mut hasher = FxHasher::default();
        value.hash(&mut hasher);
        Key::Hashed(hasher.finish())
    }

    /// Key of the calling source location
    #[track_caller]
    pub fn location() -> Self {
        Key::Location(CallSite::caller())
    }

    /// Combine two keys. Joining with [`Key::Unit`] is the identity.
    pub fn pair(self, other: Key) -> Self {
        match (self, other) {
            (Key::Unit, other) => other,
            (this, Key::Unit) => this,
            (this, other) => Key::Pair(Arc::new((this, other))),
        }
    }

    pub fn is_unit(&self) -> bool {
        matches!(self, Key::Unit)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Unit => f.write_str("()"),
            Key::Str(s) => f.write_str(s),
            Key::Int(n) => write!(f, "{n}"),
            Key::Hashed(h) => write!(f, "#{h:016x}"),
            Key::Location(site) => write!(f, "@{site}"),
            Key::Pair(pair) => write!(f, "{}/{}", pair.0, pair.1),
        }
    }
}

impl From<&'static str> for Key {
    fn from(value: &'static str) -> Self {
        Key::Str(Cow::Borrowed(value))
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::Str(Cow::Owned(value))
    }
}

impl From<CallSite> for Key {
    fn from(value: CallSite) -> Self {
        Key::Location(value)
    }
}

impl From<()> for Key {
    fn from(_: ()) -> Self {
        Key::Unit
    }
}

macro_rules! int_keys {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    Key::Int(value as i64)
                }
            }
        )*
    };
}

int_keys!(i8, i16, i32, i64, u8, u16, u32);

macro_rules! wide_keys {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Key {
                fn from(value: $ty) -> Self {
                    match i64::try_from(value) {
                        Ok(n) => Key::Int(n),
                        Err(_) => Key::hashed(&(value as u64)),
                    }
                }
            }
        )*
    };
}

wide_keys!(u64, usize);

/// A key together with its collision index within one evaluation
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Resolved<K> {
    pub key: K,
    pub index: u32,
}

impl<K> Resolved<K> {
    pub fn new(key: K, index: u32) -> Self {
        Self { key, index }
    }
}

impl<K: fmt::Display> fmt::Display for Resolved<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.index == 0 {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{}#{}", self.key, self.index)
        }
    }
}

/// Identity of a child: its kind plus the key it was declared with
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ChildKey {
    pub kind: ComponentKind,
    pub key: Key,
}

impl fmt::Display for ChildKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.key)
    }
}

/// Resolved identity of a child within its parent
pub type ChildId = Resolved<ChildKey>;

/// Collision counting for the declarations of one evaluation
#[derive(Debug)]
pub(crate) struct KeyRound<K> {
    counts: FxHashMap<K, u32>,
    order: Vec<Resolved<K>>,
}

impl<K> Default for KeyRound<K> {
    fn default() -> Self {
        Self {
            counts: FxHashMap::default(),
            order: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash> KeyRound<K> {
    /// Forget the previous evaluation's declarations
    pub fn begin(&mut self) {
        self.counts.clear();
        self.order.clear();
    }

    /// Resolve the next occurrence of `key`
    pub fn resolve(&mut self, key: K) -> Resolved<K> {
        let count = self.counts.entry(key.clone()).or_insert(0);
        let resolved = Resolved::new(key, *count);
        *count += 1;
        self.order.push(resolved.clone());
        resolved
    }

    /// Whether `resolved` was declared in the current round
    pub fn contains(&self, resolved: &Resolved<K>) -> bool {
        self.counts
            .get(&resolved.key)
            .is_some_and(|count| resolved.index < *count)
    }

    /// Declarations in the order they were made
    pub fn declared(&self) -> &[Resolved<K>] {
        &self.order
    }
}
