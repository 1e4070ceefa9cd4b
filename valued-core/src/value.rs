//! Canonical event data
//!
//! Every payload that reaches the validator or the wire is a [`Value`]. Maps
//! are reference-counted and expose no mutable access: once a value has been
//! normalized it is frozen, and every "update" (scope changes, stamping an
//! event) produces a new value through [`Map::merge`] or [`Map::with`].
//!
//! ## Key paths
//!
//! Keys are addressed through [`KeyPath`]. A dotted string and a list of
//! segments are interchangeable, and every segment is itself split on `.`:
//!
//! ```text
//! "user.id"  ==  ["user", "id"]  ==  ["user.id"]
//! ```

use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};

// ============================================
// Value
// ============================================

/// A normalized, immutable piece of event data.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Explicit absence (e.g. `None`). Treated as "not present" by validation.
    Null,
    Bool(bool),
    /// Integer leaf. Every `i64` and `u64` fits exactly.
    Integer(i128),
    /// Non-integral number, passed through as-is.
    Float(f64),
    String(Arc<str>),
    List(Arc<[Value]>),
    Map(Map),
    /// Object with no known conversion, carried through untouched.
    Opaque(Opaque),
}

impl Value {
    /// Returns true for anything other than [`Value::Null`]
    pub fn is_present(&self) -> bool {
        !matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => i64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::Integer(i) => u64::try_from(*i).ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Looks up a nested value. Non-map values have no children.
    pub fn get_path<P: KeyPath + ?Sized>(&self, path: &P) -> Option<&Value> {
        self.as_map().and_then(|m| m.get_path(path))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            Value::Opaque(o) => f.write_str(o.type_name()),
            other => {
                let json = serde_json::to_string(other).map_err(|_| fmt::Error)?;
                f.write_str(&json)
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => {
                if let Ok(small) = i64::try_from(*i) {
                    serializer.serialize_i64(small)
                } else if let Ok(unsigned) = u64::try_from(*i) {
                    serializer.serialize_u64(unsigned)
                } else {
                    serializer.serialize_i128(*i)
                }
            }
            Value::Float(n) => serializer.serialize_f64(*n),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => serializer.collect_seq(items.iter()),
            Value::Map(map) => map.serialize(serializer),
            Value::Opaque(o) => serializer.serialize_str(o.type_name()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<u64> for Value {
    fn from(i: u64) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i128::from(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Map> for Value {
    fn from(m: Map) -> Self {
        Value::Map(m)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items.into())
    }
}

// ============================================
// Opaque
// ============================================

/// Leaf holding an arbitrary object that no converter recognized.
///
/// Serializes as the Rust type name of the wrapped object.
#[derive(Clone)]
pub struct Opaque {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    pub(crate) fn new(type_name: &'static str, inner: Arc<dyn Any + Send + Sync>) -> Self {
        Self { type_name, inner }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Opaque({})", self.type_name)
    }
}

// ============================================
// Map
// ============================================

/// Immutable string-keyed mapping of canonical values.
///
/// Cloning is cheap (reference-counted). Key order is not significant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Map(Arc<BTreeMap<String, Value>>);

impl Map {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the nested map `{p0: {p1: ... value}}` for a key path.
    ///
    /// An empty path yields an empty map.
    pub fn from_path<P: KeyPath + ?Sized>(path: &P, value: Value) -> Map {
        let segments = path.segments();
        let mut nested = value;
        for (idx, segment) in segments.iter().enumerate().rev() {
            let mut entries = BTreeMap::new();
            entries.insert(segment.clone(), nested);
            if idx == 0 {
                return Map(Arc::new(entries));
            }
            nested = Value::Map(Map(Arc::new(entries)));
        }
        Map::new()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Follows a key path through nested maps.
    pub fn get_path<P: KeyPath + ?Sized>(&self, path: &P) -> Option<&Value> {
        let segments = path.segments();
        let (last, parents) = segments.split_last()?;
        let mut current = self;
        for segment in parents {
            current = current.get(segment)?.as_map()?;
        }
        current.get(last)
    }

    /// True if the path resolves to a non-null value
    pub fn has_path<P: KeyPath + ?Sized>(&self, path: &P) -> bool {
        self.get_path(path).is_some_and(Value::is_present)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// Deep merge, right-biased.
    ///
    /// Colliding keys whose values are both maps are merged recursively;
    /// otherwise the value from `other` wins. Neither input is modified.
    pub fn merge(&self, other: &Map) -> Map {
        if other.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return other.clone();
        }

        let mut merged = (*self.0).clone();
        for (key, new_value) in other.iter() {
            let value = match (merged.get(key), new_value) {
                (Some(Value::Map(old)), Value::Map(new)) => Value::Map(old.merge(new)),
                _ => new_value.clone(),
            };
            merged.insert(key.clone(), value);
        }
        Map(Arc::new(merged))
    }

    /// Returns a copy with a single top-level key replaced.
    pub fn with(&self, key: impl Into<String>, value: Value) -> Map {
        let mut entries = (*self.0).clone();
        entries.insert(key.into(), value);
        Map(Arc::new(entries))
    }

    /// Returns a copy without the given top-level key.
    pub fn without(&self, key: &str) -> Map {
        if !self.contains_key(key) {
            return self.clone();
        }
        let mut entries = (*self.0).clone();
        entries.remove(key);
        Map(Arc::new(entries))
    }
}

impl Serialize for Map {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.len()))?;
        for (key, value) in self.iter() {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl fmt::Display for Map {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let json = serde_json::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&json)
    }
}

/// Deep merge of two canonical maps. See [`Map::merge`].
pub fn merge(a: &Map, b: &Map) -> Map {
    a.merge(b)
}

/// Accumulates entries while a map is being normalized, then freezes it.
#[derive(Debug, Default)]
pub(crate) struct MapBuilder {
    entries: BTreeMap<String, Value>,
}

impl MapBuilder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Inserts `value` under a (possibly dotted) key, merging with whatever
    /// already sits along the path.
    pub(crate) fn insert_key(&mut self, key: &str, value: Value) {
        let segments = key.segments();
        match segments.split_first() {
            None => self.insert(key.to_string(), value),
            Some((head, [])) => self.insert(head.clone(), value),
            Some((head, rest)) => {
                let nested = Map::from_path(rest, value);
                self.insert(head.clone(), Value::Map(nested));
            }
        }
    }

    fn insert(&mut self, key: String, value: Value) {
        let value = match (self.entries.get(&key), value) {
            (Some(Value::Map(old)), Value::Map(new)) => Value::Map(old.merge(&new)),
            (_, value) => value,
        };
        self.entries.insert(key, value);
    }

    pub(crate) fn freeze(self) -> Map {
        Map(Arc::new(self.entries))
    }
}

// ============================================
// Key paths
// ============================================

/// Anything that can address a nested key: `"user.id"`, `["user", "id"]`, ...
pub trait KeyPath {
    /// Path segments with every dotted component split apart.
    fn segments(&self) -> Vec<String>;
}

fn push_segments(key: &str, out: &mut Vec<String>) {
    out.extend(
        key.split('.')
            .filter(|segment| !segment.is_empty())
            .map(str::to_owned),
    );
}

impl KeyPath for str {
    fn segments(&self) -> Vec<String> {
        let mut out = Vec::new();
        push_segments(self, &mut out);
        out
    }
}

impl KeyPath for String {
    fn segments(&self) -> Vec<String> {
        self.as_str().segments()
    }
}

impl<S: AsRef<str>> KeyPath for [S] {
    fn segments(&self) -> Vec<String> {
        let mut out = Vec::new();
        for key in self {
            push_segments(key.as_ref(), &mut out);
        }
        out
    }
}

impl<S: AsRef<str>, const N: usize> KeyPath for [S; N] {
    fn segments(&self) -> Vec<String> {
        self.as_slice().segments()
    }
}

impl<S: AsRef<str>> KeyPath for Vec<S> {
    fn segments(&self) -> Vec<String> {
        self.as_slice().segments()
    }
}

impl<T: KeyPath + ?Sized> KeyPath for &T {
    fn segments(&self) -> Vec<String> {
        (**self).segments()
    }
}
