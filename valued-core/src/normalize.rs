//! Normalization of arbitrary input into canonical [`Value`]s
//!
//! [`Normalize`] is the single conversion capability: anything that can be
//! sent to Valued implements it. The crate covers the standard building
//! blocks (strings, integers, booleans, collections, string-keyed maps,
//! `serde_json::Value`, chrono timestamps); application types either
//! implement the trait themselves or, when the orphan rule forbids that,
//! register a converter and wrap the value in [`Object`](crate::Object).
//!
//! Normalization is total: it never fails.
//!
//! ## Rules
//!
//! - strings, booleans, integers: identity
//! - maps: every key is split on `.` and the value is stored along that path,
//!   merging with siblings (`{"user.id": 1}` == `{"user": {"id": 1}}`)
//! - sequences and sets: element-wise, order preserved for sequences
//! - timestamps: ISO-8601 with seconds precision
//! - integers up to 128 bits: exact; a `u128` beyond `i128::MAX` becomes an
//!   opaque leaf
//! - floats: passed through

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::BuildHasher;
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone};

use crate::value::{Map, MapBuilder, Opaque, Value};

/// Conversion into a canonical [`Value`].
pub trait Normalize {
    fn normalize(&self) -> Value;
}

/// Normalizes any supported input.
pub fn normalize<T: Normalize + ?Sized>(data: &T) -> Value {
    data.normalize()
}

/// Normalizes input that is expected to be a mapping.
///
/// Anything that does not normalize to a map yields an empty map.
pub fn normalize_map<T: Normalize + ?Sized>(data: &T) -> Map {
    match data.normalize() {
        Value::Map(map) => map,
        Value::Null => Map::new(),
        other => {
            tracing::warn!(value = %other, "Ignoring non-map event data");
            Map::new()
        }
    }
}

fn normalize_entries<'a, K, V, I>(entries: I) -> Value
where
    K: AsRef<str> + 'a,
    V: Normalize + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let mut builder = MapBuilder::new();
    for (key, value) in entries {
        builder.insert_key(key.as_ref(), value.normalize());
    }
    Value::Map(builder.freeze())
}

fn normalize_items<'a, T, I>(items: I) -> Value
where
    T: Normalize + 'a,
    I: IntoIterator<Item = &'a T>,
{
    Value::List(items.into_iter().map(Normalize::normalize).collect())
}

// ============================================
// Scalars
// ============================================

impl Normalize for str {
    fn normalize(&self) -> Value {
        Value::String(Arc::from(self))
    }
}

impl Normalize for String {
    fn normalize(&self) -> Value {
        self.as_str().normalize()
    }
}

impl Normalize for Cow<'_, str> {
    fn normalize(&self) -> Value {
        self.as_ref().normalize()
    }
}

impl Normalize for char {
    fn normalize(&self) -> Value {
        Value::from(self.to_string())
    }
}

impl Normalize for bool {
    fn normalize(&self) -> Value {
        Value::Bool(*self)
    }
}

macro_rules! normalize_lossless_int {
    ($($ty:ty),*) => {
        $(
            impl Normalize for $ty {
                fn normalize(&self) -> Value {
                    Value::Integer(i128::from(*self))
                }
            }
        )*
    };
}

macro_rules! normalize_wide_int {
    ($($ty:ty),*) => {
        $(
            impl Normalize for $ty {
                fn normalize(&self) -> Value {
                    match i128::try_from(*self) {
                        Ok(i) => Value::Integer(i),
                        Err(_) => Value::Opaque(Opaque::new(
                            std::any::type_name::<$ty>(),
                            Arc::new(*self),
                        )),
                    }
                }
            }
        )*
    };
}

normalize_lossless_int!(i8, i16, i32, i64, i128, u8, u16, u32, u64);
normalize_wide_int!(isize, usize, u128);

impl Normalize for f32 {
    fn normalize(&self) -> Value {
        Value::Float(f64::from(*self))
    }
}

impl Normalize for f64 {
    fn normalize(&self) -> Value {
        Value::Float(*self)
    }
}

/// The empty payload
impl Normalize for () {
    fn normalize(&self) -> Value {
        Value::Map(Map::new())
    }
}

// ============================================
// Wrappers
// ============================================

impl<T: Normalize> Normalize for Option<T> {
    fn normalize(&self) -> Value {
        match self {
            Some(value) => value.normalize(),
            None => Value::Null,
        }
    }
}

impl<T: Normalize + ?Sized> Normalize for &T {
    fn normalize(&self) -> Value {
        (**self).normalize()
    }
}

impl<T: Normalize + ?Sized> Normalize for Box<T> {
    fn normalize(&self) -> Value {
        (**self).normalize()
    }
}

impl<T: Normalize + ?Sized> Normalize for Arc<T> {
    fn normalize(&self) -> Value {
        (**self).normalize()
    }
}

impl<T: Normalize + ?Sized> Normalize for Rc<T> {
    fn normalize(&self) -> Value {
        (**self).normalize()
    }
}

// ============================================
// Already canonical
// ============================================

impl Normalize for Value {
    fn normalize(&self) -> Value {
        self.clone()
    }
}

impl Normalize for Map {
    fn normalize(&self) -> Value {
        Value::Map(self.clone())
    }
}

// ============================================
// Collections
// ============================================

impl<T: Normalize> Normalize for [T] {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

impl<T: Normalize, const N: usize> Normalize for [T; N] {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

impl<T: Normalize> Normalize for Vec<T> {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

impl<T: Normalize> Normalize for VecDeque<T> {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

impl<T: Normalize> Normalize for BTreeSet<T> {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

/// Element order follows the set's iteration order.
impl<T: Normalize, S: BuildHasher> Normalize for HashSet<T, S> {
    fn normalize(&self) -> Value {
        normalize_items(self)
    }
}

impl<K: AsRef<str>, V: Normalize> Normalize for BTreeMap<K, V> {
    fn normalize(&self) -> Value {
        normalize_entries(self)
    }
}

/// Keys that collide after dotted-path expansion are merged in iteration
/// order, which is unspecified for `HashMap`.
impl<K: AsRef<str>, V: Normalize, S: BuildHasher> Normalize for HashMap<K, V, S> {
    fn normalize(&self) -> Value {
        normalize_entries(self)
    }
}

// ============================================
// JSON
// ============================================

impl Normalize for serde_json::Value {
    fn normalize(&self) -> Value {
        use serde_json::Value as Json;

        match self {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::from(i)
                } else if let Some(u) = n.as_u64() {
                    Value::from(u)
                } else {
                    Value::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => s.normalize(),
            Json::Array(items) => normalize_items(items),
            Json::Object(entries) => entries.normalize(),
        }
    }
}

impl Normalize for serde_json::Map<String, serde_json::Value> {
    fn normalize(&self) -> Value {
        normalize_entries(self)
    }
}

// ============================================
// Timestamps
// ============================================

impl<Tz: TimeZone> Normalize for DateTime<Tz>
where
    Tz::Offset: std::fmt::Display,
{
    fn normalize(&self) -> Value {
        Value::from(self.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Normalize for NaiveDateTime {
    fn normalize(&self) -> Value {
        Value::from(self.format("%Y-%m-%dT%H:%M:%S").to_string())
    }
}

impl Normalize for NaiveDate {
    fn normalize(&self) -> Value {
        Value::from(self.format("%Y-%m-%d").to_string())
    }
}
