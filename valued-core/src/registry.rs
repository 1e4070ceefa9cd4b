//! Process-wide converters for foreign types
//!
//! Types from other crates cannot implement [`Normalize`] here, so the
//! registry maps them to a conversion function instead. Values reach the
//! registry wrapped in an [`Object`]:
//!
//! ```rust
//! use valued_core::{normalize, register, Object, Value};
//!
//! struct Account { id: u32 }
//!
//! register(|account: &Account| vec![("id", account.id)].into_iter().collect::<std::collections::BTreeMap<_, _>>());
//!
//! let value = normalize(&Object::new(Account { id: 7 }));
//! assert_eq!(value.get_path("id"), Some(&Value::Integer(7)));
//! ```
//!
//! Converters are resolved in two passes: exact-type converters first, then
//! predicate converters in registration order. Anything unmatched becomes an
//! opaque leaf.
//!
//! Registration is meant to happen during startup. Reads are lock-free; a
//! registration racing with a first use of the same type may or may not be
//! seen by that use.

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;

use crate::normalize::Normalize;
use crate::value::{Opaque, Value};

type ConvertFn = dyn Fn(&(dyn Any + Send + Sync)) -> Option<Value> + Send + Sync;

#[derive(Clone)]
struct Converter {
    /// `None` for predicate converters
    type_id: Option<TypeId>,
    name: &'static str,
    convert: Arc<ConvertFn>,
}

fn converters() -> &'static ArcSwap<Vec<Converter>> {
    static REGISTRY: OnceLock<ArcSwap<Vec<Converter>>> = OnceLock::new();
    REGISTRY.get_or_init(|| ArcSwap::from_pointee(Vec::new()))
}

fn install(converter: Converter) {
    converters().rcu(|current| {
        let mut next = (**current).clone();
        let existing = converter
            .type_id
            .and_then(|id| next.iter().position(|c| c.type_id == Some(id)));
        match existing {
            Some(idx) => next[idx] = converter.clone(),
            None => next.push(converter.clone()),
        }
        next
    });
}

/// Registers the conversion for values of type `T`.
///
/// The converter's output is normalized again, so it may return any
/// [`Normalize`] value, including maps with dotted keys. Registering the same
/// type twice replaces the earlier converter.
pub fn register<T, R, F>(convert: F)
where
    T: Any + Send + Sync,
    R: Normalize,
    F: Fn(&T) -> R + Send + Sync + 'static,
{
    let name = type_name::<T>();
    install(Converter {
        type_id: Some(TypeId::of::<T>()),
        name,
        convert: Arc::new(move |any: &(dyn Any + Send + Sync)| {
            any.downcast_ref::<T>().map(|v| convert(v).normalize())
        }),
    });
    tracing::debug!(type_name = name, "Registered converter");
}

/// Registers a converter that decides per value whether it applies.
///
/// `convert` returns `None` to pass. Useful for families of types that share
/// a conversion.
pub fn register_with<R, F>(name: &'static str, convert: F)
where
    R: Normalize,
    F: Fn(&(dyn Any + Send + Sync)) -> Option<R> + Send + Sync + 'static,
{
    install(Converter {
        type_id: None,
        name,
        convert: Arc::new(move |any: &(dyn Any + Send + Sync)| {
            convert(any).map(|v| v.normalize())
        }),
    });
    tracing::debug!(name, "Registered predicate converter");
}

/// Returns true if an exact-type converter exists for `T`
pub fn is_registered<T: Any>() -> bool {
    let id = TypeId::of::<T>();
    converters().load().iter().any(|c| c.type_id == Some(id))
}

fn convert(value: &(dyn Any + Send + Sync)) -> Option<Value> {
    let registry = converters().load();
    let id = value.type_id();

    if let Some(converter) = registry.iter().find(|c| c.type_id == Some(id)) {
        tracing::trace!(converter = converter.name, "Converting registered type");
        return (converter.convert)(value);
    }

    registry
        .iter()
        .filter(|c| c.type_id.is_none())
        .find_map(|c| (c.convert)(value))
}

// ============================================
// Object
// ============================================

/// An arbitrary value to be normalized through the registry.
#[derive(Clone)]
pub struct Object {
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Object {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_name: type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl std::fmt::Debug for Object {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Object({})", self.type_name)
    }
}

impl Normalize for Object {
    fn normalize(&self) -> Value {
        convert(&*self.inner)
            .unwrap_or_else(|| Value::Opaque(Opaque::new(self.type_name, Arc::clone(&self.inner))))
    }
}
