//! Incrementally built event context
//!
//! A [`Scope`] holds data that should accompany every event sent through
//! it, typically the current user and customer. It is an explicit value:
//! each thread or task owns its own scope (see [`Scope::fork`]), and nested
//! regions opened with [`Context::with`] restore the previous state when
//! they end, panics included.
//!
//! ```no_run
//! use serde_json::json;
//! use valued_core::{Client, Context, Scope};
//!
//! let client = Client::new("vt_live_xxxxxxxxxxxx")?;
//! let mut scope = Scope::new(client);
//! scope.set_user_id(&123);
//!
//! scope.with(&json!({"customer.id": 12}), |scope| {
//!     scope.pageview("https://big.company.com/reports/12", &())?;
//!     scope.action("report.generated", &())
//! })?;
//!
//! // back to the user only
//! scope.action("profile.updated", &())?;
//! # Ok::<(), valued_core::Error>(())
//! ```

use crate::client::Client;
use crate::error::Result;
use crate::normalize::{normalize, normalize_map, Normalize};
use crate::value::{KeyPath, Map, Value};

/// Read, merge and restore access to scoped event data.
///
/// Implementors supply storage; everything else is provided.
pub trait Context {
    fn client(&self) -> &Client;

    /// Current data
    fn to_map(&self) -> Map;

    /// Replaces the current data wholesale
    fn replace(&mut self, state: Map);

    /// Returns to the defaults the context was created with
    fn reset(&mut self);

    /// Current data deep-merged with `data`, without changing the context
    fn merge<T: Normalize + ?Sized>(&self, data: &T) -> Map {
        self.to_map().merge(&normalize_map(data))
    }

    /// Merges `data` into the current data until the next reset and
    /// returns the new state.
    fn apply<T: Normalize + ?Sized>(&mut self, data: &T) -> Map {
        let merged = self.merge(data);
        self.replace(merged.clone());
        merged
    }

    /// Runs `body` with `data` applied, then restores the previous state.
    ///
    /// Changes made inside `body`, including calls to [`Context::apply`],
    /// do not outlive it. The state is restored even if `body` panics.
    fn with<T, F, R>(&mut self, data: &T, body: F) -> R
    where
        Self: Sized,
        T: Normalize + ?Sized,
        F: FnOnce(&mut Self) -> R,
    {
        let saved = self.to_map();
        let mut guard = Restore {
            context: self,
            saved: Some(saved),
        };
        guard.context.apply(data);
        body(&mut *guard.context)
    }

    fn get<P: KeyPath + ?Sized>(&self, path: &P) -> Option<Value> {
        self.to_map().get_path(path).cloned()
    }

    /// Stores `value` under `path`, merging with what is already there
    fn set<P, T>(&mut self, path: &P, value: &T)
    where
        P: KeyPath + ?Sized,
        T: Normalize + ?Sized,
    {
        self.apply(&Map::from_path(path, normalize(value)));
    }

    fn user(&self) -> Option<Map> {
        self.get("user").and_then(|v| v.as_map().cloned())
    }

    fn user_id(&self) -> Option<Value> {
        self.get("user.id").filter(Value::is_present)
    }

    fn customer(&self) -> Option<Map> {
        self.get("customer").and_then(|v| v.as_map().cloned())
    }

    fn customer_id(&self) -> Option<Value> {
        self.get("customer.id").filter(Value::is_present)
    }

    fn set_user<T: Normalize + ?Sized>(&mut self, user: &T) {
        self.set("user", user);
    }

    fn set_user_id<T: Normalize + ?Sized>(&mut self, id: &T) {
        self.set("user.id", id);
    }

    fn set_customer<T: Normalize + ?Sized>(&mut self, customer: &T) {
        self.set("customer", customer);
    }

    fn set_customer_id<T: Normalize + ?Sized>(&mut self, id: &T) {
        self.set("customer.id", id);
    }

    /// See [`Client::action`]
    fn action<T: Normalize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        self.client().action(key, &self.merge(data))
    }

    /// See [`Client::pageview`]
    fn pageview<T: Normalize + ?Sized>(&self, url: &str, data: &T) -> Result<()> {
        self.client().pageview(url, &self.merge(data))
    }

    /// See [`Client::sync`]
    fn sync<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        self.client().sync(&self.merge(data))
    }

    /// Syncs the scope's user merged with `data`
    fn sync_user<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        let user = self.user().unwrap_or_default();
        self.client().sync_user(&user.merge(&normalize_map(data)))
    }

    /// Syncs the scope's customer merged with `data`
    fn sync_customer<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        let customer = self.customer().unwrap_or_default();
        self.client().sync_customer(&customer.merge(&normalize_map(data)))
    }

    /// Syncs whatever the scope knows about its user and customer.
    ///
    /// Each one is sent only if it has an id and at least one other
    /// attribute.
    fn sync_scope(&self) -> Result<()> {
        let worth_syncing = |id: Option<Value>, data: Option<Map>| {
            id.is_some() && data.map_or(0, |d| d.len()) > 1
        };

        if worth_syncing(self.user_id(), self.user()) {
            self.sync_user(&())?;
        }
        if worth_syncing(self.customer_id(), self.customer()) {
            self.sync_customer(&())?;
        }
        Ok(())
    }
}

struct Restore<'a, C: Context> {
    context: &'a mut C,
    saved: Option<Map>,
}

impl<C: Context> Drop for Restore<'_, C> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.context.replace(saved);
        }
    }
}

/// Scoped event data bound to a [`Client`]
#[derive(Debug)]
pub struct Scope {
    client: Client,
    defaults: Map,
    state: Map,
}

impl Scope {
    pub fn new(client: Client) -> Self {
        Self::with_defaults(client, &())
    }

    /// Scope starting from, and resetting to, `defaults`
    pub fn with_defaults<T: Normalize + ?Sized>(client: Client, defaults: &T) -> Self {
        let defaults = normalize_map(defaults);
        Self {
            client,
            state: defaults.clone(),
            defaults,
        }
    }

    pub fn defaults(&self) -> &Map {
        &self.defaults
    }

    /// Independent scope with the current state and the same defaults,
    /// for handing to another thread or task.
    pub fn fork(&self) -> Self {
        Self {
            client: self.client.clone(),
            defaults: self.defaults.clone(),
            state: self.state.clone(),
        }
    }
}

impl Context for Scope {
    fn client(&self) -> &Client {
        &self.client
    }

    fn to_map(&self) -> Map {
        self.state.clone()
    }

    fn replace(&mut self, state: Map) {
        self.state = state;
    }

    fn reset(&mut self) {
        self.state = self.defaults.clone();
    }
}

impl Normalize for Scope {
    fn normalize(&self) -> Value {
        Value::Map(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Strategy;
    use crate::event::Event;
    use crate::validate::Category;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::Arc;

    fn capturing() -> (Client, Arc<Mutex<Vec<Event>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let client = Client::builder()
            .callback(move |event: &Event| sink.lock().push(event.clone()))
            .strategy(Strategy::Synchronous)
            .build()
            .unwrap();
        (client, events)
    }

    fn scope_with(data: serde_json::Value) -> Scope {
        Scope::with_defaults(capturing().0, &data)
    }

    #[test]
    fn test_with_restores_state() {
        let mut scope = scope_with(json!({"a": 1}));
        scope.with(&json!({"b": 2}), |scope| {
            assert_eq!(scope.to_map(), normalize_map(&json!({"a": 1, "b": 2})));
            scope.apply(&json!({"c": 3}));
            scope.set_user_id(&5);
        });
        assert_eq!(scope.to_map(), normalize_map(&json!({"a": 1})));
    }

    #[test]
    fn test_with_restores_after_panic() {
        let mut scope = scope_with(json!({"a": 1}));
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            scope.with(&json!({"b": 2}), |_| panic!("inside region"));
        }));
        assert!(result.is_err());
        assert_eq!(scope.to_map(), normalize_map(&json!({"a": 1})));
    }

    #[test]
    fn test_nested_regions() {
        let mut scope = scope_with(json!({}));
        scope.with(&json!({"user.id": 1}), |scope| {
            scope.with(&json!({"customer.id": 2}), |scope| {
                assert!(scope.user_id().is_some());
                assert!(scope.customer_id().is_some());
            });
            assert!(scope.customer_id().is_none());
        });
        assert!(scope.user_id().is_none());
    }

    #[test]
    fn test_with_returns_body_result() {
        let mut scope = scope_with(json!({}));
        let id = scope.with(&json!({"user.id": 9}), |scope| scope.user_id());
        assert_eq!(id, Some(Value::Integer(9)));
    }

    #[test]
    fn test_apply_and_reset() {
        let mut scope = scope_with(json!({"a": 1}));
        let state = scope.apply(&json!({"b": 2}));
        assert_eq!(state, normalize_map(&json!({"a": 1, "b": 2})));
        assert_eq!(scope.to_map(), state);
        assert_eq!(scope.get("b"), Some(Value::Integer(2)));
        scope.reset();
        assert_eq!(scope.to_map(), normalize_map(&json!({"a": 1})));
        assert_eq!(scope.defaults(), &normalize_map(&json!({"a": 1})));
    }

    #[test]
    fn test_set_forms_are_equivalent() {
        let mut by_string = scope_with(json!({}));
        by_string.set("user.id", &1);

        let mut by_segments = scope_with(json!({}));
        by_segments.set(&["user", "id"], &1);

        let mut by_map = scope_with(json!({}));
        by_map.set("user", &json!({"id": 1}));

        assert_eq!(by_string.to_map(), by_segments.to_map());
        assert_eq!(by_string.to_map(), by_map.to_map());
    }

    #[test]
    fn test_user_and_customer_accessors() {
        let mut scope = scope_with(json!({}));
        assert!(scope.user().is_none());
        scope.set_user(&json!({"id": 1, "name": "Ada"}));
        scope.set_user_id(&2);
        scope.set_customer_id(&"acme");
        scope.set_customer(&json!({"plan": "pro"}));

        let user = scope.user().unwrap();
        assert_eq!(user.get("id"), Some(&Value::Integer(2)));
        assert_eq!(user.get("name").and_then(Value::as_str), Some("Ada"));
        assert_eq!(scope.customer_id().as_ref().and_then(Value::as_str), Some("acme"));
        assert_eq!(scope.customer().unwrap().len(), 2);
    }

    #[test]
    fn test_helpers_merge_scope() {
        let (client, events) = capturing();
        let mut scope = Scope::new(client);
        scope.set_user_id(&42);

        scope.action("product.view", &json!({"product.id": 7})).unwrap();
        scope.pageview("https://example.com", &()).unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].get("user.id"), Some(&Value::Integer(42)));
        assert_eq!(events[0].get("product.id"), Some(&Value::Integer(7)));
        assert_eq!(events[1].category(), Category::Pageview);
    }

    #[test]
    fn test_scope_as_data() {
        let (client, events) = capturing();
        let mut scope = Scope::new(client.clone());
        scope.set_customer_id(&3);
        client.action("export", &scope).unwrap();
        assert_eq!(events.lock()[0].get("customer.id"), Some(&Value::Integer(3)));
    }

    #[test]
    fn test_sync_scope() {
        let (client, events) = capturing();
        let mut scope = Scope::new(client);

        // ids alone are not worth syncing
        scope.set_user_id(&1);
        scope.set_customer_id(&2);
        scope.sync_scope().unwrap();
        assert!(events.lock().is_empty());

        scope.set_user(&json!({"email": "ada@example.com"}));
        scope.set_customer(&json!({"name": "Acme"}));
        scope.sync_scope().unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0].get("user.email").and_then(Value::as_str),
            Some("ada@example.com")
        );
        assert!(events[0].get("customer").is_none());
        assert_eq!(events[1].get("customer.name").and_then(Value::as_str), Some("Acme"));
        assert!(events[1].get("user").is_none());
    }

    #[test]
    fn test_sync_user_merges_data() {
        let (client, events) = capturing();
        let mut scope = Scope::new(client);
        scope.set_user_id(&1);
        scope.sync_user(&json!({"plan": "free"})).unwrap();

        let event = &events.lock()[0];
        assert_eq!(event.get("user.id"), Some(&Value::Integer(1)));
        assert_eq!(event.get("user.plan").and_then(Value::as_str), Some("free"));
    }

    #[test]
    fn test_fork_is_independent() {
        let mut scope = scope_with(json!({"a": 1}));
        scope.apply(&json!({"b": 2}));

        let mut forked = scope.fork();
        let handle = std::thread::spawn(move || {
            forked.apply(&json!({"c": 3}));
            forked.reset();
            forked.to_map()
        });
        assert_eq!(handle.join().unwrap(), normalize_map(&json!({"a": 1})));
        assert_eq!(scope.to_map(), normalize_map(&json!({"a": 1, "b": 2})));
    }
}
