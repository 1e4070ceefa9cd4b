//! Client orchestration
//!
//! A [`Client`] turns a raw call (category plus arbitrary data) into a
//! validated [`Event`] on the calling thread, then hands it to the
//! [`Dispatcher`] for delivery. Validation errors come back to the caller;
//! delivery failures never do.
//!
//! ```no_run
//! use serde_json::json;
//! use valued_core::Client;
//!
//! let client = Client::new("vt_live_xxxxxxxxxxxx")?;
//! client.action("user.created", &json!({"user": {"id": 1}}))?;
//! client.pageview("https://example.com/pricing", &json!({"user.id": 1}))?;
//! # Ok::<(), valued_core::Error>(())
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ClientConfig;
use crate::connection::{Connection, Transport, DEFAULT_ENDPOINT, DEFAULT_TIMEOUT};
use crate::dispatch::{Dispatcher, Strategy};
use crate::error::{Error, Result};
use crate::event::{Event, CATEGORY};
use crate::normalize::{normalize_map, Normalize};
use crate::validate::Category;
use crate::value::{Map, Value};

/// Key holding the action name
pub const KEY: &str = "key";

/// Path holding the page URL
pub const SOURCE_URL: &str = "attributes.source.url";

/// Sends events to the Valued ingestion API.
///
/// Cloning is cheap; clones share the transport and dispatcher.
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Client posting to the default endpoint
    pub fn new(token: &str) -> Result<Self> {
        Self::builder().token(token).build()
    }

    pub fn with_endpoint(token: &str, endpoint: &str) -> Result<Self> {
        Self::builder().token(token).endpoint(endpoint).build()
    }

    /// Client handing every event to `callback` instead of the network
    pub fn from_callback<F>(callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        Self {
            transport: Arc::new(callback),
            dispatcher: Dispatcher::shared(),
        }
    }

    /// Client from the `[client]` config section
    pub fn from_config(config: &ClientConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .ok_or_else(|| Error::Config("client.token is required".to_string()))?;

        let mut builder = Self::builder().token(token).timeout(config.timeout());
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint(endpoint);
        }
        builder.build()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Normalizes, validates and timestamps `data` as a `category` event.
    ///
    /// Nothing is sent. `category` replaces any category already in `data`.
    pub fn build_event<T: Normalize + ?Sized>(
        &self,
        category: Category,
        data: &T,
    ) -> Result<Event> {
        let data = normalize_map(data).with(CATEGORY, Value::from(category.as_str()));
        Ok(Event::new(data)?)
    }

    /// Validates and schedules delivery of a `category` event.
    pub fn track<T: Normalize + ?Sized>(&self, category: Category, data: &T) -> Result<()> {
        let event = self.build_event(category, data)?;
        tracing::trace!(category = %category, "Event accepted");
        self.dispatcher.dispatch(&self.transport, event);
        Ok(())
    }

    /// Tracks an action event named `key`.
    pub fn action<T: Normalize + ?Sized>(&self, key: &str, data: &T) -> Result<()> {
        let data = normalize_map(data).with(KEY, Value::from(key));
        self.track(Category::Action, &data)
    }

    /// Tracks a page view of `url`.
    ///
    /// An empty `url` leaves any URL already in `data` in place.
    pub fn pageview<T: Normalize + ?Sized>(&self, url: &str, data: &T) -> Result<()> {
        let mut data = normalize_map(data);
        if !url.is_empty() {
            data = data.merge(&Map::from_path(SOURCE_URL, Value::from(url)));
        }
        self.track(Category::Pageview, &data)
    }

    /// Sends a sync event.
    pub fn sync<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        self.track(Category::Sync, data)
    }

    /// Syncs the user attributes in `data`.
    pub fn sync_user<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        self.sync(&Map::from_path("user", Value::Map(normalize_map(data))))
    }

    /// Syncs the customer attributes in `data`.
    pub fn sync_customer<T: Normalize + ?Sized>(&self, data: &T) -> Result<()> {
        self.sync(&Map::from_path("customer", Value::Map(normalize_map(data))))
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("strategy", &self.dispatcher.strategy())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Client`]
#[derive(Default)]
pub struct ClientBuilder {
    token: Option<String>,
    endpoint: Option<String>,
    timeout: Option<Duration>,
    transport: Option<Arc<dyn Transport>>,
    dispatcher: Option<Arc<Dispatcher>>,
}

impl ClientBuilder {
    pub fn token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// HTTP request timeout (ignored with a custom transport)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Deliver through `callback`; takes precedence over a token.
    pub fn callback<F>(self, callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.transport(Arc::new(callback))
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use a dedicated dispatcher with `strategy`
    pub fn strategy(self, strategy: Strategy) -> Self {
        self.dispatcher(Arc::new(Dispatcher::new(strategy)))
    }

    /// Share an existing dispatcher
    pub fn dispatcher(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<Client> {
        let transport: Arc<dyn Transport> = match (self.transport, self.token) {
            (Some(transport), _) => transport,
            (None, Some(token)) => {
                let endpoint = self.endpoint.as_deref().unwrap_or(DEFAULT_ENDPOINT);
                let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
                Arc::new(Connection::with_timeout(&token, endpoint, timeout)?)
            }
            (None, None) => {
                return Err(Error::Config(
                    "a token or a transport callback is required".to_string(),
                ))
            }
        };

        Ok(Client {
            transport,
            dispatcher: self.dispatcher.unwrap_or_else(Dispatcher::shared),
        })
    }
}
