//! # valued-core
//!
//! Client library for the Valued event ingestion API.
//!
//! This library provides:
//! - Normalization of arbitrary data into canonical event maps
//! - Category validation (`action`, `pageview`, `sync`)
//! - Scoped, incrementally built event context
//! - Background delivery with per-environment dispatch strategies
//! - Configuration management and logging infrastructure
//!
//! ## Architecture
//!
//! An event flows through the crate in one direction:
//! - **Scope:** merges the caller's data over the scoped context
//! - **Client:** normalizes, validates and timestamps it on the calling thread
//! - **Dispatcher:** schedules delivery according to its strategy
//! - **Connection:** POSTs the JSON body from a dispatcher thread
//!
//! Validation errors are returned to the caller. Delivery errors are logged
//! and go no further.
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use valued_core::{Client, Config, Context, Dispatcher, Scope};
//!
//! let config = Config::load().expect("failed to load config");
//! let client = Client::builder()
//!     .token(config.client.token.clone().unwrap_or_default())
//!     .timeout(config.client.timeout())
//!     .dispatcher(Arc::new(Dispatcher::from_config(&config.dispatch)))
//!     .build()
//!     .expect("missing token");
//!
//! let mut scope = Scope::new(client);
//! scope.set_user(&json!({"id": 1, "email": "ada@example.com"}));
//! scope.action("user.signed_in", &()).expect("invalid event");
//! ```

// Re-export commonly used items at the crate root
pub use client::{Client, ClientBuilder};
pub use config::{Config, Environment};
pub use connection::{Connection, Transport, DEFAULT_ENDPOINT};
pub use dispatch::{Dispatcher, Strategy};
pub use error::{Error, Result, ValidationError};
pub use event::Event;
pub use normalize::{normalize, normalize_map, Normalize};
pub use registry::{register, register_with, Object};
pub use scope::{Context, Scope};
pub use validate::{validate, Category, Violation};
pub use value::{merge, KeyPath, Map, Value};

// Public modules
pub mod client;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod logging;
pub mod normalize;
pub mod registry;
pub mod scope;
pub mod validate;
pub mod value;
