//! Category-specific validation of normalized event payloads
//!
//! | Category | Requirements |
//! |----------|--------------|
//! | `action` | `user.id` or `customer.id` |
//! | `pageview` | `user.id` and `attributes.source.url` |
//! | `sync` | `user.id` or `customer.id`, but not both `user` and `customer` |
//!
//! Validation reports violations; whether a violation is fatal is up to the
//! caller's handler. [`check`] is the strict form used by the client.

use std::fmt;
use std::ops::ControlFlow;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::{Map, Value};

/// Event kind, stored under the `category` key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Action,
    Pageview,
    Sync,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Action => "action",
            Category::Pageview => "pageview",
            Category::Sync => "sync",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(Category::Action),
            "pageview" => Ok(Category::Pageview),
            "sync" => Ok(Category::Sync),
            other => Err(format!("unknown category: {}", other)),
        }
    }
}

/// A single validation failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    MissingCategory,
    /// Category present but not one of the known kinds (rendered value)
    UnknownCategory(String),
    /// Neither `user.id` nor `customer.id`
    MissingIdentity,
    MissingUserId,
    MissingUrl,
    /// `sync` carrying both `user` and `customer`
    UserAndCustomer,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::MissingCategory => f.write_str("missing category"),
            Violation::UnknownCategory(category) => write!(f, "unknown category: {}", category),
            Violation::MissingIdentity => f.write_str("missing user.id or customer.id"),
            Violation::MissingUserId => f.write_str("missing user.id"),
            Violation::MissingUrl => f.write_str("missing attributes.source.url"),
            Violation::UserAndCustomer => f.write_str("cannot include both user and customer"),
        }
    }
}

/// Validates `event`, calling `on_error` once per violation.
///
/// Returning `ControlFlow::Break` from the handler stops validation early; the
/// break is passed back to the caller.
pub fn validate<F>(event: &Map, mut on_error: F) -> ControlFlow<()>
where
    F: FnMut(Violation) -> ControlFlow<()>,
{
    let category = match event.get("category") {
        None | Some(Value::Null) => return on_error(Violation::MissingCategory),
        Some(value) => value,
    };

    match category.as_str().map(Category::from_str) {
        Some(Ok(Category::Action)) => validate_action(event, &mut on_error),
        Some(Ok(Category::Pageview)) => validate_pageview(event, &mut on_error),
        Some(Ok(Category::Sync)) => validate_sync(event, &mut on_error),
        _ => on_error(Violation::UnknownCategory(category.to_string())),
    }
}

fn has_identity(event: &Map) -> bool {
    event.has_path("user.id") || event.has_path("customer.id")
}

fn validate_action<F>(event: &Map, on_error: &mut F) -> ControlFlow<()>
where
    F: FnMut(Violation) -> ControlFlow<()>,
{
    if !has_identity(event) {
        on_error(Violation::MissingIdentity)?;
    }
    ControlFlow::Continue(())
}

fn validate_pageview<F>(event: &Map, on_error: &mut F) -> ControlFlow<()>
where
    F: FnMut(Violation) -> ControlFlow<()>,
{
    if !event.has_path("user.id") {
        on_error(Violation::MissingUserId)?;
    }
    if !event.has_path("attributes.source.url") {
        on_error(Violation::MissingUrl)?;
    }
    ControlFlow::Continue(())
}

fn validate_sync<F>(event: &Map, on_error: &mut F) -> ControlFlow<()>
where
    F: FnMut(Violation) -> ControlFlow<()>,
{
    if !has_identity(event) {
        on_error(Violation::MissingIdentity)?;
    }
    if event.has_path("user") && event.has_path("customer") {
        on_error(Violation::UserAndCustomer)?;
    }
    ControlFlow::Continue(())
}

/// Collects every violation
pub fn violations(event: &Map) -> Vec<Violation> {
    let mut found = Vec::new();
    let _ = validate(event, |violation| {
        found.push(violation);
        ControlFlow::Continue(())
    });
    found
}

/// Returns false on the first violation
pub fn is_valid(event: &Map) -> bool {
    validate(event, |_| ControlFlow::Break(())).is_continue()
}

/// Strict validation: any violation is an error.
pub fn check(event: &Map) -> Result<(), ValidationError> {
    let found = violations(event);
    if found.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(found))
    }
}
