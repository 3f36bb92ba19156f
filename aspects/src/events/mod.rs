//! In-process publish/subscribe functionality.
//!
//! The [`EventBus`] is the universal notification substrate of the library:
//! subscribers register a dotted [`Pattern`] (optionally with a filter
//! predicate and a priority) and receive every matching [`Event`]
//! synchronously, in descending priority order. Cross-cutting concerns hook
//! in through a middleware chain, and handler failures are isolated from
//! publishers via an error-handler callback.
//!
//! Three companions build on the bus:
//!
//! - [`AsyncEventBus`] drives async handlers with the same matching and
//!   ordering semantics.
//! - [`EventStore`] records observed events into a bounded log with query
//!   and replay support.
//! - [`EventAggregator`] buffers matching events and delivers them in
//!   batches by count threshold or age.
//!
//! ```
//! use aspects::events::{Event, EventBus};
//! use serde_json::json;
//!
//! let bus = EventBus::new();
//! let seen = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
//! let seen_by_handler = seen.clone();
//!
//! bus.subscribe("user.*", move |_event| {
//!     seen_by_handler.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
//!     Ok(())
//! })
//! .unwrap();
//!
//! bus.publish(&Event::new("user.created", json!({"id": 42})));
//! assert_eq!(seen.load(std::sync::atomic::Ordering::SeqCst), 1);
//! ```

mod aggregator;
mod async_bus;
mod bus;
mod pattern;
mod store;

pub use aggregator::EventAggregator;
pub use async_bus::AsyncEventBus;
pub use bus::{EventBus, SubscriptionId};
pub use pattern::Pattern;
pub use store::{EventStore, DEFAULT_STORE_CAPACITY};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Errors produced by the event subsystem.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// A subscription or query pattern is malformed.
    ///
    /// Valid patterns are the empty string, `*`, or dot-separated segments
    /// where every segment is non-empty and `*` only appears as a whole
    /// segment.
    #[error("invalid event pattern `{0}`")]
    InvalidPattern(String),

    /// An event failed to deserialize.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// An immutable value describing something that happened.
///
/// Events are assigned a unique id at creation and compare equal on all
/// fields, which makes the JSON round-trip contract testable:
/// `Event::from_json(e.to_json()) == e`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique id, assigned at creation and never changed.
    pub id: Uuid,

    /// Dotted event type, e.g. `user.created`.
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Structured payload.
    pub data: serde_json::Value,

    /// Creation time. Serialized as Unix milliseconds; [`Event::new`]
    /// truncates to whole milliseconds so serialization round-trips exactly.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Free-form string metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Event {
    /// Creates an event of the given type with a structured payload.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        let now_ms = Utc::now().timestamp_millis();

        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            data,
            timestamp: DateTime::from_timestamp_millis(now_ms)
                .expect("current time is representable"),
            metadata: BTreeMap::new(),
        }
    }

    /// Adds a metadata entry, replacing any previous value for the key.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Serializes the event to its JSON shape.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("event serialization is infallible")
    }

    /// Deserializes an event from its JSON shape.
    pub fn from_json(value: serde_json::Value) -> Result<Self, EventError> {
        Ok(serde_json::from_value(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_round_trip_preserves_all_fields() {
        let event = Event::new("user.created", json!({"id": 42, "name": "ada"}))
            .with_metadata("source", "tests");

        let restored = Event::from_json(event.to_json()).unwrap();

        assert_eq!(restored, event);
    }

    #[test]
    fn json_shape_uses_declared_field_names() {
        let event = Event::new("user.created", json!(null));
        let json = event.to_json();

        assert!(json.get("eventType").is_some());
        assert!(json.get("timestamp").unwrap().is_i64());
        assert!(json.get("metadata").is_some());
    }

    #[test]
    fn ids_are_unique() {
        let a = Event::new("t", json!(null));
        let b = Event::new("t", json!(null));

        assert_ne!(a.id, b.id);
    }
}
