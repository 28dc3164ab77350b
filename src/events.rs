//! Event types accepted by the pipeline and the enriched wire record that actually goes over the
//! network (or into the failure file).
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A raw application event as handed to the pipeline by the caller.
///
/// `TrackEvent` carries only what the caller knows: an event type and optional event/user
/// property maps. Identity, device, and environment metadata are attached by the pipeline at
/// submission time (see [`EnrichedEvent`]).
#[derive(Debug, Clone, Default)]
pub struct TrackEvent {
    /// Event type name. Must be non-empty.
    pub event_type: String,
    /// Properties describing this particular event occurrence.
    pub event_properties: HashMap<String, serde_json::Value>,
    /// Properties describing the user, updated server-side on ingestion.
    pub user_properties: HashMap<String, serde_json::Value>,
}

impl TrackEvent {
    /// Create an event with the given type and no properties.
    pub fn new(event_type: impl Into<String>) -> TrackEvent {
        TrackEvent {
            event_type: event_type.into(),
            ..TrackEvent::default()
        }
    }

    /// Set event properties.
    pub fn with_event_properties(
        mut self,
        properties: HashMap<String, serde_json::Value>,
    ) -> TrackEvent {
        self.event_properties = properties;
        self
    }

    /// Set user properties.
    pub fn with_user_properties(
        mut self,
        properties: HashMap<String, serde_json::Value>,
    ) -> TrackEvent {
        self.user_properties = properties;
        self
    }
}

/// The wire record for one event: a [`TrackEvent`] plus identity, device, timestamp, and
/// environment metadata.
///
/// Created once at enrichment time and never mutated afterwards. The same serialized form is used
/// for transmission and for the failure file, which is what makes replay byte-for-byte faithful.
///
/// Property maps always serialize as objects (`{}` when empty), never as omitted keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedEvent {
    pub user_id: String,
    pub device_id: String,
    pub event_type: String,
    /// Epoch milliseconds at enrichment time.
    pub time: i64,
    pub event_properties: HashMap<String, serde_json::Value>,
    pub user_properties: HashMap<String, serde_json::Value>,
    pub app_version: String,
    pub platform: String,
    pub os_name: String,
    pub os_version: String,
    pub country: String,
    pub language: String,
    /// Literal sentinel `"$remote"`; the ingestion server resolves the real address.
    pub ip: String,
}
