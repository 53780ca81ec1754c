//! Event types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// An event pushed by the runtime.
///
/// Wire form: `{"eventType": "...", "timestamp": <epoch ms>, "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeEvent {
    #[serde(rename = "eventType")]
    pub event_type: String,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub data: Value,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl RuntimeEvent {
    /// An event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self::at(event_type, Utc::now(), data)
    }

    pub fn at(event_type: impl Into<String>, timestamp: DateTime<Utc>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            data,
            metadata: Map::new(),
        }
    }
}

/// An event held in the disconnect buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub event: RuntimeEvent,
    /// Arrival order within the buffer.
    pub sequence: u64,
}
