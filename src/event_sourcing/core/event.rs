use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;

use super::error::{EventStoreError, Result};

// ============================================================================
// Domain Event Trait
// ============================================================================

/// All events applied to an aggregate implement this trait.
///
/// Events are plain data structs. `Default` gives the blank instance that
/// `AggregateRoot::apply` fills in, and `EVENT_TYPE` is the stable identity
/// written next to the payload, so renaming the struct does not break
/// existing streams.
pub trait DomainEvent:
    Serialize + DeserializeOwned + Default + Clone + Debug + Send + Sync + 'static
{
    const EVENT_TYPE: &'static str;
}

/// Object-safe view of a materialized event, used for pending events and
/// replay.
pub trait AnyEvent: Debug + Send + Sync {
    fn event_type(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn to_record(&self) -> Result<EventRecord>;
}

impl<E: DomainEvent> AnyEvent for E {
    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn to_record(&self) -> Result<EventRecord> {
        let data = serde_json::to_value(self).map_err(|source| EventStoreError::Serialization {
            commit: format!("event {}", E::EVENT_TYPE),
            source,
        })?;
        Ok(EventRecord::new(E::EVENT_TYPE, data))
    }
}

// ============================================================================
// Event Record - codec-facing representation
// ============================================================================

/// An event as codecs see it: its stable type plus its fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: serde_json::Value,
}

impl EventRecord {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }

    /// Decodes the record into `E`, checking the type tag first.
    pub fn decode<E: DomainEvent>(&self) -> Result<E> {
        if self.event_type != E::EVENT_TYPE {
            return Err(EventStoreError::Dispatch(format!(
                "record of type '{}' cannot be decoded as '{}'",
                self.event_type,
                E::EVENT_TYPE
            )));
        }

        deserialize_event(&self.data).map_err(|source| EventStoreError::Serialization {
            commit: format!("event {}", self.event_type),
            source,
        })
    }
}

// ============================================================================
// Events Load - deserialized read result
// ============================================================================

/// Deserialized events of one stream in commit order, plus the stream version.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EventsLoad {
    pub events: Vec<EventRecord>,
    pub version: u32,
}

impl EventsLoad {
    pub fn new(events: Vec<EventRecord>, version: u32) -> Self {
        Self { events, version }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() || self.version == 0
    }
}

// ============================================================================
// Event Serialization Helpers
// ============================================================================

pub fn deserialize_event<E: DeserializeOwned>(value: &serde_json::Value) -> serde_json::Result<E> {
    E::deserialize(value)
}
