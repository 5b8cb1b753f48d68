// ============================================================================
// Serialization Registry - pluggable commit codecs
// ============================================================================
//
// Writes always go through the default codec. Reads resolve the codec by the
// id stored on each commit, since one stream may hold commits written by
// different codecs over time. An unknown id is an error: decoding bytes with
// the wrong codec would corrupt data silently.
//
// ============================================================================

mod json;

use std::collections::HashMap;
use std::sync::Arc;

use super::core::{Commit, EventRecord, EventStoreError, PayloadLayout, Result};

pub use json::{JsonSerializer, PackedJsonSerializer};

/// Output of a codec: everything a commit needs besides stream and version.
#[derive(Debug, Clone, PartialEq)]
pub struct SerializedEvents {
    pub payload: Vec<u8>,
    pub items_count: u16,
    pub serializer_id: String,
    pub payload_layout: Option<PayloadLayout>,
}

impl SerializedEvents {
    pub fn into_commit(self, stream_id: impl Into<String>, version: u32) -> Commit {
        let mut commit = Commit::new(stream_id, version);
        commit.items_count = self.items_count;
        commit.serializer_id = self.serializer_id;
        commit.payload = self.payload;
        commit.payload_layout = self.payload_layout;
        commit
    }
}

pub trait SerializeEvents: Send + Sync {
    /// Stored on every commit this codec writes.
    fn serializer_id(&self) -> &str;

    fn serialize(&self, events: &[EventRecord]) -> Result<SerializedEvents>;

    fn deserialize(&self, commit: &Commit) -> Result<Vec<EventRecord>>;
}

/// A commit holds between 1 and `u16::MAX` events.
pub(crate) fn items_count(events: &[EventRecord]) -> Result<u16> {
    if events.is_empty() {
        return Err(EventStoreError::invalid_argument(
            "events",
            "at least one event is required",
        ));
    }

    u16::try_from(events.len()).map_err(|_| {
        EventStoreError::invalid_argument(
            "events",
            format!("{} events do not fit in one commit (max {})", events.len(), u16::MAX),
        )
    })
}

pub struct Serializers {
    codecs: HashMap<String, Arc<dyn SerializeEvents>>,
    default: Arc<dyn SerializeEvents>,
}

impl Serializers {
    /// Fails when `codecs` is empty, holds duplicate ids, or lacks `default_id`.
    pub fn new(codecs: Vec<Arc<dyn SerializeEvents>>, default_id: &str) -> Result<Self> {
        if codecs.is_empty() {
            return Err(EventStoreError::invalid_argument(
                "codecs",
                "at least one serializer must be registered",
            ));
        }

        let mut by_id = HashMap::with_capacity(codecs.len());
        for codec in codecs {
            let id = codec.serializer_id().to_string();
            if by_id.insert(id.clone(), codec).is_some() {
                return Err(EventStoreError::invalid_argument(
                    "codecs",
                    format!("serializer '{id}' is registered twice"),
                ));
            }
        }

        let default = by_id.get(default_id).cloned().ok_or_else(|| {
            EventStoreError::invalid_argument(
                "default_id",
                format!("default serializer '{default_id}' is not registered"),
            )
        })?;

        Ok(Self {
            codecs: by_id,
            default,
        })
    }

    pub fn default_serializer(&self) -> &Arc<dyn SerializeEvents> {
        &self.default
    }

    pub fn default_id(&self) -> &str {
        self.default.serializer_id()
    }

    /// Codec that wrote a commit with this id. No fallback.
    pub fn get(&self, serializer_id: &str) -> Result<&Arc<dyn SerializeEvents>> {
        self.codecs.get(serializer_id).ok_or_else(|| {
            EventStoreError::Dispatch(format!("no serializer registered under id '{serializer_id}'"))
        })
    }

    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.codecs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Decodes a commit with the codec named on it.
    pub fn deserialize(&self, commit: &Commit) -> Result<Vec<EventRecord>> {
        self.get(&commit.serializer_id)?.deserialize(commit)
    }
}

impl Default for Serializers {
    /// `json` (default) and `json.packed`.
    fn default() -> Self {
        let json: Arc<dyn SerializeEvents> = Arc::new(JsonSerializer);
        let packed: Arc<dyn SerializeEvents> = Arc::new(PackedJsonSerializer);
        let mut codecs = HashMap::new();
        codecs.insert(json.serializer_id().to_string(), json.clone());
        codecs.insert(packed.serializer_id().to_string(), packed);
        Self {
            codecs,
            default: json,
        }
    }
}

impl std::fmt::Debug for Serializers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Serializers")
            .field("ids", &self.ids())
            .field("default", &self.default_id())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_empty_registry() {
        let result = Serializers::new(Vec::new(), "json");
        assert!(matches!(result, Err(EventStoreError::InvalidArgument { .. })));
    }

    #[test]
    fn test_rejects_unknown_default() {
        let result = Serializers::new(vec![Arc::new(JsonSerializer)], "msgpack");
        assert!(matches!(result, Err(EventStoreError::InvalidArgument { .. })));
    }

    #[test]
    fn test_rejects_duplicate_ids() {
        let result = Serializers::new(vec![Arc::new(JsonSerializer), Arc::new(JsonSerializer)], "json");
        assert!(matches!(result, Err(EventStoreError::InvalidArgument { .. })));
    }

    #[test]
    fn test_lookup_by_id() {
        let serializers = Serializers::new(
            vec![Arc::new(JsonSerializer), Arc::new(PackedJsonSerializer)],
            "json.packed",
        )
        .unwrap();

        assert_eq!(serializers.default_id(), "json.packed");
        assert_eq!(serializers.get("json").unwrap().serializer_id(), "json");
        assert_eq!(serializers.ids(), vec!["json", "json.packed"]);
    }

    #[test]
    fn test_unknown_or_empty_id_has_no_fallback() {
        let serializers = Serializers::default();
        assert!(matches!(serializers.get("xml"), Err(EventStoreError::Dispatch(_))));
        assert!(matches!(serializers.get(""), Err(EventStoreError::Dispatch(_))));
    }

    #[test]
    fn test_items_count_bounds() {
        assert!(items_count(&[]).is_err());

        let record = EventRecord::new("E", serde_json::Value::Null);
        assert_eq!(items_count(std::slice::from_ref(&record)).unwrap(), 1);

        let too_many = vec![record; u16::MAX as usize + 1];
        assert!(matches!(items_count(&too_many), Err(EventStoreError::InvalidArgument { .. })));
    }

    #[test]
    fn test_into_commit_is_valid() {
        let records = vec![EventRecord::new("E", serde_json::json!({ "a": 1 }))];
        let commit = Serializers::default()
            .default_serializer()
            .serialize(&records)
            .unwrap()
            .into_commit("stream-1", 1);

        assert!(commit.validate().is_ok());
        assert_eq!(commit.serializer_id, "json");
        assert_eq!(Serializers::default().deserialize(&commit).unwrap(), records);
    }
}
