use super::{items_count, SerializeEvents, SerializedEvents};
use crate::event_sourcing::core::{Commit, EventRecord, EventStoreError, PayloadLayout, Result};

/// Payload is one JSON array of `{"type": ..., "data": ...}` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    pub const ID: &'static str = "json";
}

impl SerializeEvents for JsonSerializer {
    fn serializer_id(&self) -> &str {
        Self::ID
    }

    fn serialize(&self, events: &[EventRecord]) -> Result<SerializedEvents> {
        let items_count = items_count(events)?;
        let payload = serde_json::to_vec(events).map_err(|source| EventStoreError::Serialization {
            commit: format!("{items_count} pending events"),
            source,
        })?;

        Ok(SerializedEvents {
            payload,
            items_count,
            serializer_id: Self::ID.to_string(),
            payload_layout: None,
        })
    }

    fn deserialize(&self, commit: &Commit) -> Result<Vec<EventRecord>> {
        let records: Vec<EventRecord> =
            serde_json::from_slice(&commit.payload).map_err(|source| EventStoreError::Serialization {
                commit: commit.to_string(),
                source,
            })?;

        check_count(commit, records.len())?;
        Ok(records)
    }
}

/// Event bodies are written back to back; the payload layout says where each
/// one starts and which event type it holds.
#[derive(Debug, Clone, Copy, Default)]
pub struct PackedJsonSerializer;

impl PackedJsonSerializer {
    pub const ID: &'static str = "json.packed";
}

impl SerializeEvents for PackedJsonSerializer {
    fn serializer_id(&self) -> &str {
        Self::ID
    }

    fn serialize(&self, events: &[EventRecord]) -> Result<SerializedEvents> {
        let items_count = items_count(events)?;
        let mut payload = Vec::new();
        let mut layout = PayloadLayout::with_capacity(events.len());

        for record in events {
            let offset = payload.len();
            serde_json::to_writer(&mut payload, &record.data).map_err(|source| {
                EventStoreError::Serialization {
                    commit: format!("event {}", record.event_type),
                    source,
                }
            })?;
            layout.add(to_u32(offset)?, to_u32(payload.len() - offset)?, record.event_type.as_str())?;
        }

        Ok(SerializedEvents {
            payload,
            items_count,
            serializer_id: Self::ID.to_string(),
            payload_layout: Some(layout),
        })
    }

    fn deserialize(&self, commit: &Commit) -> Result<Vec<EventRecord>> {
        let layout = commit.payload_layout.as_ref().ok_or_else(|| {
            EventStoreError::InvalidPersistenceData(format!("commit {commit} has no payload layout"))
        })?;
        check_count(commit, layout.len())?;

        layout
            .entries()
            .iter()
            .map(|entry| {
                let start = entry.offset as usize;
                let end = start + entry.length as usize;
                let body = commit.payload.get(start..end).ok_or_else(|| {
                    EventStoreError::InvalidPersistenceData(format!(
                        "layout entry {start}..{end} of commit {commit} is outside the {} byte payload",
                        commit.payload.len()
                    ))
                })?;

                let data = serde_json::from_slice(body).map_err(|source| EventStoreError::Serialization {
                    commit: commit.to_string(),
                    source,
                })?;
                Ok(EventRecord::new(entry.type_id.clone(), data))
            })
            .collect()
    }
}

fn check_count(commit: &Commit, found: usize) -> Result<()> {
    if found != commit.items_count as usize {
        return Err(EventStoreError::InvalidPersistenceData(format!(
            "commit {commit} declares {} events but holds {found}",
            commit.items_count
        )));
    }
    Ok(())
}

fn to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| EventStoreError::invalid_argument("events", "serialized payload exceeds 4 GiB"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn records() -> Vec<EventRecord> {
        vec![
            EventRecord::new("CustomerInitialized", json!({ "email": "a@b.c", "age": 30 })),
            EventRecord::new("OrderPlaced", json!({ "id": "o-1", "lines": [1, 2] })),
            EventRecord::new("AccountTerminated", json!({ "reason": "RequestedByCustomer" })),
        ]
    }

    #[test]
    fn test_json_round_trip_keeps_order() {
        let codec = JsonSerializer;
        let commit = codec.serialize(&records()).unwrap().into_commit("c-1", 1);

        assert_eq!(commit.items_count, 3);
        assert!(commit.payload_layout.is_none());
        assert_eq!(codec.deserialize(&commit).unwrap(), records());
    }

    #[test]
    fn test_json_rejects_count_mismatch() {
        let codec = JsonSerializer;
        let mut commit = codec.serialize(&records()).unwrap().into_commit("c-1", 1);
        commit.items_count = 2;

        assert!(matches!(
            codec.deserialize(&commit),
            Err(EventStoreError::InvalidPersistenceData(_))
        ));
    }

    #[test]
    fn test_json_rejects_garbage() {
        let mut commit = JsonSerializer.serialize(&records()).unwrap().into_commit("c-1", 1);
        commit.payload = b"not json".to_vec();

        assert!(matches!(
            JsonSerializer.deserialize(&commit),
            Err(EventStoreError::Serialization { .. })
        ));
    }

    #[test]
    fn test_packed_round_trip_keeps_order() {
        let codec = PackedJsonSerializer;
        let serialized = codec.serialize(&records()).unwrap();

        let layout = serialized.payload_layout.clone().unwrap();
        assert_eq!(layout.len(), 3);
        assert_eq!(layout.entries()[0].offset, 0);
        assert_eq!(layout.entries()[1].type_id, "OrderPlaced");

        let commit = serialized.into_commit("c-1", 1);
        assert!(commit.validate().is_ok());
        assert_eq!(codec.deserialize(&commit).unwrap(), records());
    }

    #[test]
    fn test_packed_layout_survives_wire_format() {
        let codec = PackedJsonSerializer;
        let mut commit = codec.serialize(&records()).unwrap().into_commit("c-1", 1);

        let bytes = commit.payload_layout.as_ref().unwrap().to_bytes();
        commit.payload_layout = Some(PayloadLayout::from_bytes(&bytes).unwrap());

        assert_eq!(codec.deserialize(&commit).unwrap(), records());
    }

    #[test]
    fn test_packed_rejects_out_of_range_entry() {
        let codec = PackedJsonSerializer;
        let mut commit = codec.serialize(&records()).unwrap().into_commit("c-1", 1);

        let mut layout = PayloadLayout::new();
        layout.add(0, 10_000, "CustomerInitialized").unwrap();
        commit.items_count = 1;
        commit.payload_layout = Some(layout);

        assert!(matches!(
            codec.deserialize(&commit),
            Err(EventStoreError::InvalidPersistenceData(_))
        ));
    }

    #[test]
    fn test_packed_requires_layout() {
        let mut commit = PackedJsonSerializer.serialize(&records()).unwrap().into_commit("c-1", 1);
        commit.payload_layout = None;

        assert!(matches!(
            PackedJsonSerializer.deserialize(&commit),
            Err(EventStoreError::InvalidPersistenceData(_))
        ));
    }

    #[test]
    fn test_zero_events_rejected() {
        assert!(matches!(
            JsonSerializer.serialize(&[]),
            Err(EventStoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            PackedJsonSerializer.serialize(&[]),
            Err(EventStoreError::InvalidArgument { .. })
        ));
    }
}
