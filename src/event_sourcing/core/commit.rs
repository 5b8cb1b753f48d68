use std::fmt;
use uuid::Uuid;

use super::error::{EventStoreError, Result};
use super::payload_layout::PayloadLayout;

// ============================================================================
// Commit - the unit of durability
// ============================================================================
//
// One commit carries every event saved by a single save call, serialized
// into `payload` by the codec named in `serializer_id`. Commits are validated
// before any backend sees them.
//
// ============================================================================

pub const MAX_PAYLOAD_SIZE: usize = 65536;
pub const MAX_STREAM_ID_LEN: usize = 100;
pub const MAX_SERIALIZER_ID_LEN: usize = 20;

#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Time-ordered (UUIDv7); `Uuid::nil()` means unset.
    pub id: Uuid,
    pub stream_id: String,
    /// Strictly increasing, gap-free per stream, starting at 1.
    pub version: u32,
    pub items_count: u16,
    pub serializer_id: String,
    pub payload: Vec<u8>,
    pub payload_layout: Option<PayloadLayout>,
}

impl Commit {
    /// New commit stamped with a fresh time-ordered id.
    pub fn new(stream_id: impl Into<String>, version: u32) -> Self {
        Self {
            id: Uuid::now_v7(),
            stream_id: stream_id.into(),
            version,
            items_count: 0,
            serializer_id: String::new(),
            payload: Vec::new(),
            payload_layout: None,
        }
    }

    /// Checks every field and fails with `InvalidPersistenceData` on the first
    /// violation found.
    pub fn validate(&self) -> Result<()> {
        if self.version < 1 {
            return Err(self.invalid("Version is lesser than 1"));
        }

        if self.items_count < 1 {
            return Err(self.invalid("ItemsCount is lesser than 1"));
        }

        if !is_valid_identifier(&self.stream_id, MAX_STREAM_ID_LEN) {
            return Err(self.invalid(&format!(
                "StreamId must be 1-{MAX_STREAM_ID_LEN} word characters, '-', '/' or '.'"
            )));
        }

        if !is_valid_identifier(&self.serializer_id, MAX_SERIALIZER_ID_LEN) {
            return Err(self.invalid(&format!(
                "SerializerId must be 1-{MAX_SERIALIZER_ID_LEN} word characters, '-', '/' or '.'"
            )));
        }

        if self.payload.is_empty() {
            return Err(self.invalid("Payload is empty"));
        }

        if self.payload.len() > MAX_PAYLOAD_SIZE {
            return Err(self.invalid(&format!(
                "Payload is too large ({} bytes; limit is {MAX_PAYLOAD_SIZE})",
                self.payload.len()
            )));
        }

        if self.id.is_nil() {
            return Err(self.invalid("Id must not be empty"));
        }

        Ok(())
    }

    fn invalid(&self, reason: &str) -> EventStoreError {
        EventStoreError::InvalidPersistenceData(format!("{reason} in commit {self}"))
    }
}

impl fmt::Display for Commit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.stream_id, self.version)
    }
}

/// Same charset the backends accept for keys: word characters, '-', '/', '.'.
pub fn is_valid_identifier(value: &str, max_len: usize) -> bool {
    let len = value.chars().count();
    (1..=max_len).contains(&len)
        && value
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '/' | '.'))
}

// ============================================================================
// Commits Load - raw read result
// ============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommitsLoad {
    /// Ascending version order.
    pub commits: Vec<Commit>,
    /// Highest version present, 0 when nothing was found.
    pub version: u32,
}

impl CommitsLoad {
    pub fn new(commits: Vec<Commit>, version: u32) -> Self {
        Self { commits, version }
    }

    /// Canonical result for a stream that does not exist. Callers cannot tell
    /// it apart from a stream at version 0.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty() || self.version == 0
    }

    pub fn payload_bytes(&self) -> usize {
        self.commits.iter().map(|c| c.payload.len()).sum()
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn valid_commit(stream_id: &str, version: u32) -> Commit {
        Commit {
            id: Uuid::now_v7(),
            stream_id: stream_id.to_string(),
            version,
            items_count: 1,
            serializer_id: "text".to_string(),
            payload: b"{\"hello\":\"world\"}".to_vec(),
            payload_layout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::valid_commit;
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_valid_commit_passes() {
        assert!(valid_commit("c0ffee-stream", 1).validate().is_ok());
    }

    #[test]
    fn test_commit_with_layout_passes() {
        let mut commit = valid_commit("orders/2024.01", 7);
        let mut layout = PayloadLayout::new();
        layout.add(0, 8, "A").unwrap();
        layout.add(8, 9, "B").unwrap();
        commit.items_count = 2;
        commit.payload_layout = Some(layout);
        assert!(commit.validate().is_ok());
    }

    #[rstest]
    #[case::nil_id(|c: &mut Commit| c.id = Uuid::nil())]
    #[case::empty_stream_id(|c: &mut Commit| c.stream_id = String::new())]
    #[case::stream_id_with_space(|c: &mut Commit| c.stream_id = "sijd ppwp".into())]
    #[case::stream_id_too_long(|c: &mut Commit| c.stream_id = "s".repeat(101))]
    #[case::version_zero(|c: &mut Commit| c.version = 0)]
    #[case::items_count_zero(|c: &mut Commit| c.items_count = 0)]
    #[case::empty_serializer_id(|c: &mut Commit| c.serializer_id = String::new())]
    #[case::serializer_id_with_space(|c: &mut Commit| c.serializer_id = "4848 884".into())]
    #[case::serializer_id_too_long(|c: &mut Commit| c.serializer_id = "x".repeat(21))]
    #[case::empty_payload(|c: &mut Commit| c.payload.clear())]
    #[case::oversized_payload(|c: &mut Commit| c.payload = vec![1; MAX_PAYLOAD_SIZE + 1])]
    fn test_invalid_commits_are_rejected(#[case] corrupt: fn(&mut Commit)) {
        let mut commit = valid_commit("stream-1", 1);
        corrupt(&mut commit);

        let result = commit.validate();
        assert!(
            matches!(result, Err(EventStoreError::InvalidPersistenceData(_))),
            "expected InvalidPersistenceData, got {result:?}"
        );
    }

    #[test]
    fn test_boundary_sizes_are_accepted() {
        let mut commit = valid_commit(&"s".repeat(100), 1);
        commit.serializer_id = "x".repeat(20);
        commit.payload = vec![1; MAX_PAYLOAD_SIZE];
        assert!(commit.validate().is_ok());
    }

    #[test]
    fn test_commit_ids_are_time_ordered() {
        let first = Commit::new("s", 1);
        let second = Commit::new("s", 2);
        assert!(first.id < second.id);
        assert!(!first.id.is_nil());
    }

    #[test]
    fn test_display() {
        assert_eq!(valid_commit("abc", 4).to_string(), "abc:4");
    }

    #[test]
    fn test_commits_load_empty_semantics() {
        assert!(CommitsLoad::empty().is_empty());
        assert!(CommitsLoad::new(vec![valid_commit("s", 1)], 0).is_empty());

        let load = CommitsLoad::new(vec![valid_commit("s", 1)], 1);
        assert!(!load.is_empty());
        assert_eq!(load.payload_bytes(), 17);
    }
}
