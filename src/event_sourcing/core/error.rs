// ============================================================================
// Event Store Errors
// ============================================================================
//
// Single error type for the generic event sourcing infrastructure.
// Domain rule violations live in their own enums under src/domain/.
//
// ============================================================================

pub type Result<T> = std::result::Result<T, EventStoreError>;

#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// Null/empty/out-of-range input rejected before any I/O.
    #[error("invalid argument '{name}': {reason}")]
    InvalidArgument { name: &'static str, reason: String },

    /// A commit failed its validation and was never written.
    #[error("invalid persistence data: {0}")]
    InvalidPersistenceData(String),

    #[error("conflict on stream '{stream_id}' occurred; attempt to save duplicate version {version}")]
    VersionConflict {
        stream_id: String,
        version: u32,
        detail: Option<String>,
    },

    #[error("event stream {stream_id} is too long ({version} >= limit {limit}); could not apply event {event_type}")]
    StreamTooLong {
        stream_id: String,
        version: u32,
        limit: u32,
        event_type: String,
    },

    /// Unmaterializable event descriptor or unresolved codec id.
    #[error("dispatch failed: {0}")]
    Dispatch(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("serialization of {commit} failed: {source}")]
    Serialization {
        commit: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("event store failure: {0}")]
    Backend(String),
}

impl EventStoreError {
    pub fn invalid_argument(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name,
            reason: reason.into(),
        }
    }

    pub fn version_conflict(stream_id: impl Into<String>, version: u32) -> Self {
        Self::VersionConflict {
            stream_id: stream_id.into(),
            version,
            detail: None,
        }
    }

    pub fn with_detail(self, detail: impl Into<String>) -> Self {
        match self {
            Self::VersionConflict {
                stream_id, version, ..
            } => Self::VersionConflict {
                stream_id,
                version,
                detail: Some(detail.into()),
            },
            other => other,
        }
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    pub fn is_stream_too_long(&self) -> bool {
        matches!(self, Self::StreamTooLong { .. })
    }
}

pub(crate) fn expect_not_empty(value: &str, name: &'static str) -> Result<()> {
    if value.is_empty() {
        return Err(EventStoreError::invalid_argument(name, "must not be empty string"));
    }
    Ok(())
}
