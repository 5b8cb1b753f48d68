use async_trait::async_trait;

use super::transaction::Transaction;
use crate::event_sourcing::core::{Commit, CommitsLoad, Result};

// ============================================================================
// Persistence Backend Abstraction
// ============================================================================
//
// A backend stores commits per stream and rejects a second commit with the
// same (stream id, version). Sessions are short-lived and opened per unit of
// work; a session opened with a transaction defers its writes until the
// transaction completes.
//
// ============================================================================

pub trait Persistence: Send + Sync {
    fn open_session(&self, transaction: Option<Transaction>) -> Box<dyn PersistenceSession>;
}

#[async_trait]
pub trait PersistenceSession: Send {
    /// All commits of the stream in ascending version order. A missing stream
    /// gives `CommitsLoad::empty()`.
    async fn load_commits(&mut self, stream_id: &str) -> Result<CommitsLoad>;

    /// Validates and stores `commit`. Fails with `VersionConflict` when the
    /// version is already staged in this session or already durable.
    async fn save(&mut self, commit: Commit) -> Result<bool>;

    /// Removes the whole stream; `false` when it did not exist.
    async fn delete(&mut self, stream_id: &str) -> Result<bool>;
}
