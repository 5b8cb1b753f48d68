use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::persistence::{Persistence, PersistenceSession};
use super::transaction::{Enlistment, Transaction};
use crate::event_sourcing::core::error::expect_not_empty;
use crate::event_sourcing::core::{Commit, CommitsLoad, EventStoreError, Result};

// ============================================================================
// In-Memory Persistence - reference backend
// ============================================================================
//
// stream id -> version -> commit. The version check and the insert happen
// under one write lock, which is what makes optimistic concurrency hold
// between concurrent writers to the same stream. A commit must land above
// the stream's head; anything at or below it was decided on stale state.
//
// Every clone of `InMemoryPersistence` shares the same storage.
//
// ============================================================================

type Streams = HashMap<String, BTreeMap<u32, Commit>>;

#[derive(Clone, Default)]
pub struct InMemoryPersistence {
    streams: Arc<RwLock<Streams>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn stream_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.streams.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn commit_count(&self, stream_id: &str) -> usize {
        self.streams
            .read()
            .await
            .get(stream_id)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

impl Persistence for InMemoryPersistence {
    fn open_session(&self, transaction: Option<Transaction>) -> Box<dyn PersistenceSession> {
        Box::new(InMemorySession {
            streams: self.streams.clone(),
            transaction,
            staged: HashSet::new(),
        })
    }
}

pub struct InMemorySession {
    streams: Arc<RwLock<Streams>>,
    transaction: Option<Transaction>,
    /// (stream id, version) pairs saved through this session. Inside a
    /// transaction the transaction's own staged set applies as well.
    staged: HashSet<(String, u32)>,
}

#[async_trait]
impl PersistenceSession for InMemorySession {
    async fn load_commits(&mut self, stream_id: &str) -> Result<CommitsLoad> {
        expect_not_empty(stream_id, "stream_id")?;

        let streams = self.streams.read().await;
        let Some(stream) = streams.get(stream_id) else {
            return Ok(CommitsLoad::empty());
        };

        let version = stream.keys().next_back().copied().unwrap_or(0);
        let commits: Vec<Commit> = stream.values().cloned().collect();
        Ok(CommitsLoad::new(commits, version))
    }

    async fn save(&mut self, commit: Commit) -> Result<bool> {
        commit.validate()?;

        let key = (commit.stream_id.clone(), commit.version);
        if self.staged.contains(&key) {
            return Err(EventStoreError::version_conflict(key.0, key.1)
                .with_detail("version already staged in this session"));
        }

        match &self.transaction {
            Some(transaction) => {
                ensure_above_head(&*self.streams.read().await, &commit)?;
                transaction.stage(&key.0, key.1)?;

                transaction.enlist(Box::new(DeferredSave {
                    streams: self.streams.clone(),
                    commit,
                }))?;

                tracing::debug!(
                    stream_id = %key.0,
                    version = key.1,
                    transaction_id = %transaction.id(),
                    "Commit staged until transaction completes"
                );
            }
            None => {
                insert_commit(&mut *self.streams.write().await, commit)?;
            }
        }

        self.staged.insert(key);
        Ok(true)
    }

    async fn delete(&mut self, stream_id: &str) -> Result<bool> {
        expect_not_empty(stream_id, "stream_id")?;
        Ok(self.streams.write().await.remove(stream_id).is_some())
    }
}

fn head_version(streams: &Streams, stream_id: &str) -> u32 {
    streams
        .get(stream_id)
        .and_then(|stream| stream.keys().next_back().copied())
        .unwrap_or(0)
}

fn ensure_above_head(streams: &Streams, commit: &Commit) -> Result<()> {
    let head = head_version(streams, &commit.stream_id);
    if commit.version == head {
        return Err(EventStoreError::version_conflict(&commit.stream_id, commit.version)
            .with_detail("version already persisted"));
    }
    if commit.version < head {
        return Err(EventStoreError::version_conflict(&commit.stream_id, commit.version)
            .with_detail(format!("stream is already at version {head}")));
    }
    Ok(())
}

fn insert_commit(streams: &mut Streams, commit: Commit) -> Result<()> {
    ensure_above_head(streams, &commit)?;
    streams
        .entry(commit.stream_id.clone())
        .or_default()
        .insert(commit.version, commit);
    Ok(())
}

/// A save waiting for its transaction. Prepare re-checks the head so a
/// writer that landed in the meantime fails the whole transaction before
/// anything is written.
struct DeferredSave {
    streams: Arc<RwLock<Streams>>,
    commit: Commit,
}

#[async_trait]
impl Enlistment for DeferredSave {
    async fn prepare(&self) -> Result<()> {
        ensure_above_head(&*self.streams.read().await, &self.commit)
    }

    async fn commit(&self) -> Result<()> {
        insert_commit(&mut *self.streams.write().await, self.commit.clone())
    }

    fn rollback(&self) {
        tracing::trace!(commit = %self.commit, "Deferred commit discarded");
    }
}
