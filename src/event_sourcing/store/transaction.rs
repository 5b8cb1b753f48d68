use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use uuid::Uuid;

use crate::event_sourcing::core::{EventStoreError, Result};

// ============================================================================
// Transaction - explicit two-phase enlistment handle
// ============================================================================
//
// Sessions opened with a transaction defer their durable writes: each write
// enlists itself here and only lands when `complete()` runs. Rolling back,
// or dropping every handle without completing, discards all of them.
//
//   complete():  prepare all -> commit each
//   rollback():  rollback each
//
// ============================================================================

/// A deferred write taking part in a transaction.
#[async_trait]
pub trait Enlistment: Send + Sync {
    async fn prepare(&self) -> Result<()>;

    async fn commit(&self) -> Result<()>;

    /// Must not fail; runs from `Drop` as well.
    fn rollback(&self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Completing,
    Committed,
    RolledBack,
}

struct TransactionState {
    status: TransactionStatus,
    enlistments: Vec<Box<dyn Enlistment>>,
    /// Highest version staged per stream, across every session in the transaction.
    staged: HashMap<String, u32>,
}

struct TransactionInner {
    id: Uuid,
    state: Mutex<TransactionState>,
}

impl TransactionInner {
    fn lock(&self) -> MutexGuard<'_, TransactionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rollback(&self) -> usize {
        let enlistments = {
            let mut state = self.lock();
            if state.status != TransactionStatus::Active {
                return 0;
            }
            state.status = TransactionStatus::RolledBack;
            std::mem::take(&mut state.enlistments)
        };

        for enlistment in &enlistments {
            enlistment.rollback();
        }
        enlistments.len()
    }
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        let discarded = self.rollback();
        if discarded > 0 {
            tracing::debug!(
                transaction_id = %self.id,
                discarded,
                "Transaction dropped without completing; deferred writes discarded"
            );
        }
    }
}

/// Cheap to clone; every clone refers to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id: Uuid::new_v4(),
                state: Mutex::new(TransactionState {
                    status: TransactionStatus::Active,
                    enlistments: Vec::new(),
                    staged: HashMap::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn status(&self) -> TransactionStatus {
        self.inner.lock().status
    }

    pub fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    pub fn enlisted(&self) -> usize {
        self.inner.lock().enlistments.len()
    }

    /// Claims `version` of `stream_id` for this transaction. A version at or
    /// below one already staged here is a conflict.
    pub fn stage(&self, stream_id: &str, version: u32) -> Result<()> {
        let mut state = self.inner.lock();
        if state.status != TransactionStatus::Active {
            return Err(EventStoreError::InvalidOperation(format!(
                "transaction {} is {:?} and no longer accepts writes",
                self.inner.id, state.status
            )));
        }
        if let Some(&staged) = state.staged.get(stream_id) {
            if version <= staged {
                return Err(EventStoreError::version_conflict(stream_id, version)
                    .with_detail(format!("version {staged} already staged in this transaction")));
            }
        }
        state.staged.insert(stream_id.to_string(), version);
        Ok(())
    }

    pub fn enlist(&self, enlistment: Box<dyn Enlistment>) -> Result<()> {
        let mut state = self.inner.lock();
        if state.status != TransactionStatus::Active {
            return Err(EventStoreError::InvalidOperation(format!(
                "transaction {} is {:?} and no longer accepts enlistments",
                self.inner.id, state.status
            )));
        }
        state.enlistments.push(enlistment);
        Ok(())
    }

    /// Prepares every enlistment, then commits each one.
    ///
    /// A failed prepare rolls everything back. A failed commit is returned
    /// after the remaining enlistments have committed; writes that already
    /// landed stay durable.
    pub async fn complete(self) -> Result<()> {
        let enlistments = {
            let mut state = self.inner.lock();
            if state.status != TransactionStatus::Active {
                return Err(EventStoreError::InvalidOperation(format!(
                    "transaction {} is already {:?}",
                    self.inner.id, state.status
                )));
            }
            state.status = TransactionStatus::Completing;
            std::mem::take(&mut state.enlistments)
        };

        for enlistment in &enlistments {
            if let Err(e) = enlistment.prepare().await {
                for enlistment in &enlistments {
                    enlistment.rollback();
                }
                self.inner.lock().status = TransactionStatus::RolledBack;
                return Err(e);
            }
        }

        let mut first_error = None;
        for enlistment in &enlistments {
            if let Err(e) = enlistment.commit().await {
                tracing::error!(transaction_id = %self.inner.id, error = %e, "Enlistment failed to commit");
                first_error.get_or_insert(e);
            }
        }

        self.inner.lock().status = TransactionStatus::Committed;
        tracing::debug!(
            transaction_id = %self.inner.id,
            enlistments = enlistments.len(),
            "Transaction completed"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Discards every deferred write. No-op once the transaction has ended.
    pub fn rollback(&self) {
        let discarded = self.inner.rollback();
        tracing::debug!(transaction_id = %self.inner.id, discarded, "Transaction rolled back");
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counters {
        prepared: AtomicUsize,
        committed: AtomicUsize,
        rolled_back: AtomicUsize,
    }

    struct Recording {
        counters: Arc<Counters>,
        fail_prepare: bool,
        fail_commit: bool,
    }

    impl Recording {
        fn boxed(counters: &Arc<Counters>) -> Box<dyn Enlistment> {
            Box::new(Self {
                counters: counters.clone(),
                fail_prepare: false,
                fail_commit: false,
            })
        }
    }

    #[async_trait]
    impl Enlistment for Recording {
        async fn prepare(&self) -> Result<()> {
            self.counters.prepared.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare {
                return Err(EventStoreError::Backend("prepare failed".into()));
            }
            Ok(())
        }

        async fn commit(&self) -> Result<()> {
            if self.fail_commit {
                return Err(EventStoreError::version_conflict("s", 1));
            }
            self.counters.committed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn rollback(&self) {
            self.counters.rolled_back.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_complete_prepares_then_commits() {
        let counters = Arc::new(Counters::default());
        let tx = Transaction::new();
        tx.enlist(Recording::boxed(&counters)).unwrap();
        tx.enlist(Recording::boxed(&counters)).unwrap();
        assert_eq!(tx.enlisted(), 2);

        let handle = tx.clone();
        tx.complete().await.unwrap();

        assert_eq!(counters.prepared.load(Ordering::SeqCst), 2);
        assert_eq!(counters.committed.load(Ordering::SeqCst), 2);
        assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 0);
        assert_eq!(handle.status(), TransactionStatus::Committed);
    }

    #[tokio::test]
    async fn test_explicit_rollback() {
        let counters = Arc::new(Counters::default());
        let tx = Transaction::new();
        tx.enlist(Recording::boxed(&counters)).unwrap();

        tx.rollback();

        assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(tx.status(), TransactionStatus::RolledBack);
        assert!(matches!(tx.complete().await, Err(EventStoreError::InvalidOperation(_))));
    }

    #[test]
    fn test_drop_without_complete_rolls_back() {
        let counters = Arc::new(Counters::default());
        {
            let tx = Transaction::new();
            let other = tx.clone();
            tx.enlist(Recording::boxed(&counters)).unwrap();
            drop(tx);
            // a surviving handle keeps the transaction alive
            assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 0);
            assert!(other.is_active());
        }
        assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 1);
        assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_failed_prepare_rolls_back_everything() {
        let counters = Arc::new(Counters::default());
        let tx = Transaction::new();
        tx.enlist(Recording::boxed(&counters)).unwrap();
        tx.enlist(Box::new(Recording {
            counters: counters.clone(),
            fail_prepare: true,
            fail_commit: false,
        }))
        .unwrap();

        let handle = tx.clone();
        assert!(tx.complete().await.is_err());
        assert_eq!(counters.committed.load(Ordering::SeqCst), 0);
        assert_eq!(counters.rolled_back.load(Ordering::SeqCst), 2);
        assert_eq!(handle.status(), TransactionStatus::RolledBack);
    }

    #[tokio::test]
    async fn test_failed_commit_is_surfaced_others_still_commit() {
        let counters = Arc::new(Counters::default());
        let tx = Transaction::new();
        tx.enlist(Box::new(Recording {
            counters: counters.clone(),
            fail_prepare: false,
            fail_commit: true,
        }))
        .unwrap();
        tx.enlist(Recording::boxed(&counters)).unwrap();

        let err = tx.complete().await.unwrap_err();
        assert!(err.is_version_conflict());
        assert_eq!(counters.committed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_stage_rejects_versions_already_claimed() {
        let tx = Transaction::new();
        tx.stage("s", 2).unwrap();
        tx.stage("other", 1).unwrap();

        assert!(tx.stage("s", 2).unwrap_err().is_version_conflict());
        assert!(tx.stage("s", 1).unwrap_err().is_version_conflict());
        tx.stage("s", 3).unwrap();

        tx.rollback();
        assert!(matches!(tx.stage("s", 4), Err(EventStoreError::InvalidOperation(_))));
    }

    #[tokio::test]
    async fn test_enlist_after_completion_fails() {
        let tx = Transaction::new();
        let handle = tx.clone();
        tx.complete().await.unwrap();

        let counters = Arc::new(Counters::default());
        let result = handle.enlist(Recording::boxed(&counters));
        assert!(matches!(result, Err(EventStoreError::InvalidOperation(_))));
    }
}
