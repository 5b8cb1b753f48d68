use std::any::type_name;
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

use super::persistence::{Persistence, PersistenceSession};
use super::transaction::Transaction;
use crate::config::EventStoreConfig;
use crate::event_sourcing::core::error::expect_not_empty;
use crate::event_sourcing::core::{
    Aggregate, AggregateRoot, AggregateServices, EventFactory, EventRecord, EventsLoad, Result,
};
use crate::event_sourcing::serialization::Serializers;
use crate::telemetry::{LogSeverity, Metric, Operation, Telemetry};

// ============================================================================
// Event Store - entry point and session factory
// ============================================================================
//
// Responsibilities:
// 1. Hold the resolved collaborators (backend, codecs, telemetry, limits)
// 2. Hand out short-lived sessions, optionally bound to a transaction
// 3. Build aggregate roots that share one set of dispatch caches
//
// ============================================================================

pub struct EventStore {
    persistence: Arc<dyn Persistence>,
    serializers: Arc<Serializers>,
    telemetry: Arc<dyn Telemetry>,
    services: Arc<AggregateServices>,
    warn_on_stream_length: u32,
    error_on_stream_length: u32,
}

impl EventStore {
    pub fn new(
        persistence: Arc<dyn Persistence>,
        serializers: Serializers,
        telemetry: Arc<dyn Telemetry>,
        config: &EventStoreConfig,
    ) -> Self {
        let services = Arc::new(AggregateServices::new(
            Arc::new(EventFactory::new()),
            config.error_on_stream_length,
        ));

        Self {
            persistence,
            serializers: Arc::new(serializers),
            telemetry,
            services,
            warn_on_stream_length: config.warn_on_stream_length,
            error_on_stream_length: config.error_on_stream_length,
        }
    }

    pub fn services(&self) -> &Arc<AggregateServices> {
        &self.services
    }

    pub fn serializers(&self) -> &Serializers {
        &self.serializers
    }

    /// Fresh aggregate root wired to this store's dispatch caches.
    pub fn aggregate<A: Aggregate>(&self, stream_id: impl Into<String>) -> Result<AggregateRoot<A>> {
        AggregateRoot::new(stream_id, self.services.clone())
    }

    /// Session whose writes are durable as soon as they succeed.
    pub fn open_session(&self) -> EventStoreSession {
        self.session(None)
    }

    /// Session whose writes wait for `transaction` to complete.
    pub fn open_session_in(&self, transaction: &Transaction) -> EventStoreSession {
        self.session(Some(transaction.clone()))
    }

    fn session(&self, transaction: Option<Transaction>) -> EventStoreSession {
        EventStoreSession {
            persistence: self.persistence.clone(),
            serializers: self.serializers.clone(),
            telemetry: self.telemetry.clone(),
            warn_on_stream_length: self.warn_on_stream_length,
            error_on_stream_length: self.error_on_stream_length,
            transaction,
            backend: None,
            correlation_id: Uuid::new_v4().to_string(),
        }
    }
}

// ============================================================================
// Event Store Session - one unit of work
// ============================================================================
//
// The backend session is opened on first use and released when the session
// is closed or dropped. Every public operation is timed and reported to
// telemetry under the session's correlation id.
//
// ============================================================================

pub struct EventStoreSession {
    persistence: Arc<dyn Persistence>,
    serializers: Arc<Serializers>,
    telemetry: Arc<dyn Telemetry>,
    warn_on_stream_length: u32,
    error_on_stream_length: u32,
    transaction: Option<Transaction>,
    backend: Option<Box<dyn PersistenceSession>>,
    correlation_id: String,
}

impl EventStoreSession {
    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn transaction(&self) -> Option<&Transaction> {
        self.transaction.as_ref()
    }

    pub fn is_open(&self) -> bool {
        self.backend.is_some()
    }

    /// Releases the backend session early. Dropping the session does the same.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            tracing::trace!(correlation_id = %self.correlation_id, "Backend session released");
        }
    }

    /// Raw events of the aggregate's stream, decoded with each commit's codec.
    pub async fn load_events<A: Aggregate>(&mut self, aggregate: &AggregateRoot<A>) -> Result<EventsLoad> {
        self.load_stream(aggregate.stream_id()).await
    }

    pub async fn load_stream(&mut self, stream_id: &str) -> Result<EventsLoad> {
        let started = Instant::now();
        let result = self.load_inner(stream_id).await;
        self.report(Operation::Load, started.elapsed(), stream_id, &result);
        result
    }

    /// Replays the stream onto `aggregate`. `false` when there was nothing to
    /// replay; the aggregate is left untouched then.
    pub async fn hydrate<A: Aggregate>(&mut self, aggregate: &mut AggregateRoot<A>) -> Result<bool> {
        let started = Instant::now();
        let result = self.hydrate_inner(aggregate).await;
        self.report(Operation::Hydrate, started.elapsed(), aggregate.stream_id(), &result);
        result
    }

    /// Writes all pending events of `aggregate` as one commit stamped with
    /// its current version. Version conflicts are returned, never retried.
    pub async fn save_uncommitted_events<A: Aggregate>(&mut self, aggregate: &mut AggregateRoot<A>) -> Result<bool> {
        let started = Instant::now();
        let result = self.save_inner(aggregate).await;
        self.report(Operation::Save, started.elapsed(), aggregate.stream_id(), &result);
        result
    }

    /// Deletes the stream and resets the aggregate to version 0.
    pub async fn delete_stream<A: Aggregate>(&mut self, aggregate: &mut AggregateRoot<A>) -> Result<bool> {
        let deleted = self.delete_stream_by_id(aggregate.stream_id()).await?;
        if deleted {
            aggregate.mark_deleted();
        }
        Ok(deleted)
    }

    pub async fn delete_stream_by_id(&mut self, stream_id: &str) -> Result<bool> {
        let started = Instant::now();
        let result = self.delete_inner(stream_id).await;
        self.report(Operation::Delete, started.elapsed(), stream_id, &result);
        result
    }

    async fn load_inner(&mut self, stream_id: &str) -> Result<EventsLoad> {
        expect_not_empty(stream_id, "stream_id")?;

        let load = self.backend().load_commits(stream_id).await?;
        self.track(Metric::CommitsPerLoad, load.commits.len(), stream_id);
        self.track(Metric::BytesPerLoad, load.payload_bytes(), stream_id);

        if load.is_empty() {
            self.track(Metric::EmptyStream, 1, stream_id);
            return Ok(EventsLoad::default());
        }

        self.check_stream_length(stream_id, load.commits.len());

        let started = Instant::now();
        let mut events: Vec<EventRecord> = Vec::with_capacity(load.commits.len() * 2);
        for commit in &load.commits {
            events.extend(self.serializers.deserialize(commit)?);
        }
        self.track(Metric::DeserializeTime, started.elapsed().as_micros() as usize, stream_id);

        tracing::debug!(
            stream_id = %stream_id,
            commits = load.commits.len(),
            events = events.len(),
            version = load.version,
            "Loaded event stream"
        );
        Ok(EventsLoad::new(events, load.version))
    }

    async fn hydrate_inner<A: Aggregate>(&mut self, aggregate: &mut AggregateRoot<A>) -> Result<bool> {
        let load = self.load_events(aggregate).await?;
        if load.events.is_empty() {
            return Ok(false);
        }

        let skipped = aggregate.hydrate(&load)?;
        if skipped > 0 {
            self.telemetry.log(
                LogSeverity::Warning,
                &format!(
                    "{skipped} of {} events have no handler on {} and were ignored",
                    load.events.len(),
                    type_name::<A>()
                ),
                &self.correlation_id,
                aggregate.stream_id(),
            );
        }
        Ok(true)
    }

    async fn save_inner<A: Aggregate>(&mut self, aggregate: &mut AggregateRoot<A>) -> Result<bool> {
        if !aggregate.has_uncommitted_events() {
            return Ok(true);
        }

        let stream_id = aggregate.stream_id().to_string();
        let records = aggregate
            .uncommitted_events()
            .iter()
            .map(|event| event.to_record())
            .collect::<Result<Vec<_>>>()?;

        let started = Instant::now();
        let serialized = self.serializers.default_serializer().serialize(&records)?;
        self.track(Metric::SerializeTime, started.elapsed().as_micros() as usize, &stream_id);

        let commit = serialized.into_commit(stream_id.as_str(), aggregate.version());
        self.track(Metric::CommitSize, commit.payload.len(), &stream_id);
        let version = commit.version;

        match self.backend().save(commit).await {
            Ok(saved) => {
                if saved {
                    aggregate.mark_committed();
                    tracing::debug!(
                        stream_id = %stream_id,
                        version,
                        events = records.len(),
                        deferred = self.transaction.is_some(),
                        "Saved commit"
                    );
                }
                Ok(saved)
            }
            Err(e) => {
                if e.is_version_conflict() {
                    self.track(Metric::VersionConflict, 1, &stream_id);
                    tracing::debug!(stream_id = %stream_id, version, "Version conflict on save");
                }
                Err(e)
            }
        }
    }

    async fn delete_inner(&mut self, stream_id: &str) -> Result<bool> {
        expect_not_empty(stream_id, "stream_id")?;

        let deleted = self.backend().delete(stream_id).await?;
        tracing::debug!(stream_id = %stream_id, deleted, "Deleted event stream");
        Ok(deleted)
    }

    fn backend(&mut self) -> &mut Box<dyn PersistenceSession> {
        let correlation_id = &self.correlation_id;
        let persistence = &self.persistence;
        let transaction = &self.transaction;
        self.backend.get_or_insert_with(|| {
            tracing::trace!(correlation_id = %correlation_id, "Opening backend session");
            persistence.open_session(transaction.clone())
        })
    }

    /// Reported, never fatal. The hard limit is enforced when applying.
    fn check_stream_length(&self, stream_id: &str, commits: usize) {
        let (severity, limit) = match (self.error_on_stream_length, self.warn_on_stream_length) {
            (error, _) if error > 0 && commits >= error as usize => (LogSeverity::Error, error),
            (_, warn) if warn > 0 && commits >= warn as usize => (LogSeverity::Warning, warn),
            _ => return,
        };

        let message = format!("event stream '{stream_id}' is too long ({commits} commits >= {limit} limit)");
        match severity {
            LogSeverity::Error => tracing::error!(stream_id = %stream_id, commits, limit, "Event stream is too long"),
            _ => tracing::warn!(stream_id = %stream_id, commits, limit, "Event stream is getting long"),
        }

        self.telemetry.log(severity, &message, &self.correlation_id, stream_id);
        self.track(Metric::StreamTooLong, 1, stream_id);
    }

    fn track(&self, metric: Metric, value: usize, stream_id: &str) {
        let value = i64::try_from(value).unwrap_or(i64::MAX);
        self.telemetry.track(metric, value, &self.correlation_id, stream_id);
    }

    fn report<T>(&self, operation: Operation, elapsed: Duration, stream_id: &str, result: &Result<T>) {
        match result {
            Ok(_) => self
                .telemetry
                .track_success(operation, elapsed, &self.correlation_id, stream_id),
            Err(e) => {
                let stream_id = (!stream_id.is_empty()).then_some(stream_id);
                self.telemetry
                    .track_failure(operation, elapsed, e, &self.correlation_id, stream_id);
            }
        }
    }
}

impl Drop for EventStoreSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_sourcing::core::{DomainEvent, EventStoreError, HandlerTable};
    use crate::event_sourcing::store::InMemoryPersistence;
    use crate::telemetry::InMemoryTelemetry;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
    struct Added {
        value: i64,
    }

    impl DomainEvent for Added {
        const EVENT_TYPE: &'static str = "Added";
    }

    #[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
    struct Noted {
        text: String,
    }

    impl DomainEvent for Noted {
        const EVENT_TYPE: &'static str = "Noted";
    }

    #[derive(Debug, Default, PartialEq)]
    struct Counter {
        total: i64,
    }

    impl Aggregate for Counter {
        fn register_handlers(handlers: &mut HandlerTable<Self>) {
            handlers.on(|c: &mut Counter, e: &Added| c.total += e.value);
        }
    }

    struct Fixture {
        store: EventStore,
        persistence: InMemoryPersistence,
        telemetry: Arc<InMemoryTelemetry>,
    }

    fn fixture(config: EventStoreConfig) -> Fixture {
        let persistence = InMemoryPersistence::new();
        let telemetry = Arc::new(InMemoryTelemetry::new());
        let store = EventStore::new(
            Arc::new(persistence.clone()),
            config.serializers().unwrap(),
            telemetry.clone(),
            &config,
        );
        Fixture {
            store,
            persistence,
            telemetry,
        }
    }

    async fn save_added(store: &EventStore, stream_id: &str, values: &[i64]) -> AggregateRoot<Counter> {
        let mut counter = store.aggregate::<Counter>(stream_id).unwrap();
        for value in values {
            counter.apply::<Added, _>(|e| e.value = *value).unwrap();
        }
        store.open_session().save_uncommitted_events(&mut counter).await.unwrap();
        counter
    }

    #[tokio::test]
    async fn test_session_opens_backend_lazily() {
        let f = fixture(EventStoreConfig::default());
        let mut session = f.store.open_session();
        assert!(!session.is_open());

        session.load_stream("counter-1").await.unwrap();
        assert!(session.is_open());

        session.close();
        assert!(!session.is_open());
    }

    #[tokio::test]
    async fn test_save_and_hydrate() {
        let f = fixture(EventStoreConfig::default());
        let saved = save_added(&f.store, "counter-1", &[1, 2, 3]).await;
        assert!(!saved.has_uncommitted_events());
        assert_eq!(f.persistence.commit_count("counter-1").await, 1);

        let mut fresh = f.store.aggregate::<Counter>("counter-1").unwrap();
        assert!(f.store.open_session().hydrate(&mut fresh).await.unwrap());
        assert_eq!(fresh.version(), 3);
        assert_eq!(fresh.data(), saved.data());
    }

    #[tokio::test]
    async fn test_save_without_pending_events_is_noop() {
        let f = fixture(EventStoreConfig::default());
        let mut counter = f.store.aggregate::<Counter>("counter-1").unwrap();

        assert!(f.store.open_session().save_uncommitted_events(&mut counter).await.unwrap());
        assert!(f.persistence.stream_ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_hydrate_missing_stream_returns_false() {
        let f = fixture(EventStoreConfig::default());
        let mut counter = f.store.aggregate::<Counter>("nobody").unwrap();

        assert!(!f.store.open_session().hydrate(&mut counter).await.unwrap());
        assert_eq!(counter.version(), 0);

        let stream = f.telemetry.stream("nobody").unwrap();
        assert_eq!(stream.metric_values(Metric::EmptyStream), vec![1]);
    }

    #[tokio::test]
    async fn test_version_conflict_is_tracked_and_returned() {
        let f = fixture(EventStoreConfig::default());
        save_added(&f.store, "counter-1", &[1]).await;

        let mut stale = f.store.aggregate::<Counter>("counter-1").unwrap();
        stale.apply::<Added, _>(|e| e.value = 5).unwrap();
        let err = f
            .store
            .open_session()
            .save_uncommitted_events(&mut stale)
            .await
            .unwrap_err();

        assert!(matches!(err, EventStoreError::VersionConflict { version: 1, .. }));
        assert!(stale.has_uncommitted_events());

        let stream = f.telemetry.stream("counter-1").unwrap();
        assert_eq!(stream.metric_values(Metric::VersionConflict), vec![1]);
        assert!(stream
            .operations
            .iter()
            .any(|o| o.operation == Operation::Save && !o.success));
    }

    #[tokio::test]
    async fn test_packed_codec_round_trip_through_store() {
        let config = EventStoreConfig {
            default_serializer: "json.packed".into(),
            ..EventStoreConfig::default()
        };
        let f = fixture(config);
        let saved = save_added(&f.store, "counter-1", &[4, 5]).await;

        let mut fresh = f.store.aggregate::<Counter>("counter-1").unwrap();
        f.store.open_session().hydrate(&mut fresh).await.unwrap();
        assert_eq!(fresh.data(), saved.data());
    }

    #[tokio::test]
    async fn test_stream_length_is_reported() {
        let config = EventStoreConfig {
            warn_on_stream_length: 2,
            error_on_stream_length: 3,
            ..EventStoreConfig::default()
        };
        let f = fixture(config);

        let mut counter = f.store.aggregate::<Counter>("long").unwrap();
        for _ in 0..3 {
            counter.apply::<Added, _>(|e| e.value = 1).unwrap();
            f.store
                .open_session()
                .save_uncommitted_events(&mut counter)
                .await
                .unwrap();
            f.store.open_session().load_stream("long").await.unwrap();
        }

        let stream = f.telemetry.stream("long").unwrap();
        assert_eq!(stream.logs_at(LogSeverity::Warning).len(), 1);
        assert_eq!(stream.logs_at(LogSeverity::Error).len(), 1);
        assert_eq!(stream.metric_values(Metric::StreamTooLong), vec![1, 1]);
    }

    #[tokio::test]
    async fn test_unhandled_events_are_logged_on_hydrate() {
        let f = fixture(EventStoreConfig::default());
        let mut counter = f.store.aggregate::<Counter>("counter-1").unwrap();
        counter.apply::<Added, _>(|e| e.value = 2).unwrap();
        counter.apply::<Noted, _>(|e| e.text = "hi".into()).unwrap();
        f.store.open_session().save_uncommitted_events(&mut counter).await.unwrap();

        let mut fresh = f.store.aggregate::<Counter>("counter-1").unwrap();
        f.store.open_session().hydrate(&mut fresh).await.unwrap();

        assert_eq!(fresh.data().total, 2);
        assert_eq!(fresh.version(), 2);
        let stream = f.telemetry.stream("counter-1").unwrap();
        assert_eq!(stream.logs_at(LogSeverity::Warning).len(), 1);
    }

    #[tokio::test]
    async fn test_delete_stream_resets_aggregate() {
        let f = fixture(EventStoreConfig::default());
        let mut counter = save_added(&f.store, "counter-1", &[1, 2]).await;

        let mut session = f.store.open_session();
        assert!(session.delete_stream(&mut counter).await.unwrap());
        assert_eq!(counter.version(), 0);
        assert!(!session.delete_stream_by_id("counter-1").await.unwrap());
        assert!(session.load_stream("counter-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_operations_carry_correlation_id() {
        let f = fixture(EventStoreConfig::default());
        let mut session = f.store.open_session().with_correlation_id("req-42");
        session.load_stream("counter-1").await.unwrap();

        let result = session.delete_stream_by_id("").await;
        assert!(matches!(result, Err(EventStoreError::InvalidArgument { .. })));

        let stream = f.telemetry.stream("counter-1").unwrap();
        assert_eq!(stream.operations[0].correlation_id, "req-42");

        let failures = f.telemetry.failures_without_stream_id();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].operation, Operation::Delete);
    }

    #[tokio::test]
    async fn test_session_in_transaction_defers_save() {
        let f = fixture(EventStoreConfig::default());
        let tx = Transaction::new();

        let mut counter = f.store.aggregate::<Counter>("counter-1").unwrap();
        counter.apply::<Added, _>(|e| e.value = 1).unwrap();
        {
            let mut session = f.store.open_session_in(&tx);
            assert!(session.transaction().is_some());
            session.save_uncommitted_events(&mut counter).await.unwrap();
        }
        assert_eq!(f.persistence.commit_count("counter-1").await, 0);

        tx.complete().await.unwrap();
        assert_eq!(f.persistence.commit_count("counter-1").await, 1);
    }
}
