use std::any::type_name;
use std::sync::Arc;

use super::dispatch::{EventFactory, HandlerRegistry, HandlerTable, ResolvedHandler};
use super::error::{expect_not_empty, EventStoreError, Result};
use super::event::{AnyEvent, DomainEvent, EventsLoad};

// ============================================================================
// Aggregate Root Pattern - Event Sourcing Core
// ============================================================================
//
// Key Principles:
// 1. Data is derived from events (not stored directly)
// 2. Every change goes through `apply`, which runs the replay handler at once
// 3. Hydration replays persisted events; the persisted version wins
// 4. Pending events stay until a save succeeds
//
// Lifecycle: Fresh -> Dirty -> Committed -> Dirty ...
// Deleting the stream resets the version to 0 and history starts over.
//
// ============================================================================

/// Data snapshot of an event-sourced aggregate.
///
/// Implementors list the events they react to; anything not registered is
/// replayed through a no-op handler.
pub trait Aggregate: Default + Send + Sync + 'static {
    fn register_handlers(handlers: &mut HandlerTable<Self>);
}

/// Shared collaborators every aggregate root needs, built once and passed in.
pub struct AggregateServices {
    events: Arc<EventFactory>,
    handlers: Arc<HandlerRegistry>,
    error_on_stream_length: u32,
}

impl AggregateServices {
    /// `error_on_stream_length` of 0 means unlimited.
    pub fn new(events: Arc<EventFactory>, error_on_stream_length: u32) -> Self {
        let handlers = Arc::new(HandlerRegistry::new(events.clone()));
        Self {
            events,
            handlers,
            error_on_stream_length,
        }
    }

    pub fn events(&self) -> &Arc<EventFactory> {
        &self.events
    }

    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    pub fn error_on_stream_length(&self) -> u32 {
        self.error_on_stream_length
    }
}

impl Default for AggregateServices {
    fn default() -> Self {
        Self::new(Arc::new(EventFactory::new()), 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateState {
    Fresh,
    Dirty,
    Committed,
}

pub struct AggregateRoot<A: Aggregate> {
    stream_id: String,
    version: u32,
    data: A,
    pending: Vec<Box<dyn AnyEvent>>,
    services: Arc<AggregateServices>,
}

impl<A: Aggregate> AggregateRoot<A> {
    pub fn new(stream_id: impl Into<String>, services: Arc<AggregateServices>) -> Result<Self> {
        let stream_id = stream_id.into();
        expect_not_empty(&stream_id, "stream_id")?;

        Ok(Self {
            stream_id,
            version: 0,
            data: A::default(),
            pending: Vec::new(),
            services,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Number of events ever applied to this stream.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn data(&self) -> &A {
        &self.data
    }

    pub fn services(&self) -> &Arc<AggregateServices> {
        &self.services
    }

    pub fn state(&self) -> AggregateState {
        if !self.pending.is_empty() {
            AggregateState::Dirty
        } else if self.version == 0 {
            AggregateState::Fresh
        } else {
            AggregateState::Committed
        }
    }

    pub fn has_uncommitted_events(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn uncommitted_events(&self) -> &[Box<dyn AnyEvent>] {
        &self.pending
    }

    /// Builds an `E`, fills it with `setup`, runs its handler on the data and
    /// records it as pending.
    pub fn apply<E, F>(&mut self, setup: F) -> Result<()>
    where
        E: DomainEvent,
        F: FnOnce(&mut E),
    {
        let limit = self.services.error_on_stream_length;
        if limit > 0 && self.version >= limit {
            return Err(EventStoreError::StreamTooLong {
                stream_id: self.stream_id.clone(),
                version: self.version,
                limit,
                event_type: E::EVENT_TYPE.to_string(),
            });
        }

        let event: E = self.services.events.apply(setup)?;
        let handler = self.services.handlers.resolve::<A>(E::EVENT_TYPE)?;
        handler.invoke(&mut self.data, &event);

        self.version += 1;
        self.pending.push(Box::new(event));
        Ok(())
    }

    /// Replays `load` onto a clean instance and adopts its version.
    ///
    /// Returns how many events had no handler and were skipped. Every record
    /// is decoded before the data is touched, so a decoding failure leaves
    /// the aggregate as it was.
    pub fn hydrate(&mut self, load: &EventsLoad) -> Result<usize> {
        if self.has_uncommitted_events() {
            return Err(EventStoreError::InvalidOperation(format!(
                "cannot hydrate {} while it has {} uncommitted events",
                self.stream_id,
                self.pending.len()
            )));
        }

        let mut replay: Vec<(Arc<ResolvedHandler<A>>, Box<dyn AnyEvent>)> =
            Vec::with_capacity(load.events.len());
        let mut skipped = 0;

        for record in &load.events {
            let handler = self.services.handlers.resolve::<A>(&record.event_type)?;
            if handler.is_void() {
                skipped += 1;
                continue;
            }
            let event = self.services.events.materialize_record(record)?;
            replay.push((handler, event));
        }

        for (handler, event) in &replay {
            handler.invoke(&mut self.data, event.as_any());
        }
        self.version = load.version;

        tracing::trace!(
            stream_id = %self.stream_id,
            aggregate = type_name::<A>(),
            replayed = replay.len(),
            skipped,
            version = self.version,
            "Hydrated aggregate"
        );
        Ok(skipped)
    }

    /// Pending events are durable now.
    pub fn mark_committed(&mut self) {
        self.pending.clear();
    }

    /// The stream is gone; history starts over from version 0.
    pub fn mark_deleted(&mut self) {
        self.pending.clear();
        self.version = 0;
    }
}

impl<A: Aggregate + std::fmt::Debug> std::fmt::Debug for AggregateRoot<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AggregateRoot")
            .field("stream_id", &self.stream_id)
            .field("version", &self.version)
            .field("data", &self.data)
            .field("pending", &self.pending)
            .finish()
    }
}
