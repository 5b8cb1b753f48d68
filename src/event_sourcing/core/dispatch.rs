use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::aggregate::Aggregate;
use super::error::{EventStoreError, Result};
use super::event::{AnyEvent, DomainEvent, EventRecord};
use super::payload_layout::is_valid_type_id;

// ============================================================================
// Event Dispatch
// ============================================================================
//
// Two caches, both owned by whoever builds the AggregateServices:
//
// - EventFactory: event struct <-> stable event type, filled on first use.
// - HandlerRegistry: (aggregate type, event type) -> replay handler, built
//   from each aggregate's registration table.
//
// Writers take the write lock and re-check, so concurrent first use of the
// same type has exactly one winner.
//
// ============================================================================

/// What the factory knows about one event struct.
#[derive(Clone, Copy)]
pub struct EventDescriptor {
    pub event_type: &'static str,
    pub type_name: &'static str,
    type_id: TypeId,
    decode: fn(&EventRecord) -> Result<Box<dyn AnyEvent>>,
}

impl std::fmt::Debug for EventDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDescriptor")
            .field("event_type", &self.event_type)
            .field("type_name", &self.type_name)
            .finish()
    }
}

impl PartialEq for EventDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.event_type == other.event_type
    }
}

fn decode_as<E: DomainEvent>(record: &EventRecord) -> Result<Box<dyn AnyEvent>> {
    Ok(Box::new(record.decode::<E>()?))
}

#[derive(Default)]
struct DescriptorCache {
    by_type: HashMap<TypeId, EventDescriptor>,
    by_event_type: HashMap<&'static str, EventDescriptor>,
}

#[derive(Default)]
pub struct EventFactory {
    cache: RwLock<DescriptorCache>,
}

impl EventFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `E` (once) and returns its descriptor.
    pub fn register<E: DomainEvent>(&self) -> Result<EventDescriptor> {
        let type_id = TypeId::of::<E>();
        if let Some(descriptor) = read(&self.cache).by_type.get(&type_id) {
            return Ok(*descriptor);
        }

        let mut cache = write(&self.cache);
        if let Some(descriptor) = cache.by_type.get(&type_id) {
            return Ok(*descriptor);
        }

        let event_type = E::EVENT_TYPE;
        if event_type.is_empty() || !is_valid_type_id(event_type) {
            return Err(EventStoreError::Dispatch(format!(
                "event type '{event_type}' of {} must be non-empty ASCII without the 0x10 delimiter",
                type_name::<E>()
            )));
        }

        if let Some(existing) = cache.by_event_type.get(event_type) {
            return Err(EventStoreError::Dispatch(format!(
                "event type '{event_type}' of {} is already registered for {}",
                type_name::<E>(),
                existing.type_name
            )));
        }

        let descriptor = EventDescriptor {
            event_type,
            type_name: type_name::<E>(),
            type_id,
            decode: decode_as::<E>,
        };
        cache.by_type.insert(type_id, descriptor);
        cache.by_event_type.insert(event_type, descriptor);

        tracing::debug!(event_type, type_name = descriptor.type_name, "Registered event type");
        Ok(descriptor)
    }

    /// Blank instance of `E`, ready to be filled in.
    pub fn materialize<E: DomainEvent>(&self) -> Result<E> {
        self.register::<E>()?;
        Ok(E::default())
    }

    /// Materializes `E` and runs `setup` over it.
    pub fn apply<E, F>(&self, setup: F) -> Result<E>
    where
        E: DomainEvent,
        F: FnOnce(&mut E),
    {
        let mut event = self.materialize::<E>()?;
        setup(&mut event);
        Ok(event)
    }

    /// Inverse lookup: Rust type name -> stable descriptor.
    pub fn resolve_original(&self, type_name: &str) -> Option<EventDescriptor> {
        read(&self.cache)
            .by_type
            .values()
            .find(|d| d.type_name == type_name)
            .copied()
    }

    pub fn descriptor(&self, event_type: &str) -> Option<EventDescriptor> {
        read(&self.cache).by_event_type.get(event_type).copied()
    }

    /// Turns a persisted record back into the struct registered for its type.
    pub fn materialize_record(&self, record: &EventRecord) -> Result<Box<dyn AnyEvent>> {
        let descriptor = self.descriptor(&record.event_type).ok_or_else(|| {
            EventStoreError::Dispatch(format!("event type '{}' is not registered", record.event_type))
        })?;
        (descriptor.decode)(record)
    }

    pub fn known_events(&self) -> Vec<&'static str> {
        let mut known: Vec<_> = read(&self.cache).by_event_type.keys().copied().collect();
        known.sort_unstable();
        known
    }
}

// ============================================================================
// Handler Table - explicit registration per aggregate type
// ============================================================================

pub type Handler<A> = Arc<dyn Fn(&mut A, &dyn Any) + Send + Sync>;

struct HandlerEntry<A> {
    apply: Handler<A>,
    register: fn(&EventFactory) -> Result<EventDescriptor>,
}

pub struct HandlerTable<A> {
    entries: HashMap<&'static str, HandlerEntry<A>>,
}

impl<A: 'static> HandlerTable<A> {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Routes events of type `E` to `handler` during apply and replay.
    pub fn on<E, F>(&mut self, handler: F) -> &mut Self
    where
        E: DomainEvent,
        F: Fn(&mut A, &E) + Send + Sync + 'static,
    {
        let apply: Handler<A> = Arc::new(move |aggregate: &mut A, event: &dyn Any| {
            if let Some(event) = event.downcast_ref::<E>() {
                handler(aggregate, event);
            }
        });

        let replaced = self.entries.insert(
            E::EVENT_TYPE,
            HandlerEntry {
                apply,
                register: EventFactory::register::<E>,
            },
        );
        if replaced.is_some() {
            tracing::warn!(
                aggregate = type_name::<A>(),
                event_type = E::EVENT_TYPE,
                "Handler registered twice; the later one wins"
            );
        }
        self
    }

    pub fn handles(&self, event_type: &str) -> bool {
        self.entries.contains_key(event_type)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A cached handler binding. `Void` is what unknown or obsolete event types
/// get: replay goes on, the event is dropped.
pub enum ResolvedHandler<A> {
    Bound(Handler<A>),
    Void,
}

impl<A> ResolvedHandler<A> {
    pub fn invoke(&self, aggregate: &mut A, event: &dyn Any) {
        if let Self::Bound(handler) = self {
            handler(aggregate, event);
        }
    }

    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }
}

type Erased = Arc<dyn Any + Send + Sync>;

pub struct HandlerRegistry {
    factory: Arc<EventFactory>,
    tables: RwLock<HashMap<TypeId, Erased>>,
    resolved: RwLock<HashMap<(TypeId, String), Erased>>,
}

impl HandlerRegistry {
    pub fn new(factory: Arc<EventFactory>) -> Self {
        Self {
            factory,
            tables: RwLock::new(HashMap::new()),
            resolved: RwLock::new(HashMap::new()),
        }
    }

    pub fn factory(&self) -> &Arc<EventFactory> {
        &self.factory
    }

    /// Finds the replay handler of `A` for `event_type`, caching the binding.
    pub fn resolve<A: Aggregate>(&self, event_type: &str) -> Result<Arc<ResolvedHandler<A>>> {
        let key = (TypeId::of::<A>(), event_type.to_string());
        if let Some(cached) = read(&self.resolved).get(&key) {
            return downcast(cached.clone());
        }

        let table = self.table::<A>()?;
        let resolved = match table.entries.get(event_type) {
            Some(entry) => ResolvedHandler::Bound(entry.apply.clone()),
            None => {
                tracing::warn!(
                    aggregate = type_name::<A>(),
                    event_type,
                    "No handler registered; event will not affect aggregate data"
                );
                ResolvedHandler::Void
            }
        };

        let erased: Erased = Arc::new(resolved);
        let winner = write(&self.resolved).entry(key).or_insert(erased).clone();
        downcast(winner)
    }

    /// Builds (once) the registration table of `A` and registers every event
    /// type it handles with the factory.
    pub fn table<A: Aggregate>(&self) -> Result<Arc<HandlerTable<A>>> {
        let type_id = TypeId::of::<A>();
        if let Some(table) = read(&self.tables).get(&type_id) {
            return downcast(table.clone());
        }

        let mut table = HandlerTable::new();
        A::register_handlers(&mut table);
        for entry in table.entries.values() {
            (entry.register)(&self.factory)?;
        }

        tracing::debug!(
            aggregate = type_name::<A>(),
            handlers = table.len(),
            "Built handler table"
        );

        let erased: Erased = Arc::new(table);
        let winner = write(&self.tables).entry(type_id).or_insert(erased).clone();
        downcast(winner)
    }
}

fn downcast<T: Any + Send + Sync>(erased: Erased) -> Result<Arc<T>> {
    erased
        .downcast::<T>()
        .map_err(|_| EventStoreError::Backend(format!("handler cache holds wrong type for {}", type_name::<T>())))
}

// Cache entries are inserted whole, so a poisoned lock still guards
// consistent data.
fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}
