// ============================================================================
// Event Sourcing Store - Generic Persistence Layer
// ============================================================================
//
// Backend abstraction, the in-memory reference backend, explicit
// transactions, and the session orchestrator that ties aggregates, codecs
// and backends together.
//
// ============================================================================

pub mod event_store;
pub mod in_memory;
pub mod persistence;
pub mod transaction;

pub use event_store::{EventStore, EventStoreSession};
pub use in_memory::{InMemoryPersistence, InMemorySession};
pub use persistence::{Persistence, PersistenceSession};
pub use transaction::{Enlistment, Transaction, TransactionStatus};
