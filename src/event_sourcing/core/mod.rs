// ============================================================================
// Event Sourcing Core - Generic Infrastructure Abstractions
// ============================================================================
//
// Commits and their binary layout, event dispatch and the aggregate replay
// state machine. Nothing here knows about a concrete domain or backend.
//
// ============================================================================

pub mod aggregate;
pub mod commit;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod payload_layout;

// Re-export core types for convenience
pub use aggregate::{Aggregate, AggregateRoot, AggregateServices, AggregateState};
pub use commit::{Commit, CommitsLoad, MAX_PAYLOAD_SIZE, MAX_SERIALIZER_ID_LEN, MAX_STREAM_ID_LEN};
pub use dispatch::{EventDescriptor, EventFactory, HandlerRegistry, HandlerTable, ResolvedHandler};
pub use error::{EventStoreError, Result};
pub use event::{deserialize_event, AnyEvent, DomainEvent, EventRecord, EventsLoad};
pub use payload_layout::{LayoutEntry, PayloadLayout};
