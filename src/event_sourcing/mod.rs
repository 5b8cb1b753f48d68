// ============================================================================
// Event Sourcing Infrastructure
// ============================================================================
//
// Generic, reusable event sourcing infrastructure.
// Domain-specific code is in src/domain/
//
// ============================================================================

// Core abstractions (GENERIC - works with any aggregate)
pub mod core;
pub mod serialization;
pub mod store;

// Re-export core infrastructure
pub use self::core::*;
pub use serialization::*;
pub use store::*;
