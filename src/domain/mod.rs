// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// Domain aggregates built on the event sourcing kernel. Each aggregate has
// its own subdirectory with:
// - Value objects
// - Events
// - Commands
// - Errors
// - Aggregate implementation
// - Command handler
//
// ============================================================================

pub mod customer;
