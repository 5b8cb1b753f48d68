// ============================================================================
// Customer Domain - reference aggregate on top of the event sourcing kernel
// ============================================================================
//
// - Value objects (Address, ShoppingCart, Order, ...)
// - Events (CustomerInitialized, OrderPlaced, ...)
// - Commands (CustomerCommand)
// - Errors (CustomerError)
// - Aggregate (Customer snapshot plus business rules on its root)
// - Command Handler (CustomerCommandHandler)
//
// Nothing in the kernel depends on this module.
//
// ============================================================================

pub mod value_objects;
pub mod events;
pub mod commands;
pub mod errors;
pub mod aggregate;
pub mod command_handler;

// Re-export for convenience
pub use value_objects::*;
pub use events::*;
pub use commands::*;
pub use errors::*;
pub use aggregate::*;
pub use command_handler::*;
