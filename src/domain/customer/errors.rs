use uuid::Uuid;

use crate::event_sourcing::EventStoreError;

// ============================================================================
// Customer Business Rule Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum CustomerError {
    #[error("Customer is already set up")]
    AlreadyInitialized,

    #[error("Customer has not been set up yet")]
    NotInitialized,

    #[error("Customer account is terminated")]
    Terminated,

    #[error("Email cannot be empty")]
    EmptyEmail,

    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Preferred language cannot be empty")]
    EmptyLanguage,

    #[error("Shopping cart is empty")]
    EmptyShoppingCart,

    #[error("Invalid quantity for {sku}: {quantity}")]
    InvalidQuantity { sku: String, quantity: u32 },

    #[error("Order already exists: {0}")]
    DuplicateOrder(Uuid),

    #[error("Order not found: {0}")]
    OrderNotFound(Uuid),

    #[error("Order {0} was already delivered")]
    AlreadyDelivered(Uuid),

    #[error("Delivery agent cannot be empty")]
    EmptyAgent,

    #[error(transparent)]
    Store(#[from] EventStoreError),
}
