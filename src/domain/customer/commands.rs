use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::value_objects::{Address, ShoppingCart, TerminateReason};

// ============================================================================
// Customer Domain Commands
// ============================================================================

#[derive(Debug, Clone)]
pub enum CustomerCommand {
    SetUpNewCustomer {
        email: String,
        preferred_language: String,
        age: Option<u32>,
    },
    PlaceOrder {
        order_id: Uuid,
        date: DateTime<Utc>,
        shopping_cart: ShoppingCart,
        shipping_address: Address,
    },
    ChangeShippingAddress {
        order_id: Uuid,
        new_shipping_address: Address,
    },
    ConfirmDelivery {
        order_id: Uuid,
        agent: String,
        date: DateTime<Utc>,
    },
    TerminateAccount {
        reason: TerminateReason,
    },
}

impl CustomerCommand {
    /// Only set-up is allowed on a stream with no history.
    pub fn creates_stream(&self) -> bool {
        matches!(self, Self::SetUpNewCustomer { .. })
    }
}
