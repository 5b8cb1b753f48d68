use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::value_objects::{Address, ShoppingCart, TerminateReason};
use crate::event_sourcing::core::DomainEvent;

// ============================================================================
// Customer Domain Events
// ============================================================================
//
// The `EVENT_TYPE` strings are persisted with every commit. Renaming a struct
// is fine; changing its event type orphans existing streams.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CustomerInitialized {
    pub email: String,
    pub preferred_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    pub date: DateTime<Utc>,
}

impl DomainEvent for CustomerInitialized {
    const EVENT_TYPE: &'static str = "CustomerInitialized";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub shopping_cart: ShoppingCart,
    pub shipping_address: Address,
}

impl DomainEvent for OrderPlaced {
    const EVENT_TYPE: &'static str = "OrderPlaced";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShippingAddressChanged {
    pub order_id: Uuid,
    pub new_shipping_address: Address,
}

impl DomainEvent for ShippingAddressChanged {
    const EVENT_TYPE: &'static str = "ShippingAddressChanged";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfirmed {
    pub order_id: Uuid,
    pub date: DateTime<Utc>,
    pub agent: String,
}

impl DomainEvent for DeliveryConfirmed {
    const EVENT_TYPE: &'static str = "DeliveryConfirmed";
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountTerminated {
    pub reason: TerminateReason,
}

impl DomainEvent for AccountTerminated {
    const EVENT_TYPE: &'static str = "AccountTerminated";
}
