use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Customer Value Objects
// ============================================================================

/// Postal address an order ships to
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub zip_code: String,
    pub street: String,
    pub city: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    pub country: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingCartItem {
    pub sku: String,
    pub quantity: u32,
}

impl ShoppingCartItem {
    pub fn new(sku: impl Into<String>, quantity: u32) -> Self {
        Self {
            sku: sku.into(),
            quantity,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingCart {
    pub items: Vec<ShoppingCartItem>,
    pub currency: String,
}

impl ShoppingCart {
    pub fn new(currency: impl Into<String>, items: Vec<ShoppingCartItem>) -> Self {
        Self {
            items,
            currency: currency.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// One ordered product, copied from the cart when the order is placed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
}

impl From<&ShoppingCartItem> for OrderLine {
    fn from(item: &ShoppingCartItem) -> Self {
        Self {
            sku: item.sku.clone(),
            quantity: item.quantity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub delivered: DateTime<Utc>,
    pub agent: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub created: DateTime<Utc>,
    pub currency: String,
    pub lines: Vec<OrderLine>,
    pub shipping_address: Address,
    pub delivery_receipt: Option<DeliveryReceipt>,
}

impl Order {
    pub fn is_delivered(&self) -> bool {
        self.delivery_receipt.is_some()
    }
}

/// Why an account was closed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminateReason {
    #[default]
    None,
    RequestedByCustomer,
    AutomaticDueInactivity,
}
