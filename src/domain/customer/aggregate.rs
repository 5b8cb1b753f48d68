use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::CustomerCommand;
use super::errors::CustomerError;
use super::events::*;
use super::value_objects::{Address, DeliveryReceipt, Order, OrderLine, ShoppingCart, TerminateReason};
use crate::event_sourcing::core::{Aggregate, AggregateRoot, HandlerTable};

// ============================================================================
// Customer Aggregate - Business Logic
// ============================================================================
//
// `Customer` is the data snapshot; it only changes through the handlers
// registered below. Business rules live on `AggregateRoot<Customer>`: each
// method validates against the current snapshot and then applies exactly one
// event.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub email: String,
    pub created: Option<DateTime<Utc>>,
    pub preferred_language: String,
    pub age: Option<u32>,
    pub orders: Vec<Order>,
    pub is_terminated: bool,
    pub terminate_reason: TerminateReason,
}

impl Customer {
    pub fn is_initialized(&self) -> bool {
        self.created.is_some()
    }

    pub fn order(&self, order_id: Uuid) -> Option<&Order> {
        self.orders.iter().find(|o| o.id == order_id)
    }

    /// Orders still waiting for a delivery receipt
    pub fn open_orders(&self) -> impl Iterator<Item = &Order> {
        self.orders.iter().filter(|o| !o.is_delivered())
    }

    fn order_mut(&mut self, order_id: Uuid) -> Option<&mut Order> {
        self.orders.iter_mut().find(|o| o.id == order_id)
    }

    fn on_initialized(&mut self, event: &CustomerInitialized) {
        self.email = event.email.clone();
        self.preferred_language = event.preferred_language.clone();
        self.age = event.age;
        self.created = Some(event.date);
    }

    fn on_order_placed(&mut self, event: &OrderPlaced) {
        self.orders.push(Order {
            id: event.id,
            created: event.date,
            currency: event.shopping_cart.currency.clone(),
            lines: event.shopping_cart.items.iter().map(OrderLine::from).collect(),
            shipping_address: event.shipping_address.clone(),
            delivery_receipt: None,
        });
    }

    fn on_shipping_address_changed(&mut self, event: &ShippingAddressChanged) {
        if let Some(order) = self.order_mut(event.order_id) {
            order.shipping_address = event.new_shipping_address.clone();
        }
    }

    fn on_delivery_confirmed(&mut self, event: &DeliveryConfirmed) {
        if let Some(order) = self.order_mut(event.order_id) {
            order.delivery_receipt = Some(DeliveryReceipt {
                delivered: event.date,
                agent: event.agent.clone(),
            });
        }
    }

    fn on_account_terminated(&mut self, event: &AccountTerminated) {
        self.is_terminated = true;
        self.terminate_reason = event.reason;
    }
}

impl Aggregate for Customer {
    fn register_handlers(handlers: &mut HandlerTable<Self>) {
        handlers
            .on::<CustomerInitialized, _>(Customer::on_initialized)
            .on::<OrderPlaced, _>(Customer::on_order_placed)
            .on::<ShippingAddressChanged, _>(Customer::on_shipping_address_changed)
            .on::<DeliveryConfirmed, _>(Customer::on_delivery_confirmed)
            .on::<AccountTerminated, _>(Customer::on_account_terminated);
    }
}

// ============================================================================
// Business rules
// ============================================================================

impl AggregateRoot<Customer> {
    pub fn set_up_new_customer(
        &mut self,
        email: &str,
        preferred_language: &str,
        age: Option<u32>,
        date: DateTime<Utc>,
    ) -> Result<(), CustomerError> {
        if self.data().is_initialized() {
            return Err(CustomerError::AlreadyInitialized);
        }
        validate_email(email)?;
        if preferred_language.trim().is_empty() {
            return Err(CustomerError::EmptyLanguage);
        }

        self.apply(|e: &mut CustomerInitialized| {
            e.email = email.trim().to_lowercase();
            e.preferred_language = preferred_language.trim().to_string();
            e.age = age;
            e.date = date;
        })?;
        Ok(())
    }

    pub fn place_order(
        &mut self,
        order_id: Uuid,
        date: DateTime<Utc>,
        shopping_cart: &ShoppingCart,
        shipping_address: &Address,
    ) -> Result<(), CustomerError> {
        self.ensure_active()?;
        if shopping_cart.is_empty() {
            return Err(CustomerError::EmptyShoppingCart);
        }
        if let Some(item) = shopping_cart.items.iter().find(|i| i.quantity == 0) {
            return Err(CustomerError::InvalidQuantity {
                sku: item.sku.clone(),
                quantity: item.quantity,
            });
        }
        if self.data().order(order_id).is_some() {
            return Err(CustomerError::DuplicateOrder(order_id));
        }

        self.apply(|e: &mut OrderPlaced| {
            e.id = order_id;
            e.date = date;
            e.shopping_cart = shopping_cart.clone();
            e.shipping_address = shipping_address.clone();
        })?;
        Ok(())
    }

    pub fn change_shipping_address(
        &mut self,
        order_id: Uuid,
        new_shipping_address: &Address,
    ) -> Result<(), CustomerError> {
        self.ensure_active()?;
        self.open_order(order_id)?;

        self.apply(|e: &mut ShippingAddressChanged| {
            e.order_id = order_id;
            e.new_shipping_address = new_shipping_address.clone();
        })?;
        Ok(())
    }

    /// Deliveries are still recorded after the account is terminated.
    pub fn confirm_delivery(
        &mut self,
        order_id: Uuid,
        agent: &str,
        date: DateTime<Utc>,
    ) -> Result<(), CustomerError> {
        if !self.data().is_initialized() {
            return Err(CustomerError::NotInitialized);
        }
        if agent.trim().is_empty() {
            return Err(CustomerError::EmptyAgent);
        }
        self.open_order(order_id)?;

        self.apply(|e: &mut DeliveryConfirmed| {
            e.order_id = order_id;
            e.date = date;
            e.agent = agent.trim().to_string();
        })?;
        Ok(())
    }

    pub fn terminate_account(&mut self, reason: TerminateReason) -> Result<(), CustomerError> {
        self.ensure_active()?;

        self.apply(|e: &mut AccountTerminated| e.reason = reason)?;
        Ok(())
    }

    /// Runs `command` against the current snapshot.
    pub fn execute(&mut self, command: &CustomerCommand) -> Result<(), CustomerError> {
        match command {
            CustomerCommand::SetUpNewCustomer {
                email,
                preferred_language,
                age,
            } => self.set_up_new_customer(email, preferred_language, *age, Utc::now()),
            CustomerCommand::PlaceOrder {
                order_id,
                date,
                shopping_cart,
                shipping_address,
            } => self.place_order(*order_id, *date, shopping_cart, shipping_address),
            CustomerCommand::ChangeShippingAddress {
                order_id,
                new_shipping_address,
            } => self.change_shipping_address(*order_id, new_shipping_address),
            CustomerCommand::ConfirmDelivery { order_id, agent, date } => {
                self.confirm_delivery(*order_id, agent, *date)
            }
            CustomerCommand::TerminateAccount { reason } => self.terminate_account(*reason),
        }
    }

    fn ensure_active(&self) -> Result<(), CustomerError> {
        let customer = self.data();
        if !customer.is_initialized() {
            return Err(CustomerError::NotInitialized);
        }
        if customer.is_terminated {
            return Err(CustomerError::Terminated);
        }
        Ok(())
    }

    fn open_order(&self, order_id: Uuid) -> Result<&Order, CustomerError> {
        let order = self
            .data()
            .order(order_id)
            .ok_or(CustomerError::OrderNotFound(order_id))?;
        if order.is_delivered() {
            return Err(CustomerError::AlreadyDelivered(order_id));
        }
        Ok(order)
    }
}

/// Basic shape check only
fn validate_email(email: &str) -> Result<(), CustomerError> {
    let email = email.trim();
    if email.is_empty() {
        return Err(CustomerError::EmptyEmail);
    }
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(CustomerError::InvalidEmail(email.to_string())),
    }
}
