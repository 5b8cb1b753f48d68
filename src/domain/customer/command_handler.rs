use anyhow::{bail, Result};
use std::sync::Arc;

use super::aggregate::Customer;
use super::commands::CustomerCommand;
use crate::event_sourcing::core::AggregateRoot;
use crate::event_sourcing::store::EventStore;
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Customer Command Handler
// ============================================================================
//
// Orchestrates: Command -> Hydrate -> Business rules -> Save
//
// A lost optimistic concurrency race is retried only when the handler was
// built with a retry policy. Every attempt starts from a fresh session and
// re-reads the stream.
//
// ============================================================================

pub struct CustomerCommandHandler {
    event_store: Arc<EventStore>,
    retry: RetryConfig,
}

impl CustomerCommandHandler {
    pub fn new(event_store: Arc<EventStore>) -> Self {
        Self {
            event_store,
            retry: RetryConfig::none(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Handle a command and persist the resulting event.
    ///
    /// Returns the stream version after the save.
    pub async fn handle(&self, stream_id: &str, command: CustomerCommand) -> Result<u32> {
        retry_on_transient(self.retry.clone(), |attempt| {
            let command = command.clone();
            async move { self.try_handle(stream_id, &command, attempt).await }
        })
        .await
        .into_result()
    }

    /// Current state of the customer, `None` when the stream has no events.
    pub async fn load(&self, stream_id: &str) -> Result<Option<AggregateRoot<Customer>>> {
        let mut customer = self.event_store.aggregate::<Customer>(stream_id)?;
        let found = self.event_store.open_session().hydrate(&mut customer).await?;
        Ok(found.then_some(customer))
    }

    async fn try_handle(&self, stream_id: &str, command: &CustomerCommand, attempt: u32) -> Result<u32> {
        let mut session = self.event_store.open_session();
        let mut customer = self.event_store.aggregate::<Customer>(stream_id)?;

        let exists = session.hydrate(&mut customer).await?;
        if !exists && !command.creates_stream() {
            bail!("Customer does not exist: {}", stream_id);
        }

        customer.execute(command)?;
        session.save_uncommitted_events(&mut customer).await?;

        tracing::debug!(
            stream_id,
            attempt,
            version = customer.version(),
            correlation_id = session.correlation_id(),
            "Customer command handled"
        );
        Ok(customer.version())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventStoreConfig;
    use crate::domain::customer::{CustomerError, ShoppingCart, ShoppingCartItem, TerminateReason};
    use crate::event_sourcing::store::InMemoryPersistence;
    use crate::event_sourcing::EventStoreError;
    use crate::telemetry::VoidTelemetry;
    use chrono::Utc;
    use std::time::Duration;
    use uuid::Uuid;

    fn handler() -> CustomerCommandHandler {
        let config = EventStoreConfig::default();
        let store = EventStore::new(
            Arc::new(InMemoryPersistence::new()),
            config.serializers().unwrap(),
            Arc::new(VoidTelemetry),
            &config,
        );
        CustomerCommandHandler::new(Arc::new(store))
    }

    fn set_up_command() -> CustomerCommand {
        CustomerCommand::SetUpNewCustomer {
            email: "john.simple@example.com".into(),
            preferred_language: "en".into(),
            age: Some(32),
        }
    }

    fn place_order() -> CustomerCommand {
        CustomerCommand::PlaceOrder {
            order_id: Uuid::new_v4(),
            date: Utc::now(),
            shopping_cart: ShoppingCart::new("USD", vec![ShoppingCartItem::new("ITM-1234", 1)]),
            shipping_address: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_handle_persists_events() {
        let handler = handler();

        assert_eq!(handler.handle("john", set_up_command()).await.unwrap(), 1);
        assert_eq!(handler.handle("john", place_order()).await.unwrap(), 2);

        let customer = handler.load("john").await.unwrap().unwrap();
        assert_eq!(customer.version(), 2);
        assert_eq!(customer.data().orders.len(), 1);
        assert!(!customer.has_uncommitted_events());
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let handler = handler();

        let result = handler.handle("nobody", place_order()).await;
        assert!(result.unwrap_err().to_string().contains("does not exist"));
        assert!(handler.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_business_error_is_not_retried() {
        let handler = handler().with_retry(RetryConfig::aggressive());
        handler.handle("john", set_up_command()).await.unwrap();

        let error = handler.handle("john", set_up_command()).await.unwrap_err();
        assert!(matches!(
            error.downcast_ref::<CustomerError>(),
            Some(CustomerError::AlreadyInitialized)
        ));
    }

    #[tokio::test]
    async fn test_conflict_without_retry_reaches_caller() {
        let handler = handler();
        handler.handle("john", set_up_command()).await.unwrap();

        // loaded before the order below is placed, saved after it
        let mut stale = handler.load("john").await.unwrap().unwrap();
        stale.terminate_account(TerminateReason::RequestedByCustomer).unwrap();

        handler.handle("john", place_order()).await.unwrap();

        let error = handler
            .event_store
            .open_session()
            .save_uncommitted_events(&mut stale)
            .await
            .unwrap_err();
        assert!(error.is_version_conflict());
    }

    #[tokio::test]
    async fn test_concurrent_writers_converge_with_retry() {
        let retry = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2.0,
        };
        let handler = Arc::new(handler().with_retry(retry));
        handler.handle("john", set_up_command()).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let handler = handler.clone();
            tasks.push(tokio::spawn(async move { handler.handle("john", place_order()).await }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let customer = handler.load("john").await.unwrap().unwrap();
        assert_eq!(customer.version(), 5);
        assert_eq!(customer.data().orders.len(), 4);
    }

    #[test]
    fn test_store_errors_keep_their_type() {
        let error: anyhow::Error = CustomerError::from(EventStoreError::version_conflict("s", 1)).into();
        assert!(error.downcast_ref::<CustomerError>().is_some());
    }
}
