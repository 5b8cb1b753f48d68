use chrono::{Duration, Utc};
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use event_kernel::config::EventStoreConfig;
use event_kernel::domain::customer::{
    Address, Customer, CustomerCommand, CustomerCommandHandler, ShoppingCart, ShoppingCartItem,
    TerminateReason,
};
use event_kernel::event_sourcing::{EventStore, InMemoryPersistence, Transaction};
use event_kernel::metrics::PrometheusTelemetry;
use event_kernel::utils::RetryConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=trace cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,event_kernel=debug"))
        )
        .init();

    tracing::info!("🚀 Starting event kernel demo");

    // === 1. Resolve configuration ===
    let config = EventStoreConfig::from_env()?;
    tracing::info!(
        warn_on_stream_length = config.warn_on_stream_length,
        error_on_stream_length = config.error_on_stream_length,
        default_serializer = %config.default_serializer,
        "Configuration loaded"
    );

    // === 2. Wire the store ===
    let persistence = InMemoryPersistence::new();
    let telemetry = Arc::new(PrometheusTelemetry::new()?);
    let store = Arc::new(EventStore::new(
        Arc::new(persistence.clone()),
        config.serializers()?,
        telemetry.clone(),
        &config,
    ));
    tracing::info!("📊 Codecs available: {:?}", store.serializers().ids());

    // === 3. Customer lifecycle through the command handler ===
    let handler = CustomerCommandHandler::new(store.clone()).with_retry(RetryConfig::default());
    let stream_id = Uuid::new_v4().simple().to_string();
    let order_id = Uuid::new_v4();
    let ordered = Utc::now();

    handler
        .handle(
            &stream_id,
            CustomerCommand::SetUpNewCustomer {
                email: "mary.advanced@example.com".into(),
                preferred_language: "en".into(),
                age: Some(41),
            },
        )
        .await?;
    handler
        .handle(
            &stream_id,
            CustomerCommand::PlaceOrder {
                order_id,
                date: ordered,
                shopping_cart: ShoppingCart::new(
                    "CAD",
                    vec![ShoppingCartItem::new("ITM-9999", 2), ShoppingCartItem::new("ITM-9911", 1)],
                ),
                shipping_address: address("La Revolucion D21", "TT23A81"),
            },
        )
        .await?;
    handler
        .handle(
            &stream_id,
            CustomerCommand::ChangeShippingAddress {
                order_id,
                new_shipping_address: address("Velvet Road 987", "TT09329"),
            },
        )
        .await?;
    let version = handler
        .handle(
            &stream_id,
            CustomerCommand::ConfirmDelivery {
                order_id,
                agent: "John Doe".into(),
                date: ordered + Duration::hours(32),
            },
        )
        .await?;
    tracing::info!(stream_id = %stream_id, version, "✅ Order delivered");

    // === 4. Two customers set up atomically ===
    let transaction = Transaction::new();
    {
        let mut session = store.open_session_in(&transaction);
        for email in ["john.simple@example.com", "lucas.many.events@example.com"] {
            let mut customer = store.aggregate::<Customer>(Uuid::new_v4().simple().to_string())?;
            customer.set_up_new_customer(email, "en", None, Utc::now())?;
            session.save_uncommitted_events(&mut customer).await?;
        }
    }
    tracing::info!(streams = persistence.stream_ids().await.len(), "Before transaction completes");
    transaction.complete().await?;
    tracing::info!(streams = persistence.stream_ids().await.len(), "✅ Transaction completed");

    // === 5. Read back and close the account ===
    if let Some(customer) = handler.load(&stream_id).await? {
        tracing::info!(
            email = %customer.data().email,
            orders = customer.data().orders.len(),
            open_orders = customer.data().open_orders().count(),
            version = customer.version(),
            "Customer hydrated"
        );
    }
    handler
        .handle(
            &stream_id,
            CustomerCommand::TerminateAccount {
                reason: TerminateReason::RequestedByCustomer,
            },
        )
        .await?;

    // === 6. Dump metrics ===
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&telemetry.registry().gather(), &mut buffer)?;
    tracing::debug!("Metrics:\n{}", String::from_utf8_lossy(&buffer));

    tracing::info!("🎉 Demo complete!");

    Ok(())
}

fn address(street: &str, zip_code: &str) -> Address {
    Address {
        name: "Mary Advanced".into(),
        zip_code: zip_code.into(),
        street: street.into(),
        city: "Toronto".into(),
        state: None,
        country: "Canada".into(),
    }
}
