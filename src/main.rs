use std::sync::Arc;

use anyhow::Context;
use rust_decimal::Decimal;
use tokio::sync::watch;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_outbox::config::{AppConfig, StoreBackend};
use order_outbox::domain::order::{
    CustomerId, DefaultOrderValidator, OrderDraft, OrderItem, OrderService, ProductNumber,
    Quantity, ShippingAddress, UuidOrderNumberGenerator,
};
use order_outbox::messaging::{KafkaPublisher, LoggingPublisher, MessagePublisher, TopicMapper};
use order_outbox::metrics::{self, Metrics};
use order_outbox::notify::EventNotifier;
use order_outbox::outbox::OutboxProcessor;
use order_outbox::store::{InMemoryStore, OrderRepository, OutboxRepository, PostgresStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO level, can be overridden with RUST_LOG env var
    // Example: RUST_LOG=debug cargo run
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_outbox=debug")),
        )
        .init();

    let config = AppConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        backend = ?config.store_backend,
        kafka_enabled = config.kafka.enabled,
        "Starting order outbox service"
    );

    // === 1. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    let metrics_registry = Arc::new(metrics.registry().clone());
    let metrics_port = config.metrics_port;
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) = system.block_on(metrics::start_metrics_server(metrics_registry, metrics_port)) {
            tracing::error!(error = %e, "Metrics server error");
        }
    });

    // === 2. Publisher ===
    let publisher: Arc<dyn MessagePublisher> = if config.kafka.enabled {
        Arc::new(
            KafkaPublisher::new(&config.kafka.brokers, config.kafka.delivery_timeout)?
                .with_metrics(metrics.clone()),
        )
    } else {
        tracing::warn!("Kafka disabled, outbox messages will only be logged");
        Arc::new(LoggingPublisher)
    };

    // === 3. Store ===
    match config.store_backend {
        StoreBackend::Memory => {
            run(Arc::new(InMemoryStore::new()), publisher, &config, metrics).await
        }
        StoreBackend::Postgres => {
            let database = config
                .database
                .as_ref()
                .context("DATABASE_URL is required for the postgres backend")?;
            let store = PostgresStore::connect(&database.url, database.max_connections).await?;
            store.migrate().await?;
            run(Arc::new(store), publisher, &config, metrics).await
        }
    }
}

async fn run<S>(
    store: Arc<S>,
    publisher: Arc<dyn MessagePublisher>,
    config: &AppConfig,
    metrics: Arc<Metrics>,
) -> anyhow::Result<()>
where
    S: OrderRepository + OutboxRepository + 'static,
{
    let topics = Arc::new(TopicMapper::new(
        config.kafka.topic_prefix.clone(),
        config.kafka.topic_environment.clone(),
    ));

    // === 4. Outbox processor ===
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = Arc::new(
        OutboxProcessor::new(store.clone(), publisher, topics, config.outbox.clone())
            .with_metrics(metrics.clone()),
    );
    let processor_handle = processor.spawn(shutdown_rx);

    // === 5. Demonstrate the order lifecycle ===
    let service = OrderService::new(
        store,
        Arc::new(UuidOrderNumberGenerator),
        Arc::new(DefaultOrderValidator::default()),
        EventNotifier::default(),
    )
    .with_metrics(metrics);
    demo(&service).await?;

    // === 6. Run until Ctrl-C ===
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    let _ = shutdown_tx.send(true);
    processor_handle.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn demo<S>(service: &OrderService<S>) -> anyhow::Result<()>
where
    S: OrderRepository + OutboxRepository,
{
    let mut events = service.notifier().subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            tracing::debug!(
                event_type = event.event_type(),
                order_number = %event.order_number(),
                "In-process notification"
            );
        }
    });

    let draft = OrderDraft::new(
        CustomerId::new("CUST-001")?,
        vec![
            OrderItem::new(ProductNumber::new("PROD-001")?, Quantity::new(2)?, Decimal::new(1999, 2))?,
            OrderItem::new(ProductNumber::new("PROD-002")?, Quantity::new(1)?, Decimal::new(4950, 2))?,
        ],
        ShippingAddress {
            street: "123 Main St".to_string(),
            city: "Springfield".to_string(),
            state: "IL".to_string(),
            postal_code: "62701".to_string(),
            country: "USA".to_string(),
        },
    );

    let order = service.create_order(draft).await?;
    let order_number = order
        .order_number()
        .cloned()
        .context("created order has no order number")?;
    tracing::info!(order_number = %order_number, total = %order.total(), "Demo order created");

    service
        .add_item(
            &order_number,
            OrderItem::new(ProductNumber::new("PROD-003")?, Quantity::new(1)?, Decimal::new(500, 2))?,
        )
        .await?;
    service.confirm_order(&order_number).await?;

    tracing::info!(order_number = %order_number, "Demo order confirmed, waiting for Ctrl-C");
    Ok(())
}
