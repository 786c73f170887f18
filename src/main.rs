use anyhow::Context as _;
use kameo::Actor;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

use order_assembly::actors::{dlq_stats, shutdown_signal, Coordinator, DeadLetterStore, DlqActor};
use order_assembly::config::{
    AppConfig, ServiceRole, StoreKind, ASSEMBLY_WORKER_GROUP, NOTIFIER_GROUP, ORDER_SERVICE_GROUP,
};
use order_assembly::domain::order::{OrderRepository, OrderStatus, PartPrice, PaymentMethod};
use order_assembly::events::{EventCodec, ProtobufCodec};
use order_assembly::messaging::{
    DeliveryPolicy, InMemoryBroker, Publisher, RedpandaPublisher, RedpandaSubscriber, Subscriber,
};
use order_assembly::metrics::{self, Metrics};
use order_assembly::service::{
    AssemblyWorker, LogNotifier, NotificationConsumer, OrderService, SimulatedPaymentGateway,
    StaticPartCatalog,
};
use order_assembly::store::{
    self, InMemoryDeadLetterStore, InMemoryOrderRepository, ScyllaDeadLetterStore,
    ScyllaOrderRepository,
};

/// Where events travel: a Redpanda cluster or the in-process log
enum Transport {
    Redpanda(String),
    InMemory(InMemoryBroker),
}

impl Transport {
    fn publisher(&self, topic: &str, metrics: &Arc<Metrics>) -> anyhow::Result<Arc<dyn Publisher>> {
        Ok(match self {
            Transport::Redpanda(brokers) => {
                Arc::new(RedpandaPublisher::new(brokers, topic)?.with_metrics(metrics.clone()))
            }
            Transport::InMemory(broker) => Arc::new(broker.publisher(topic)),
        })
    }

    fn subscriber(&self, topics: &[&str], policy: DeliveryPolicy) -> Arc<dyn Subscriber> {
        match self {
            Transport::Redpanda(brokers) => {
                Arc::new(RedpandaSubscriber::new(brokers.clone(), topics, policy))
            }
            Transport::InMemory(broker) => Arc::new(broker.subscriber(topics, policy)),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    // Initialize structured logging with environment-based filtering
    // Default to INFO level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_assembly=debug")),
        )
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        role = %config.role,
        redpanda = ?config.redpanda_brokers,
        store = ?config.store,
        "🚀 Starting order assembly saga"
    );

    // === 1. Prometheus metrics ===
    let metrics = Arc::new(Metrics::new()?);
    if let Some(port) = config.metrics_port {
        let registry = Arc::new(metrics.registry().clone());
        std::thread::spawn(move || {
            let system = actix_web::rt::System::new();
            if let Err(e) = system.block_on(metrics::start_metrics_server(registry, port)) {
                tracing::error!("Metrics server error: {}", e);
            }
        });
    }

    // === 2. Transport ===
    let transport = match &config.redpanda_brokers {
        Some(brokers) => Transport::Redpanda(brokers.clone()),
        None => {
            tracing::warn!("REDPANDA_BROKERS not set, using the in-process broker");
            Transport::InMemory(InMemoryBroker::default())
        }
    };

    // === 3. Persistence ===
    let (repository, dead_letters): (Arc<dyn OrderRepository>, Arc<dyn DeadLetterStore>) =
        match config.store {
            StoreKind::Scylla => {
                let session = store::scylla::connect(&config.scylla_nodes, &config.scylla_keyspace)
                    .await
                    .context("failed to prepare ScyllaDB")?;
                (
                    Arc::new(ScyllaOrderRepository::new(session.clone())),
                    Arc::new(ScyllaDeadLetterStore::new(session)),
                )
            }
            StoreKind::Memory => (
                Arc::new(InMemoryOrderRepository::new()),
                Arc::new(InMemoryDeadLetterStore::new()),
            ),
        };

    // === 4. Dead Letter Queue actor ===
    let dlq = DlqActor::spawn(DlqActor::new(dead_letters).with_metrics(metrics.clone()));
    let policy = |group: &str| {
        DeliveryPolicy::new(group)
            .with_dead_letters(dlq.clone())
            .with_metrics(metrics.clone())
    };

    // === 5. Listeners ===
    let codec: Arc<dyn EventCodec> = Arc::new(ProtobufCodec);
    let payment_topic = config.payment_completed_topic.as_str();
    let assembly_topic = config.assembly_completed_topic.as_str();
    let mut coordinator = Coordinator::new(config.shutdown_grace);
    let mut demo = None;

    if config.role.runs_order_service() {
        let catalog = Arc::new(demo_catalog());
        let service = Arc::new(
            OrderService::new(
                repository.clone(),
                catalog.clone(),
                Arc::new(SimulatedPaymentGateway::new()),
                codec.clone(),
                transport.publisher(payment_topic, &metrics)?,
            )
            .with_metrics(metrics.clone())
            .with_shutdown(coordinator.token()),
        );
        coordinator.spawn_listener(
            ORDER_SERVICE_GROUP,
            transport.subscriber(&[assembly_topic], policy(ORDER_SERVICE_GROUP)),
            service.clone(),
        );
        demo = Some((service, catalog));
    }

    if config.role.runs_assembly_worker() {
        let worker = AssemblyWorker::new(codec.clone(), transport.publisher(assembly_topic, &metrics)?)
            .with_metrics(metrics.clone());
        coordinator.spawn_listener(
            ASSEMBLY_WORKER_GROUP,
            transport.subscriber(&[payment_topic], policy(ASSEMBLY_WORKER_GROUP)),
            Arc::new(worker),
        );
    }

    if config.role.runs_notifier() {
        let notifications = NotificationConsumer::new(
            codec.clone(),
            Arc::new(LogNotifier),
            payment_topic,
            assembly_topic,
        );
        coordinator.spawn_listener(
            NOTIFIER_GROUP,
            transport.subscriber(&[payment_topic, assembly_topic], policy(NOTIFIER_GROUP)),
            Arc::new(notifications),
        );
    }

    // === 6. Demonstrate the full order lifecycle ===
    if config.role == ServiceRole::All {
        if let Some((service, catalog)) = demo {
            let cancel = coordinator.token();
            let parts = catalog.part_ids();
            tokio::spawn(async move {
                if let Err(e) = run_demo(&service, &parts, &cancel).await {
                    tracing::error!(error = %e, "Demo lifecycle failed");
                }
            });
        }
    }

    tracing::info!(listeners = coordinator.len(), "✅ All listeners started");
    let report = coordinator.run_until(shutdown_signal()).await;

    match dlq_stats(&dlq).await {
        Ok(stats) => tracing::info!(
            total = stats.total_messages,
            by_topic = ?stats.by_topic,
            "Dead letter queue at shutdown"
        ),
        Err(e) => tracing::warn!(error = %e, "Could not read dead letter statistics"),
    }

    let report = report?;
    tracing::info!(
        completed = report.completed,
        aborted = report.aborted,
        "👋 Shutdown complete"
    );
    Ok(())
}

fn demo_catalog() -> StaticPartCatalog {
    StaticPartCatalog::new([
        PartPrice { id: Uuid::new_v4(), price: Decimal::new(1000, 2) },
        PartPrice { id: Uuid::new_v4(), price: Decimal::new(2500, 2) },
        PartPrice { id: Uuid::new_v4(), price: Decimal::new(4250, 2) },
    ])
}

async fn run_demo(
    service: &OrderService,
    parts: &[Uuid],
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    tracing::info!("📝 Demonstrating order lifecycle");
    let user_id = Uuid::new_v4();

    // Create and pay an order
    let order = service.create_order(user_id, &parts[..2]).await?;
    tracing::info!(order_id = %order.id, total = %order.total_price, "Order awaiting payment");

    let paid = service.pay_order(order.id, PaymentMethod::Card).await?;
    tracing::info!(
        order_id = %paid.id,
        transaction_id = ?paid.transaction_id,
        "Order paid"
    );

    // A paid order can no longer be cancelled
    if let Err(e) = service.cancel_order(order.id).await {
        tracing::info!(order_id = %order.id, code = e.code().as_str(), "Cancel rejected as expected");
    }

    // Cancel a second order before paying it
    let second = service.create_order(user_id, &parts[2..]).await?;
    service.cancel_order(second.id).await?;

    // Wait for the assembly worker to report back
    let mut poll = tokio::time::interval(Duration::from_millis(500));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = poll.tick() => {}
        }
        let current = service.get_order(order.id).await?;
        if current.status == OrderStatus::Assembled {
            tracing::info!(order_id = %order.id, "🎉 Order assembled, demo complete");
            return Ok(());
        }
    }
}
