use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::collaborators::{PartCatalog, PaymentGateway};
use crate::domain::order::{
    CommandOutcome, Order, OrderCommand, OrderError, OrderItem, OrderRepository, OrderStatus,
    PaymentMethod,
};
use crate::events::{AssemblyCompleted, EventCodec, PaymentCompleted};
use crate::messaging::{ChannelError, EventEnvelope, HandlerError, MessageHandler, Publisher};
use crate::metrics::Metrics;
use crate::utils::{
    retry_on_transient, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, RetryConfig,
};

// ============================================================================
// Order Orchestration Service
// ============================================================================
//
// Synchronous use cases (create, pay, cancel) plus the AssemblyCompleted
// handler. Publishing PaymentCompleted happens after the Paid state is
// persisted and is not part of that write: if it fails the caller sees the
// error while the order stays Paid.
//
// ============================================================================

/// What the AssemblyCompleted handler did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyOutcome {
    Assembled,
    /// Duplicate delivery; nothing changed
    AlreadyAssembled,
    /// Order was not Paid; logged and acknowledged
    Ignored(OrderStatus),
}

pub struct OrderService {
    repository: Arc<dyn OrderRepository>,
    catalog: Arc<dyn PartCatalog>,
    payments: Arc<dyn PaymentGateway>,
    payment_breaker: CircuitBreaker,
    codec: Arc<dyn EventCodec>,
    payment_completed: Arc<dyn Publisher>,
    publish_retry: RetryConfig,
    shutdown: CancellationToken,
    metrics: Option<Arc<Metrics>>,
}

impl OrderService {
    pub fn new(
        repository: Arc<dyn OrderRepository>,
        catalog: Arc<dyn PartCatalog>,
        payments: Arc<dyn PaymentGateway>,
        codec: Arc<dyn EventCodec>,
        payment_completed: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            repository,
            catalog,
            payments,
            payment_breaker: CircuitBreaker::new("payment-gateway", CircuitBreakerConfig::default()),
            codec,
            payment_completed,
            publish_retry: RetryConfig::conservative(),
            shutdown: CancellationToken::new(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_publish_retry(mut self, retry: RetryConfig) -> Self {
        self.publish_retry = retry;
        self
    }

    /// Publishing stops retrying once `shutdown` is cancelled
    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn with_payment_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.payment_breaker = CircuitBreaker::new("payment-gateway", config);
        self
    }

    pub async fn create_order(&self, user_id: Uuid, part_ids: &[Uuid]) -> Result<Order, OrderError> {
        if part_ids.is_empty() {
            return Err(OrderError::InvalidOrderData(
                "at least one part is required".to_string(),
            ));
        }

        // Repeated part ids become one line with a summed quantity
        let mut unique: Vec<Uuid> = Vec::new();
        let mut quantities: HashMap<Uuid, u32> = HashMap::new();
        for id in part_ids {
            let quantity = quantities.entry(*id).or_insert(0);
            if *quantity == 0 {
                unique.push(*id);
            }
            *quantity += 1;
        }

        let parts = self.catalog.list_parts(&unique).await?;
        if parts.len() != unique.len() {
            return Err(OrderError::InvalidOrderData(format!(
                "requested {} parts, catalog returned {}",
                unique.len(),
                parts.len()
            )));
        }

        let prices: HashMap<Uuid, _> = parts.into_iter().map(|p| (p.id, p.price)).collect();
        let items = unique
            .iter()
            .map(|id| {
                prices
                    .get(id)
                    .map(|price| OrderItem {
                        part_id: *id,
                        quantity: quantities[id],
                        unit_price: *price,
                    })
                    .ok_or_else(|| OrderError::InvalidOrderData(format!("unknown part {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let order = Order::new(Uuid::now_v7(), user_id, items)?;
        self.repository.create(&order).await?;

        if let Some(metrics) = &self.metrics {
            metrics.orders_created.inc();
        }
        tracing::info!(
            order_id = %order.id,
            user_id = %user_id,
            total_price = %order.total_price,
            lines = order.items.len(),
            "✅ Order created"
        );

        Ok(order)
    }

    pub async fn get_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        self.repository.get(order_id).await
    }

    pub async fn pay_order(&self, order_id: Uuid, method: PaymentMethod) -> Result<Order, OrderError> {
        let order = self.repository.get(order_id).await?;
        if order.status != OrderStatus::PendingPayment {
            return Err(OrderError::OrderCannotBePaid(order.status));
        }

        let transaction_id = match self
            .payment_breaker
            .call(self.payments.charge(order.user_id, order.id, method))
            .await
        {
            Ok(transaction_id) => transaction_id,
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(order_id = %order_id, "Circuit breaker open - payment gateway unavailable");
                return Err(OrderError::UpstreamUnavailable(
                    "payment gateway circuit open".to_string(),
                ));
            }
            Err(CircuitBreakerError::OperationFailed(e)) => {
                tracing::error!(order_id = %order_id, error = %e, "Payment failed");
                return Err(e);
            }
        };
        if let Some(metrics) = &self.metrics {
            let state = self.payment_breaker.get_state().await;
            metrics.record_breaker_state(self.payment_breaker.name(), state);
        }

        let command = OrderCommand::Pay {
            transaction_id: transaction_id.clone(),
            payment_method: method,
        };
        let outcome = match self.repository.update(order_id, &command).await {
            Ok(outcome) => outcome,
            Err(e) => {
                // The charge went through but the order moved on meanwhile
                tracing::warn!(
                    order_id = %order_id,
                    transaction_id = %transaction_id,
                    error = %e,
                    "Charged an order that could no longer be paid"
                );
                return Err(e);
            }
        };
        self.record_transition(&outcome);

        let event = PaymentCompleted::new(order_id, outcome.order.user_id, method, transaction_id);
        self.publish_payment_completed(&event).await?;

        Ok(outcome.order)
    }

    pub async fn cancel_order(&self, order_id: Uuid) -> Result<Order, OrderError> {
        let outcome = self.repository.update(order_id, &OrderCommand::Cancel).await?;
        self.record_transition(&outcome);

        tracing::info!(order_id = %order_id, "Order cancelled");
        Ok(outcome.order)
    }

    /// Advance a Paid order to Assembled. Safe to call any number of times
    /// with the same event.
    pub async fn on_assembly_completed(
        &self,
        event: &AssemblyCompleted,
    ) -> Result<AssemblyOutcome, OrderError> {
        let command = OrderCommand::CompleteAssembly {
            build_time_seconds: event.build_time_seconds,
        };

        match self.repository.update(event.order_id, &command).await {
            Ok(outcome) if outcome.changed() => {
                self.record_transition(&outcome);
                tracing::info!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    build_time_seconds = event.build_time_seconds,
                    "✅ Order assembled"
                );
                Ok(AssemblyOutcome::Assembled)
            }
            Ok(_) => {
                tracing::debug!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    "Duplicate AssemblyCompleted, order already assembled"
                );
                Ok(AssemblyOutcome::AlreadyAssembled)
            }
            Err(OrderError::OrderCannotBeAssembled(status)) => {
                if status == OrderStatus::Cancelled {
                    tracing::info!(
                        order_id = %event.order_id,
                        event_id = %event.event_id,
                        "AssemblyCompleted for a cancelled order, ignoring"
                    );
                } else {
                    tracing::warn!(
                        order_id = %event.order_id,
                        event_id = %event.event_id,
                        status = %status,
                        "AssemblyCompleted arrived before payment, ordering violated; ignoring"
                    );
                }
                Ok(AssemblyOutcome::Ignored(status))
            }
            Err(e) => Err(e),
        }
    }

    async fn publish_payment_completed(&self, event: &PaymentCompleted) -> Result<(), OrderError> {
        let key = event.partition_key();
        let payload = self.codec.encode_payment_completed(event);
        let topic = self.payment_completed.topic().to_string();

        let publish = retry_on_transient(self.publish_retry.clone(), |_| {
            self.payment_completed.send(&key, payload.clone())
        });
        let published = tokio::select! {
            _ = self.shutdown.cancelled() => Err(ChannelError::Closed),
            result = publish => result.into_result(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(&topic, published.is_ok());
        }

        match published {
            Ok(()) => {
                tracing::info!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    topic = %topic,
                    "📤 PaymentCompleted published"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    order_id = %event.order_id,
                    event_id = %event.event_id,
                    topic = %topic,
                    error = %e,
                    "Order is Paid but PaymentCompleted was not published"
                );
                Err(OrderError::TransientChannel(e))
            }
        }
    }

    fn record_transition(&self, outcome: &CommandOutcome) {
        if let (Some(metrics), true) = (&self.metrics, outcome.changed()) {
            metrics.record_transition(outcome.previous_status, outcome.order.status);
        }
    }
}

/// Consumer side: AssemblyCompleted events for this service's orders
#[async_trait]
impl MessageHandler for OrderService {
    async fn handle(
        &self,
        message: &EventEnvelope,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let event = self.codec.decode_assembly_completed(&message.payload)?;
        self.on_assembly_completed(&event).await?;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
