mod server;

use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
};

use crate::domain::order::OrderStatus;
use crate::utils::CircuitState;

pub use server::start_metrics_server;

// ============================================================================
// Metrics Module - Prometheus metrics for observability
// ============================================================================
//
// Provides metrics for:
// - Order creation and status transitions
// - Event publishing per topic
// - Consumer settlement outcomes per group
// - Dead Letter Queue volume
// - Circuit breaker state
// - Simulated build time
//
// All metrics are registered with Prometheus and can be scraped via /metrics
// ============================================================================

/// Central metrics registry for the entire application
pub struct Metrics {
    registry: Registry,

    // Order Metrics
    pub orders_created: IntCounter,
    pub order_transitions: IntCounterVec,

    // Publishing Metrics
    pub events_published: IntCounterVec,
    pub events_publish_failed: IntCounterVec,

    // Consumer Metrics
    pub messages_handled: IntCounterVec,

    // DLQ Metrics
    pub dlq_messages_total: IntCounter,
    pub dlq_messages_by_topic: IntCounterVec,

    // Circuit Breaker Metrics
    pub circuit_breaker_state: IntGaugeVec,

    // Assembly Metrics
    pub assembly_build_time: Histogram,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        // Order Metrics
        let orders_created = IntCounter::new("orders_created_total", "Total orders created")?;
        registry.register(Box::new(orders_created.clone()))?;

        let order_transitions = IntCounterVec::new(
            Opts::new("order_status_transitions_total", "Order status transitions"),
            &["from", "to"],
        )?;
        registry.register(Box::new(order_transitions.clone()))?;

        // Publishing Metrics
        let events_published = IntCounterVec::new(
            Opts::new("events_published_total", "Events durably published"),
            &["topic"],
        )?;
        registry.register(Box::new(events_published.clone()))?;

        let events_publish_failed = IntCounterVec::new(
            Opts::new("events_publish_failed_total", "Publish attempts that failed"),
            &["topic"],
        )?;
        registry.register(Box::new(events_publish_failed.clone()))?;

        // Consumer Metrics
        let messages_handled = IntCounterVec::new(
            Opts::new("messages_handled_total", "Consumed messages by settlement outcome"),
            &["group", "outcome"],
        )?;
        registry.register(Box::new(messages_handled.clone()))?;

        // DLQ Metrics
        let dlq_messages_total = IntCounter::new(
            "dlq_messages_total",
            "Total messages in dead letter queue",
        )?;
        registry.register(Box::new(dlq_messages_total.clone()))?;

        let dlq_messages_by_topic = IntCounterVec::new(
            Opts::new("dlq_messages_by_topic", "DLQ messages by source topic"),
            &["topic"],
        )?;
        registry.register(Box::new(dlq_messages_by_topic.clone()))?;

        // Circuit Breaker Metrics
        let circuit_breaker_state = IntGaugeVec::new(
            Opts::new(
                "circuit_breaker_state",
                "Circuit breaker state (0=Closed, 1=Open, 2=HalfOpen)",
            ),
            &["breaker"],
        )?;
        registry.register(Box::new(circuit_breaker_state.clone()))?;

        // Assembly Metrics
        let assembly_build_time = Histogram::with_opts(
            HistogramOpts::new("assembly_build_time_seconds", "Simulated assembly duration")
                .buckets(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]),
        )?;
        registry.register(Box::new(assembly_build_time.clone()))?;

        Ok(Self {
            registry,
            orders_created,
            order_transitions,
            events_published,
            events_publish_failed,
            messages_handled,
            dlq_messages_total,
            dlq_messages_by_topic,
            circuit_breaker_state,
            assembly_build_time,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_transition(&self, from: OrderStatus, to: OrderStatus) {
        self.order_transitions
            .with_label_values(&[from.as_str(), to.as_str()])
            .inc();
    }

    pub fn record_publish(&self, topic: &str, ok: bool) {
        let counter = if ok {
            &self.events_published
        } else {
            &self.events_publish_failed
        };
        counter.with_label_values(&[topic]).inc();
    }

    pub fn record_settlement(&self, group: &str, outcome: &str) {
        self.messages_handled.with_label_values(&[group, outcome]).inc();
    }

    pub fn record_dead_letter(&self, topic: &str) {
        self.dlq_messages_total.inc();
        self.dlq_messages_by_topic.with_label_values(&[topic]).inc();
    }

    pub fn record_breaker_state(&self, breaker: &str, state: CircuitState) {
        self.circuit_breaker_state
            .with_label_values(&[breaker])
            .set(state.as_gauge());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_and_count() {
        let metrics = Metrics::new().unwrap();

        metrics.orders_created.inc();
        metrics.record_transition(OrderStatus::PendingPayment, OrderStatus::Paid);
        metrics.record_publish("payment-completed", true);
        metrics.record_dead_letter("assembly-completed");
        metrics.record_breaker_state("redpanda", CircuitState::Open);

        assert_eq!(metrics.orders_created.get(), 1);
        assert_eq!(
            metrics
                .order_transitions
                .with_label_values(&["PENDING_PAYMENT", "PAID"])
                .get(),
            1
        );
        assert_eq!(metrics.dlq_messages_total.get(), 1);
        assert_eq!(
            metrics.circuit_breaker_state.with_label_values(&["redpanda"]).get(),
            1
        );
        assert!(!metrics.registry().gather().is_empty());
    }
}
