use kameo::actor::ActorRef;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::channel::{EventEnvelope, HandlerError, MessageHandler};
use crate::actors::dlq::{AddToDlq, DlqActor};
use crate::metrics::Metrics;
use crate::utils::RetryConfig;

// ============================================================================
// Delivery Settlement - what happens to a message after its handler runs
// ============================================================================
//
// Ok         -> ack
// Transient  -> redeliver in place with exponential backoff, never dropped
// Permanent  -> dead-letter, then ack so the partition keeps moving
// Cancelled  -> return without ack; the next group member gets it again
//
// Every subscriber implementation runs each message through `settle` and
// commits only on `Acked` or `DeadLettered`.
//
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Acked,
    DeadLettered,
    Abandoned,
}

impl Settlement {
    /// Whether the offset may be committed
    pub fn is_committable(&self) -> bool {
        !matches!(self, Settlement::Abandoned)
    }
}

#[derive(Clone)]
pub struct DeliveryPolicy {
    group: String,
    backoff: RetryConfig,
    dead_letters: Option<ActorRef<DlqActor>>,
    metrics: Option<Arc<Metrics>>,
}

impl DeliveryPolicy {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            backoff: RetryConfig::redelivery(),
            dead_letters: None,
            metrics: None,
        }
    }

    pub fn with_backoff(mut self, backoff: RetryConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_dead_letters(mut self, dlq: ActorRef<DlqActor>) -> Self {
        self.dead_letters = Some(dlq);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Run `handler` on `message` until it settles
    pub async fn settle(
        &self,
        handler: &dyn MessageHandler,
        message: &EventEnvelope,
        cancel: &CancellationToken,
    ) -> Settlement {
        let mut attempt: u32 = 0;
        let mut delay = self.backoff.initial_delay;

        loop {
            if cancel.is_cancelled() {
                return self.finish(Settlement::Abandoned);
            }
            attempt += 1;

            match handler.handle(message, cancel).await {
                Ok(()) => {
                    tracing::debug!(
                        group = %self.group,
                        topic = %message.topic,
                        partition = message.partition,
                        offset = message.offset,
                        attempt = attempt,
                        "Message acknowledged"
                    );
                    return self.finish(Settlement::Acked);
                }
                Err(HandlerError::Cancelled) => {
                    tracing::info!(
                        group = %self.group,
                        topic = %message.topic,
                        offset = message.offset,
                        "Handler cancelled, leaving message unacknowledged"
                    );
                    return self.finish(Settlement::Abandoned);
                }
                Err(HandlerError::Permanent(reason)) => {
                    self.dead_letter(message, &reason, attempt).await;
                    return self.finish(Settlement::DeadLettered);
                }
                Err(HandlerError::Transient(reason)) => {
                    tracing::warn!(
                        group = %self.group,
                        topic = %message.topic,
                        key = %message.key,
                        offset = message.offset,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "Transient handler failure, redelivering after delay"
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_settlement(&self.group, "retried");
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return self.finish(Settlement::Abandoned);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = self.backoff.next_delay(delay);
                }
            }
        }
    }

    async fn dead_letter(&self, message: &EventEnvelope, reason: &str, attempts: u32) {
        tracing::error!(
            group = %self.group,
            topic = %message.topic,
            key = %message.key,
            offset = message.offset,
            error = %reason,
            "Message can never succeed, dead-lettering"
        );

        let Some(dlq) = &self.dead_letters else {
            return;
        };

        // Fire and forget - use tell
        let sent = dlq
            .tell(AddToDlq {
                consumer_group: self.group.clone(),
                topic: message.topic.clone(),
                key: message.key.clone(),
                partition: message.partition,
                offset: message.offset,
                payload: message.payload.clone(),
                error_message: reason.to_string(),
                failure_count: attempts as i32,
            })
            .send()
            .await;

        if sent.is_err() {
            tracing::error!(
                topic = %message.topic,
                offset = message.offset,
                "Dead letter queue unreachable, message dropped"
            );
        }
    }

    fn finish(&self, settlement: Settlement) -> Settlement {
        if let Some(metrics) = &self.metrics {
            let outcome = match settlement {
                Settlement::Acked => "acked",
                Settlement::DeadLettered => "dead_lettered",
                Settlement::Abandoned => "abandoned",
            };
            metrics.record_settlement(&self.group, outcome);
        }
        settlement
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actors::dlq::dlq_stats;
    use crate::store::InMemoryDeadLetterStore;
    use async_trait::async_trait;
    use kameo::Actor;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    /// Fails transiently `failures` times, then returns `last`
    struct Scripted {
        failures: u32,
        last: Result<(), HandlerError>,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(failures: u32, last: Result<(), HandlerError>) -> Self {
            Self {
                failures,
                last,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl MessageHandler for Scripted {
        async fn handle(&self, _: &EventEnvelope, _: &CancellationToken) -> Result<(), HandlerError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(HandlerError::Transient("broker hiccup".to_string()))
            } else {
                self.last.clone()
            }
        }
    }

    fn envelope() -> EventEnvelope {
        EventEnvelope {
            topic: "assembly-completed".to_string(),
            key: "order-1".to_string(),
            payload: vec![1, 2, 3],
            partition: 0,
            offset: 5,
        }
    }

    fn fast_policy() -> DeliveryPolicy {
        DeliveryPolicy::new("order-service").with_backoff(RetryConfig {
            max_attempts: u32::MAX,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
            multiplier: 2.0,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_are_retried_until_ack() {
        let handler = Scripted::new(3, Ok(()));
        let cancel = CancellationToken::new();

        let settlement = fast_policy().settle(&handler, &envelope(), &cancel).await;

        assert_eq!(settlement, Settlement::Acked);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_dead_lettered_and_committable() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let dlq = DlqActor::spawn(DlqActor::new(store));
        let policy = fast_policy().with_dead_letters(dlq.clone());
        let handler = Scripted::new(0, Err(HandlerError::Permanent("payload is empty".into())));

        let settlement = policy.settle(&handler, &envelope(), &CancellationToken::new()).await;

        assert_eq!(settlement, Settlement::DeadLettered);
        assert!(settlement.is_committable());
        let stats = dlq_stats(&dlq).await.unwrap();
        assert_eq!(stats.total_messages, 1);
        assert_eq!(stats.by_topic.get("assembly-completed"), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_backoff_abandons() {
        let handler = Scripted::new(u32::MAX, Ok(()));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(35)).await;
            trigger.cancel();
        });

        let settlement = fast_policy().settle(&handler, &envelope(), &cancel).await;

        assert_eq!(settlement, Settlement::Abandoned);
        assert!(!settlement.is_committable());
    }

    #[tokio::test]
    async fn test_cancelled_handler_is_not_acked() {
        let handler = Scripted::new(0, Err(HandlerError::Cancelled));
        let settlement = fast_policy()
            .settle(&handler, &envelope(), &CancellationToken::new())
            .await;
        assert_eq!(settlement, Settlement::Abandoned);
    }
}
