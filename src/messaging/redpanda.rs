use async_trait::async_trait;
use futures_util::StreamExt;
use rdkafka::{
    config::ClientConfig,
    consumer::{CommitMode, Consumer, StreamConsumer},
    error::{KafkaError, RDKafkaErrorCode},
    message::{BorrowedMessage, Message},
    producer::{FutureProducer, FutureRecord},
    util::Timeout,
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelError, EventEnvelope, MessageHandler, Publisher, Subscriber};
use super::settlement::DeliveryPolicy;
use crate::metrics::Metrics;
use crate::utils::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};

// ============================================================================
// Redpanda Transport
// ============================================================================
//
// Publisher: keyed by order id, acks=all, one send per call and no retry.
// A circuit breaker fails sends fast while the broker is down.
//
// Subscriber: explicit consumer group, auto-commit off. An offset is
// committed only after its message is acked or dead-lettered.
//
// ============================================================================

const SEND_TIMEOUT: Duration = Duration::from_secs(5);
const RECEIVE_BACKOFF: Duration = Duration::from_millis(500);

pub struct RedpandaPublisher {
    producer: FutureProducer,
    topic: String,
    circuit_breaker: CircuitBreaker,
    metrics: Option<Arc<Metrics>>,
}

impl RedpandaPublisher {
    pub fn new(brokers: &str, topic: impl Into<String>) -> Result<Self, ChannelError> {
        let topic = topic.into();
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("acks", "all")
            .set("enable.idempotence", "true")
            .set("message.timeout.ms", "5000")
            .create()
            .map_err(|e| ChannelError::PublishFailed {
                topic: topic.clone(),
                reason: format!("Failed to create producer: {e}"),
            })?;

        // Configure circuit breaker for Redpanda
        let cb_config = CircuitBreakerConfig {
            failure_threshold: 5,                         // Open after 5 failures
            timeout: std::time::Duration::from_secs(30),  // Wait 30s before retry
            success_threshold: 3,                         // Need 3 successes to close
        };

        Ok(Self {
            producer,
            circuit_breaker: CircuitBreaker::new(format!("redpanda:{topic}"), cb_config),
            topic,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    async fn report_breaker(&self) {
        if let Some(metrics) = &self.metrics {
            let state = self.circuit_breaker.get_state().await;
            metrics.record_breaker_state(self.circuit_breaker.name(), state);
        }
    }
}

#[async_trait]
impl Publisher for RedpandaPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        // Use circuit breaker to protect against Redpanda failures
        let result = self
            .circuit_breaker
            .call(async {
                let record = FutureRecord::to(&self.topic)
                    .key(key)
                    .payload(payload.as_slice());

                self.producer
                    .send(record, Timeout::After(SEND_TIMEOUT))
                    .await
                    .map(|_| ())
                    .map_err(|(e, _)| e.to_string())
            })
            .await;

        self.report_breaker().await;

        match result {
            Ok(()) => {
                tracing::debug!(
                    topic = %self.topic,
                    key = %key,
                    "Published to Redpanda"
                );
                Ok(())
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                tracing::error!(
                    topic = %self.topic,
                    "Circuit breaker open - Redpanda unavailable"
                );
                Err(ChannelError::Unavailable(format!(
                    "circuit breaker open for {}",
                    self.topic
                )))
            }
            Err(CircuitBreakerError::OperationFailed(reason)) => {
                tracing::error!(
                    error = %reason,
                    topic = %self.topic,
                    "Failed to publish to Redpanda"
                );
                Err(ChannelError::PublishFailed {
                    topic: self.topic.clone(),
                    reason,
                })
            }
        }
    }
}

pub struct RedpandaSubscriber {
    brokers: String,
    topics: Vec<String>,
    policy: DeliveryPolicy,
}

impl RedpandaSubscriber {
    pub fn new(brokers: impl Into<String>, topics: &[&str], policy: DeliveryPolicy) -> Self {
        Self {
            brokers: brokers.into(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            policy,
        }
    }

    fn connect(&self) -> Result<StreamConsumer, ChannelError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", self.policy.group())
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("session.timeout.ms", "6000")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| ChannelError::SubscriptionFailed {
                topics: self.topics.clone(),
                reason: format!("Failed to create consumer: {e}"),
            })?;

        let topic_refs: Vec<&str> = self.topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topic_refs)
            .map_err(|e| ChannelError::SubscriptionFailed {
                topics: self.topics.clone(),
                reason: format!("Failed to subscribe to topics: {e}"),
            })?;

        Ok(consumer)
    }
}

#[async_trait]
impl Subscriber for RedpandaSubscriber {
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        let consumer = self.connect()?;

        tracing::info!(
            topics = ?self.topics,
            group = %self.policy.group(),
            manual_commit = true,
            "Subscribed to topics"
        );

        let mut stream = consumer.stream();

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.next() => next,
            };

            let message = match next {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    if let Some(reason) = fatal_reason(&e, consumer.client().fatal_error()) {
                        tracing::error!(group = %self.policy.group(), error = %reason, "Consumer hit a fatal error");
                        return Err(ChannelError::Transport(reason));
                    }
                    tracing::warn!(error = %e, group = %self.policy.group(), "Failed to receive message");
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                    continue;
                }
                None => return Err(ChannelError::Closed),
            };

            let envelope = to_envelope(&message);
            let settlement = self.policy.settle(handler.as_ref(), &envelope, &cancel).await;

            if !settlement.is_committable() {
                // Left uncommitted; the group redelivers it after rebalancing
                break;
            }

            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                tracing::warn!(
                    topic = %envelope.topic,
                    partition = envelope.partition,
                    offset = envelope.offset,
                    error = %e,
                    "Failed to commit offset (message may be redelivered)"
                );
            }
        }

        tracing::info!(group = %self.policy.group(), "Redpanda consumer stopped");
        Ok(())
    }
}

/// Errors after which librdkafka will not recover the client
fn fatal_reason(
    err: &KafkaError,
    client_fatal: Option<(RDKafkaErrorCode, String)>,
) -> Option<String> {
    if let Some((code, reason)) = client_fatal {
        return Some(format!("fatal client error {code:?}: {reason}"));
    }
    (err.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal))
        .then(|| format!("fatal consumer error: {err}"))
}

fn to_envelope(message: &BorrowedMessage<'_>) -> EventEnvelope {
    EventEnvelope {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned())
            .unwrap_or_default(),
        payload: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: message.partition(),
        offset: message.offset(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_consumer_error_stops_consumption() {
        let fatal = KafkaError::MessageConsumption(RDKafkaErrorCode::Fatal);
        assert!(fatal_reason(&fatal, None).is_some());

        let client_fatal = Some((RDKafkaErrorCode::Fatal, "idempotence broken".to_string()));
        let transport = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);
        let reason = fatal_reason(&transport, client_fatal).unwrap();
        assert!(reason.contains("idempotence broken"));
    }

    #[test]
    fn test_transient_consumer_error_keeps_consuming() {
        let transport = KafkaError::MessageConsumption(RDKafkaErrorCode::BrokerTransportFailure);
        assert_eq!(fatal_reason(&transport, None), None);
    }
}
