use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::build_delay::{BuildDelay, RandomBuildDelay};
use crate::events::{AssemblyCompleted, EventCodec, PaymentCompleted};
use crate::messaging::{EventEnvelope, HandlerError, MessageHandler, Publisher};
use crate::metrics::Metrics;
use crate::utils::{retry_on_transient, RetryConfig};

// ============================================================================
// Assembly Worker - turns PaymentCompleted into AssemblyCompleted
// ============================================================================
//
// Each payment triggers a simulated build of random length. The wait races
// the consumer's cancellation token, and so does the publish that follows:
// shutdown abandons the build without publishing, and the unacknowledged
// PaymentCompleted is redelivered later.
//
// ============================================================================

pub struct AssemblyWorker {
    codec: Arc<dyn EventCodec>,
    assembly_completed: Arc<dyn Publisher>,
    delay: Arc<dyn BuildDelay>,
    publish_retry: RetryConfig,
    metrics: Option<Arc<Metrics>>,
}

impl AssemblyWorker {
    pub fn new(codec: Arc<dyn EventCodec>, assembly_completed: Arc<dyn Publisher>) -> Self {
        Self {
            codec,
            assembly_completed,
            delay: Arc::new(RandomBuildDelay),
            publish_retry: RetryConfig::aggressive(),
            metrics: None,
        }
    }

    pub fn with_delay(mut self, delay: Arc<dyn BuildDelay>) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_publish_retry(mut self, retry: RetryConfig) -> Self {
        self.publish_retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub async fn on_payment_completed(
        &self,
        event: &PaymentCompleted,
        cancel: &CancellationToken,
    ) -> Result<AssemblyCompleted, HandlerError> {
        let delay = self.delay.next_delay();
        let build_time_seconds = delay.as_secs().max(1);

        tracing::info!(
            order_id = %event.order_id,
            build_time_seconds = build_time_seconds,
            "🔧 Assembly started"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(order_id = %event.order_id, "Assembly interrupted by shutdown");
                return Err(HandlerError::Cancelled);
            }
            _ = tokio::time::sleep(delay) => {}
        }

        let completed = AssemblyCompleted::new(event.order_id, event.user_id, build_time_seconds);
        let key = completed.partition_key();
        let payload = self.codec.encode_assembly_completed(&completed);
        let topic = self.assembly_completed.topic().to_string();

        let publish = retry_on_transient(self.publish_retry.clone(), |_| {
            self.assembly_completed.send(&key, payload.clone())
        });
        let published = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(
                    order_id = %event.order_id,
                    topic = %topic,
                    "Publish abandoned by shutdown, payment will be redelivered"
                );
                return Err(HandlerError::Cancelled);
            }
            result = publish => result.into_result(),
        };

        if let Some(metrics) = &self.metrics {
            metrics.record_publish(&topic, published.is_ok());
        }

        match published {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.assembly_build_time.observe(build_time_seconds as f64);
                }
                tracing::info!(
                    order_id = %completed.order_id,
                    event_id = %completed.event_id,
                    build_time_seconds = build_time_seconds,
                    "📤 AssemblyCompleted published"
                );
                Ok(completed)
            }
            Err(e) => {
                tracing::error!(
                    order_id = %event.order_id,
                    topic = %topic,
                    error = %e,
                    "Failed to publish AssemblyCompleted"
                );
                Err(e.into())
            }
        }
    }
}

#[async_trait]
impl MessageHandler for AssemblyWorker {
    async fn handle(
        &self,
        message: &EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let event = self.codec.decode_payment_completed(&message.payload)?;
        self.on_payment_completed(&event, cancel).await?;
        Ok(())
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
