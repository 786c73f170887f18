use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::events::EventCodec;
use crate::messaging::{EventEnvelope, HandlerError, MessageHandler};

// ============================================================================
// Notification Consumer
// ============================================================================
//
// Observes both saga topics under its own consumer group and tells the user
// what happened. It never touches order state.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub user_id: Uuid,
    pub order_id: Uuid,
    pub subject: String,
    pub body: String,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), HandlerError>;
}

/// Writes notifications to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), HandlerError> {
        tracing::info!(
            user_id = %notification.user_id,
            order_id = %notification.order_id,
            subject = %notification.subject,
            "📧 {}",
            notification.body
        );
        Ok(())
    }
}

pub struct NotificationConsumer {
    codec: Arc<dyn EventCodec>,
    notifier: Arc<dyn Notifier>,
    payment_topic: String,
    assembly_topic: String,
}

impl NotificationConsumer {
    pub fn new(
        codec: Arc<dyn EventCodec>,
        notifier: Arc<dyn Notifier>,
        payment_topic: impl Into<String>,
        assembly_topic: impl Into<String>,
    ) -> Self {
        Self {
            codec,
            notifier,
            payment_topic: payment_topic.into(),
            assembly_topic: assembly_topic.into(),
        }
    }

    fn render(&self, message: &EventEnvelope) -> Result<Notification, HandlerError> {
        if message.topic == self.payment_topic {
            let event = self.codec.decode_payment_completed(&message.payload)?;
            Ok(Notification {
                user_id: event.user_id,
                order_id: event.order_id,
                subject: "Payment received".to_string(),
                body: format!(
                    "We received your {} payment for order {} (transaction {}). Assembly starts now.",
                    event.payment_method, event.order_id, event.transaction_id
                ),
            })
        } else if message.topic == self.assembly_topic {
            let event = self.codec.decode_assembly_completed(&message.payload)?;
            Ok(Notification {
                user_id: event.user_id,
                order_id: event.order_id,
                subject: "Order assembled".to_string(),
                body: format!(
                    "Order {} has been assembled in {}s.",
                    event.order_id, event.build_time_seconds
                ),
            })
        } else {
            Err(HandlerError::Permanent(format!(
                "no notification for topic {}",
                message.topic
            )))
        }
    }
}

#[async_trait]
impl MessageHandler for NotificationConsumer {
    async fn handle(
        &self,
        message: &EventEnvelope,
        _cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        let notification = self.render(message)?;
        self.notifier.notify(&notification).await
    }
}
