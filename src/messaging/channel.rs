use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::domain::order::OrderError;
use crate::events::DecodeError;
use crate::utils::IsTransient;

// ============================================================================
// Channel Contracts - publish / subscribe over a partitioned log
// ============================================================================
//
// Publish: messages sharing a key reach consumers in send order. `send` never
// retries; the caller owns its retry policy.
//
// Subscribe: at-least-once. A message is handed to exactly one member of a
// group at a time, and the next message of a partition is not requested
// until the handler has settled the current one.
//
// ============================================================================

/// A message as seen by a consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventEnvelope {
    pub topic: String,
    /// Partition key, always the order id
    pub key: String,
    pub payload: Vec<u8>,
    pub partition: i32,
    pub offset: i64,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    #[error("publish to {topic} failed: {reason}")]
    PublishFailed { topic: String, reason: String },

    #[error("subscription to {topics:?} failed: {reason}")]
    SubscriptionFailed { topics: Vec<String>, reason: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel closed")]
    Closed,
}

impl IsTransient for ChannelError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ChannelError::Unavailable(_)
                | ChannelError::PublishFailed { .. }
                | ChannelError::Transport(_)
        )
    }
}

/// How a handler failed, which decides what happens to the message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Redeliver after a backoff
    #[error("transient failure: {0}")]
    Transient(String),

    /// Will never succeed; dead-letter and move on
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Shutdown interrupted the handler; leave the message unacknowledged
    #[error("handler cancelled")]
    Cancelled,
}

impl From<OrderError> for HandlerError {
    fn from(err: OrderError) -> Self {
        if err.is_transient() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }
}

impl From<DecodeError> for HandlerError {
    fn from(err: DecodeError) -> Self {
        HandlerError::Permanent(err.to_string())
    }
}

impl From<ChannelError> for HandlerError {
    fn from(err: ChannelError) -> Self {
        if err.is_transient() {
            HandlerError::Transient(err.to_string())
        } else {
            HandlerError::Permanent(err.to_string())
        }
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Durably append `payload` under `key`. No internal retry.
    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), ChannelError>;
}

#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Must be idempotent: the same message may arrive more than once
    async fn handle(
        &self,
        message: &EventEnvelope,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Feed messages to `handler` until `cancel` fires (Ok) or the connection
    /// fails for good (Err).
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::OrderStatus;

    #[test]
    fn test_handler_error_classification() {
        let decode: HandlerError = OrderError::Decode(DecodeError::Empty).into();
        assert!(matches!(decode, HandlerError::Permanent(_)));

        let unavailable: HandlerError = OrderError::UpstreamUnavailable("down".into()).into();
        assert!(matches!(unavailable, HandlerError::Transient(_)));

        let conflict: HandlerError = OrderError::OrderCannotBeAssembled(OrderStatus::Cancelled).into();
        assert!(matches!(conflict, HandlerError::Permanent(_)));

        let corrupt: HandlerError = OrderError::CorruptRecord("items not json".into()).into();
        assert!(matches!(corrupt, HandlerError::Permanent(_)));

        let closed: HandlerError = ChannelError::Closed.into();
        assert!(matches!(closed, HandlerError::Permanent(_)));

        let transport: HandlerError = ChannelError::Transport("reset".into()).into();
        assert!(matches!(transport, HandlerError::Transient(_)));
    }
}
