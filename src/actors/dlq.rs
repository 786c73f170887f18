use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kameo::actor::ActorRef;
use kameo::error::{Infallible, SendError};
use kameo::message::{Context, Message};
use kameo::Actor;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::order::OrderError;
use crate::metrics::Metrics;

// ============================================================================
// Dead Letter Queue Actor
// ============================================================================
//
// Receives consumed messages that can never be processed (undecodable
// payloads, permanent handler failures) so their partition can move on.
// Provides:
// - Persistent storage of failed messages through a `DeadLetterStore`
// - Queryable for manual intervention
// - Per-topic statistics
//
// Senders use `tell`; the reply is `()` so a storage failure is logged and
// never stops the actor.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DlqMessage {
    pub id: Uuid,
    pub consumer_group: String,
    pub topic: String,
    pub key: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
    pub error_message: String,
    pub failure_count: i32,
    pub failed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DlqStats {
    pub total_messages: i64,
    pub by_topic: HashMap<String, i64>,
}

#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    async fn insert(&self, message: &DlqMessage) -> Result<(), OrderError>;

    /// Most recent first
    async fn list(&self, limit: usize) -> Result<Vec<DlqMessage>, OrderError>;

    async fn stats(&self) -> Result<DlqStats, OrderError>;
}

pub struct DlqActor {
    store: Arc<dyn DeadLetterStore>,
    metrics: Option<Arc<Metrics>>,
}

impl DlqActor {
    pub fn new(store: Arc<dyn DeadLetterStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl Actor for DlqActor {
    type Args = Self;
    type Error = Infallible;

    async fn on_start(state: Self::Args, _actor_ref: ActorRef<Self>) -> Result<Self, Self::Error> {
        tracing::info!("DlqActor started - Dead Letter Queue ready");
        Ok(state)
    }
}

// ============================================================================
// Messages
// ============================================================================

#[derive(Debug, Clone)]
pub struct AddToDlq {
    pub consumer_group: String,
    pub topic: String,
    pub key: String,
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
    pub error_message: String,
    pub failure_count: i32,
}

#[derive(Debug, Clone)]
pub struct GetDlqMessages {
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct GetDlqStats;

// ============================================================================
// Handlers
// ============================================================================

impl Message<AddToDlq> for DlqActor {
    type Reply = ();

    async fn handle(&mut self, msg: AddToDlq, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        let record = DlqMessage {
            id: Uuid::now_v7(),
            consumer_group: msg.consumer_group,
            topic: msg.topic,
            key: msg.key,
            partition: msg.partition,
            offset: msg.offset,
            payload: msg.payload,
            error_message: msg.error_message,
            failure_count: msg.failure_count,
            failed_at: Utc::now(),
        };

        tracing::error!(
            dlq_id = %record.id,
            group = %record.consumer_group,
            topic = %record.topic,
            key = %record.key,
            partition = record.partition,
            offset = record.offset,
            error = %record.error_message,
            "💀 Adding message to Dead Letter Queue"
        );

        match self.store.insert(&record).await {
            Ok(()) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_dead_letter(&record.topic);
                }
                tracing::info!(dlq_id = %record.id, "Message successfully stored in DLQ");
            }
            Err(e) => {
                tracing::error!(
                    dlq_id = %record.id,
                    error = %e,
                    "Failed to store message in DLQ"
                );
            }
        }
    }
}

impl Message<GetDlqMessages> for DlqActor {
    type Reply = Result<Vec<DlqMessage>, OrderError>;

    async fn handle(
        &mut self,
        msg: GetDlqMessages,
        _ctx: &mut Context<Self, Self::Reply>,
    ) -> Self::Reply {
        self.store.list(msg.limit).await
    }
}

impl Message<GetDlqStats> for DlqActor {
    type Reply = Result<DlqStats, OrderError>;

    async fn handle(&mut self, _msg: GetDlqStats, _ctx: &mut Context<Self, Self::Reply>) -> Self::Reply {
        self.store.stats().await
    }
}

/// Ask the actor for its statistics, folding mailbox errors into `OrderError`
pub async fn dlq_stats(dlq: &ActorRef<DlqActor>) -> Result<DlqStats, OrderError> {
    dlq.ask(GetDlqStats).send().await.map_err(unwrap_send_error)
}

pub async fn dlq_messages(dlq: &ActorRef<DlqActor>, limit: usize) -> Result<Vec<DlqMessage>, OrderError> {
    dlq.ask(GetDlqMessages { limit })
        .send()
        .await
        .map_err(unwrap_send_error)
}

fn unwrap_send_error<M>(err: SendError<M, OrderError>) -> OrderError {
    match err {
        SendError::HandlerError(e) => e,
        other => OrderError::Storage(format!("dead letter queue unreachable: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDeadLetterStore;

    fn dead_letter(topic: &str, offset: i64) -> AddToDlq {
        AddToDlq {
            consumer_group: "order-service".to_string(),
            topic: topic.to_string(),
            key: Uuid::new_v4().to_string(),
            partition: 0,
            offset,
            payload: vec![0xde, 0xad],
            error_message: "payload is empty".to_string(),
            failure_count: 1,
        }
    }

    #[tokio::test]
    async fn test_dlq_actor_counts_by_topic() {
        let store = Arc::new(InMemoryDeadLetterStore::new());
        let dlq = DlqActor::spawn(DlqActor::new(store.clone()));

        dlq.tell(dead_letter("assembly-completed", 1)).send().await.unwrap();
        dlq.tell(dead_letter("assembly-completed", 2)).send().await.unwrap();
        dlq.tell(dead_letter("payment-completed", 7)).send().await.unwrap();

        let stats = dlq_stats(&dlq).await.unwrap();
        assert_eq!(stats.total_messages, 3);
        assert_eq!(stats.by_topic.get("assembly-completed"), Some(&2));
        assert_eq!(stats.by_topic.get("payment-completed"), Some(&1));

        let listed = dlq_messages(&dlq, 2).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].offset, 7);
    }
}
