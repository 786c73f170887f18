use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use crate::actors::dlq::{DeadLetterStore, DlqMessage, DlqStats};
use crate::domain::order::{CommandOutcome, Order, OrderCommand, OrderError, OrderRepository};
use crate::domain::Aggregate;

// ============================================================================
// In-Memory Order Repository
// ============================================================================
//
// One async mutex per order: a mutation holds its order's lock for the whole
// read-modify-write, and unrelated orders never share a lock. The outer map
// lock is only held long enough to find or insert a cell.
//
// ============================================================================

#[derive(Default)]
pub struct InMemoryOrderRepository {
    orders: RwLock<HashMap<Uuid, Arc<Mutex<Order>>>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }

    async fn cell(&self, id: Uuid) -> Result<Arc<Mutex<Order>>, OrderError> {
        self.orders
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrderError::NotFound(id))
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderError::AlreadyExists(order.id));
        }
        orders.insert(order.id, Arc::new(Mutex::new(order.clone())));
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order, OrderError> {
        let cell = self.cell(id).await?;
        let order = cell.lock().await.clone();
        Ok(order)
    }

    async fn update(&self, id: Uuid, command: &OrderCommand) -> Result<CommandOutcome, OrderError> {
        let cell = self.cell(id).await?;
        let mut stored = cell.lock().await;

        // Work on a draft so a rejected command leaves the stored order untouched
        let previous_status = stored.status;
        let mut draft = stored.clone();
        let events = draft.execute(command)?;

        if !events.is_empty() {
            *stored = draft.clone();
        }

        Ok(CommandOutcome {
            previous_status,
            order: draft,
            events,
        })
    }
}

// ============================================================================
// In-Memory Dead Letter Store
// ============================================================================

#[derive(Default)]
pub struct InMemoryDeadLetterStore {
    messages: Mutex<VecDeque<DlqMessage>>,
}

impl InMemoryDeadLetterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DeadLetterStore for InMemoryDeadLetterStore {
    async fn insert(&self, message: &DlqMessage) -> Result<(), OrderError> {
        self.messages.lock().await.push_front(message.clone());
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DlqMessage>, OrderError> {
        let messages = self.messages.lock().await;
        Ok(messages.iter().take(limit).cloned().collect())
    }

    async fn stats(&self) -> Result<DlqStats, OrderError> {
        let messages = self.messages.lock().await;
        let mut stats = DlqStats::default();
        for message in messages.iter() {
            stats.total_messages += 1;
            *stats.by_topic.entry(message.topic.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
