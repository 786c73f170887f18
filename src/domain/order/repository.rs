use async_trait::async_trait;
use uuid::Uuid;

use super::aggregate::Order;
use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::OrderEvent;
use super::value_objects::OrderStatus;

// ============================================================================
// Order Repository - Persistence contract for the aggregate
// ============================================================================
//
// `update` is the only way to mutate a stored order. It runs
// Command -> Aggregate -> Events as one read-modify-write, so two mutations
// of the same order never interleave. Unrelated orders do not contend.
//
// ============================================================================

#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Fails with `AlreadyExists` if the id is taken
    async fn create(&self, order: &Order) -> Result<(), OrderError>;

    /// Fails with `NotFound` if absent
    async fn get(&self, id: Uuid) -> Result<Order, OrderError>;

    /// Apply a command to the stored order atomically. Fails with `NotFound`
    /// if the order vanished, or with the aggregate's rejection.
    async fn update(&self, id: Uuid, command: &OrderCommand) -> Result<CommandOutcome, OrderError>;
}

/// Result of a successful `update`
#[derive(Debug, Clone)]
pub struct CommandOutcome {
    pub previous_status: OrderStatus,
    pub order: Order,
    /// Empty when the command was already satisfied and nothing was written
    pub events: Vec<OrderEvent>,
}

impl CommandOutcome {
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }
}
