use uuid::Uuid;

use crate::domain::order::PaymentMethod;

// ============================================================================
// Integration Events - Cross-service contract
// ============================================================================
//
// Both events are keyed by `order_id` on the wire so that everything about
// one order lands on one partition, in order.
//
// ============================================================================

/// Emitted by the order service once an order is `Paid`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentCompleted {
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    pub payment_method: PaymentMethod,
    pub transaction_id: String,
}

/// Emitted by the assembly worker after the simulated build finishes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyCompleted {
    pub event_id: Uuid,
    pub order_id: Uuid,
    pub user_id: Uuid,
    /// Always at least 1
    pub build_time_seconds: u64,
}

impl PaymentCompleted {
    pub fn new(order_id: Uuid, user_id: Uuid, payment_method: PaymentMethod, transaction_id: String) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            order_id,
            user_id,
            payment_method,
            transaction_id,
        }
    }

    pub fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}

impl AssemblyCompleted {
    pub fn new(order_id: Uuid, user_id: Uuid, build_time_seconds: u64) -> Self {
        Self {
            event_id: Uuid::now_v7(),
            order_id,
            user_id,
            build_time_seconds,
        }
    }

    pub fn partition_key(&self) -> String {
        self.order_id.to_string()
    }
}
