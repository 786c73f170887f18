use chrono::{DateTime, Utc};

use super::value_objects::{OrderStatus, PaymentMethod};

// ============================================================================
// Order Events - Facts produced by the aggregate's state machine
// ============================================================================
//
// These stay inside the owning service. What crosses service boundaries is
// the wire schema in `crate::events`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum OrderEvent {
    Paid(OrderPaid),
    Cancelled(OrderCancelled),
    Assembled(OrderAssembled),
}

impl OrderEvent {
    /// Status the order is in after this event is applied
    pub fn resulting_status(&self) -> OrderStatus {
        match self {
            OrderEvent::Paid(_) => OrderStatus::Paid,
            OrderEvent::Cancelled(_) => OrderStatus::Cancelled,
            OrderEvent::Assembled(_) => OrderStatus::Assembled,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::Paid(e) => e.paid_at,
            OrderEvent::Cancelled(e) => e.cancelled_at,
            OrderEvent::Assembled(e) => e.assembled_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPaid {
    pub transaction_id: String,
    pub payment_method: PaymentMethod,
    pub paid_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderCancelled {
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderAssembled {
    pub build_time_seconds: u64,
    pub assembled_at: DateTime<Utc>,
}
