use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::commands::OrderCommand;
use super::errors::OrderError;
use super::events::*;
use super::value_objects::{OrderItem, OrderStatus, PaymentMethod};
use crate::domain::Aggregate;

// ============================================================================
// Order Aggregate - Domain Logic
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Order {
    // Identity
    pub id: Uuid,
    pub version: i64,

    // Immutable after creation
    pub user_id: Uuid,
    pub items: Vec<OrderItem>,
    pub total_price: Decimal,

    // Current State
    pub status: OrderStatus,
    pub transaction_id: Option<String>,
    pub payment_method: Option<PaymentMethod>,

    // Audit Trail
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Build a new order awaiting payment. The total is fixed here and never
    /// recomputed.
    pub fn new(id: Uuid, user_id: Uuid, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        Self::validate_items(&items)?;

        let total_price = Self::total_of(&items)?;
        let now = Utc::now();

        Ok(Self {
            id,
            version: 0,
            user_id,
            items,
            total_price,
            status: OrderStatus::PendingPayment,
            transaction_id: None,
            payment_method: None,
            created_at: now,
            updated_at: now,
        })
    }

    fn total_of(items: &[OrderItem]) -> Result<Decimal, OrderError> {
        items.iter().try_fold(Decimal::ZERO, |total, item| {
            item.line_total()
                .and_then(|line| total.checked_add(line))
                .ok_or_else(|| {
                    OrderError::InvalidOrderData("order total exceeds the supported range".to_string())
                })
        })
    }

    fn validate_items(items: &[OrderItem]) -> Result<(), OrderError> {
        if items.is_empty() {
            return Err(OrderError::InvalidOrderData(
                "order must contain at least one item".to_string(),
            ));
        }

        for item in items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidOrderData(format!(
                    "part {} has zero quantity",
                    item.part_id
                )));
            }
            if item.unit_price.is_sign_negative() {
                return Err(OrderError::InvalidOrderData(format!(
                    "part {} has negative price {}",
                    item.part_id, item.unit_price
                )));
            }
        }

        Ok(())
    }
}

// ============================================================================
// Aggregate Trait Implementation
// ============================================================================

impl Aggregate for Order {
    type Event = OrderEvent;
    type Command = OrderCommand;
    type Error = OrderError;

    fn handle_command(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::Pay {
                transaction_id,
                payment_method,
            } => {
                if self.status != OrderStatus::PendingPayment {
                    return Err(OrderError::OrderCannotBePaid(self.status));
                }
                if transaction_id.trim().is_empty() {
                    return Err(OrderError::InvalidOrderData(
                        "payment returned an empty transaction id".to_string(),
                    ));
                }

                Ok(vec![OrderEvent::Paid(OrderPaid {
                    transaction_id: transaction_id.clone(),
                    payment_method: *payment_method,
                    paid_at: Utc::now(),
                })])
            }

            OrderCommand::Cancel => {
                if self.status != OrderStatus::PendingPayment {
                    return Err(OrderError::OrderCannotBeCancelled(self.status));
                }

                Ok(vec![OrderEvent::Cancelled(OrderCancelled {
                    cancelled_at: Utc::now(),
                })])
            }

            OrderCommand::CompleteAssembly { build_time_seconds } => match self.status {
                OrderStatus::Paid => Ok(vec![OrderEvent::Assembled(OrderAssembled {
                    build_time_seconds: *build_time_seconds,
                    assembled_at: Utc::now(),
                })]),
                // Redelivery of an event already applied
                OrderStatus::Assembled => Ok(vec![]),
                other => Err(OrderError::OrderCannotBeAssembled(other)),
            },
        }
    }

    fn apply_event(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::Paid(e) => {
                self.transaction_id = Some(e.transaction_id.clone());
                self.payment_method = Some(e.payment_method);
            }
            OrderEvent::Cancelled(_) | OrderEvent::Assembled(_) => {}
        }

        self.status = event.resulting_status();
        self.updated_at = event.occurred_at();
        self.version += 1;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
