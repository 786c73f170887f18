use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use uuid::Uuid;

use crate::domain::order::{OrderError, PartPrice, PaymentMethod};

// ============================================================================
// External Collaborators - catalog lookup and payment gateway
// ============================================================================

#[async_trait]
pub trait PartCatalog: Send + Sync {
    /// Price every known id; unknown ids are left out of the result
    async fn list_parts(&self, ids: &[Uuid]) -> Result<Vec<PartPrice>, OrderError>;
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Charge the user for the order and return the transaction id
    async fn charge(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
    ) -> Result<String, OrderError>;
}

/// Fixed price list held in memory
#[derive(Debug, Clone, Default)]
pub struct StaticPartCatalog {
    prices: HashMap<Uuid, Decimal>,
}

impl StaticPartCatalog {
    pub fn new(parts: impl IntoIterator<Item = PartPrice>) -> Self {
        Self {
            prices: parts.into_iter().map(|p| (p.id, p.price)).collect(),
        }
    }

    pub fn part_ids(&self) -> Vec<Uuid> {
        self.prices.keys().copied().collect()
    }
}

#[async_trait]
impl PartCatalog for StaticPartCatalog {
    async fn list_parts(&self, ids: &[Uuid]) -> Result<Vec<PartPrice>, OrderError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.prices.get(id).map(|price| PartPrice {
                    id: *id,
                    price: *price,
                })
            })
            .collect())
    }
}

/// Approves every charge with a fresh transaction id, except for users
/// configured to fail and while switched offline
#[derive(Debug, Default)]
pub struct SimulatedPaymentGateway {
    failing_users: HashSet<Uuid>,
    offline: AtomicBool,
}

impl SimulatedPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(users: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            failing_users: users.into_iter().collect(),
            offline: AtomicBool::new(false),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for SimulatedPaymentGateway {
    async fn charge(
        &self,
        user_id: Uuid,
        order_id: Uuid,
        method: PaymentMethod,
    ) -> Result<String, OrderError> {
        if self.offline.load(Ordering::SeqCst) || self.failing_users.contains(&user_id) {
            return Err(OrderError::UpstreamUnavailable(
                "payment gateway did not respond".to_string(),
            ));
        }

        let transaction_id = format!("txn_{}", Uuid::new_v4().simple());
        tracing::debug!(
            order_id = %order_id,
            user_id = %user_id,
            method = %method,
            transaction_id = %transaction_id,
            "Payment approved"
        );
        Ok(transaction_id)
    }
}
