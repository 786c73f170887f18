use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use scylla::client::session::Session;
use scylla::client::session_builder::SessionBuilder;
use scylla::response::query_result::QueryResult;
use scylla::value::{CqlValue, Row};
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

use crate::actors::dlq::{DeadLetterStore, DlqMessage, DlqStats};
use crate::domain::order::{
    CommandOutcome, Order, OrderCommand, OrderError, OrderItem, OrderRepository, OrderStatus,
    PaymentMethod,
};
use crate::domain::Aggregate;

// ============================================================================
// ScyllaDB Persistence
// ============================================================================
//
// Orders live in one row each with a `version` column. Writes are
// lightweight transactions:
// - create: INSERT ... IF NOT EXISTS
// - update: read, run the command, UPDATE ... IF version = <read version>
//   and start over from a fresh read when another writer got there first
//
// A compare-and-set on the version gives the same per-order serialization
// as a lock, across processes.
//
// ============================================================================

const MAX_CAS_ATTEMPTS: u32 = 16;

/// Connect, make sure the keyspace and tables exist, and switch to the keyspace
pub async fn connect(nodes: &[String], keyspace: &str) -> Result<Arc<Session>, OrderError> {
    tracing::info!(nodes = ?nodes, keyspace = %keyspace, "Connecting to ScyllaDB...");

    let session: Session = SessionBuilder::new()
        .known_nodes(nodes)
        .build()
        .await
        .map_err(storage)?;

    ensure_schema(&session, keyspace).await?;
    Ok(Arc::new(session))
}

pub async fn ensure_schema(session: &Session, keyspace: &str) -> Result<(), OrderError> {
    session
        .query_unpaged(
            format!(
                "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH REPLICATION = \
                 {{'class': 'SimpleStrategy', 'replication_factor': 1}}"
            ),
            &[],
        )
        .await
        .map_err(storage)?;

    session.use_keyspace(keyspace, false).await.map_err(storage)?;

    session
        .query_unpaged(
            "CREATE TABLE IF NOT EXISTS orders (
                order_id uuid PRIMARY KEY,
                user_id uuid,
                items text,
                total_price text,
                status text,
                transaction_id text,
                payment_method text,
                version bigint,
                created_at timestamp,
                updated_at timestamp
            )",
            &[],
        )
        .await
        .map_err(storage)?;

    session
        .query_unpaged(
            "CREATE TABLE IF NOT EXISTS dead_letter_queue (
                id uuid PRIMARY KEY,
                consumer_group text,
                topic text,
                message_key text,
                partition_id int,
                message_offset bigint,
                payload blob,
                error_message text,
                failure_count int,
                failed_at timestamp
            )",
            &[],
        )
        .await
        .map_err(storage)?;

    tracing::info!(keyspace = %keyspace, "ScyllaDB schema ready");
    Ok(())
}

fn storage<E: Display>(err: E) -> OrderError {
    OrderError::Storage(err.to_string())
}

/// A row that was read fine but cannot be turned back into an order
fn corrupt<E: Display>(err: E) -> OrderError {
    OrderError::CorruptRecord(err.to_string())
}

/// Read the `[applied]` column of a lightweight transaction result
fn lwt_applied(result: QueryResult) -> Result<bool, OrderError> {
    let rows = result.into_rows_result().map_err(storage)?;
    let first = rows.maybe_first_row::<Row>().map_err(storage)?;
    let applied = first.and_then(|row| row.columns.into_iter().next().flatten());
    Ok(matches!(applied, Some(CqlValue::Boolean(true))))
}

// ============================================================================
// Order Repository
// ============================================================================

type OrderRow = (
    Uuid,
    Uuid,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    i64,
    DateTime<Utc>,
    DateTime<Utc>,
);

pub struct ScyllaOrderRepository {
    session: Arc<Session>,
}

impl ScyllaOrderRepository {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    fn from_row(row: OrderRow) -> Result<Order, OrderError> {
        let (
            id,
            user_id,
            items,
            total_price,
            status,
            transaction_id,
            payment_method,
            version,
            created_at,
            updated_at,
        ) = row;

        let items: Vec<OrderItem> = serde_json::from_str(&items).map_err(corrupt)?;
        let total_price = Decimal::from_str(&total_price).map_err(corrupt)?;
        let status = OrderStatus::from_str(&status).map_err(corrupt)?;
        let payment_method = payment_method
            .as_deref()
            .map(PaymentMethod::from_str)
            .transpose()
            .map_err(corrupt)?;

        Ok(Order {
            id,
            version,
            user_id,
            items,
            total_price,
            status,
            transaction_id,
            payment_method,
            created_at,
            updated_at,
        })
    }
}

#[async_trait]
impl OrderRepository for ScyllaOrderRepository {
    async fn create(&self, order: &Order) -> Result<(), OrderError> {
        let items = serde_json::to_string(&order.items).map_err(storage)?;

        let result = self
            .session
            .query_unpaged(
                "INSERT INTO orders (
                    order_id, user_id, items, total_price, status,
                    transaction_id, payment_method, version, created_at, updated_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) IF NOT EXISTS",
                (
                    order.id,
                    order.user_id,
                    items,
                    order.total_price.to_string(),
                    order.status.as_str(),
                    order.transaction_id.as_deref(),
                    order.payment_method.map(|m| m.as_str()),
                    order.version,
                    order.created_at,
                    order.updated_at,
                ),
            )
            .await
            .map_err(storage)?;

        if !lwt_applied(result)? {
            return Err(OrderError::AlreadyExists(order.id));
        }

        tracing::debug!(order_id = %order.id, "Inserted order row");
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Order, OrderError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT order_id, user_id, items, total_price, status,
                        transaction_id, payment_method, version, created_at, updated_at
                 FROM orders WHERE order_id = ?",
                (id,),
            )
            .await
            .map_err(storage)?;

        let rows = result.into_rows_result().map_err(storage)?;
        match rows.maybe_first_row::<OrderRow>().map_err(storage)? {
            Some(row) => Self::from_row(row),
            None => Err(OrderError::NotFound(id)),
        }
    }

    async fn update(&self, id: Uuid, command: &OrderCommand) -> Result<CommandOutcome, OrderError> {
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let stored = self.get(id).await?;
            let previous_status = stored.status;
            let expected_version = stored.version;

            let mut draft = stored;
            let events = draft.execute(command)?;

            if events.is_empty() {
                return Ok(CommandOutcome {
                    previous_status,
                    order: draft,
                    events,
                });
            }

            let result = self
                .session
                .query_unpaged(
                    "UPDATE orders SET status = ?, transaction_id = ?, payment_method = ?,
                            version = ?, updated_at = ?
                     WHERE order_id = ? IF version = ?",
                    (
                        draft.status.as_str(),
                        draft.transaction_id.as_deref(),
                        draft.payment_method.map(|m| m.as_str()),
                        draft.version,
                        draft.updated_at,
                        id,
                        expected_version,
                    ),
                )
                .await
                .map_err(storage)?;

            if lwt_applied(result)? {
                return Ok(CommandOutcome {
                    previous_status,
                    order: draft,
                    events,
                });
            }

            tracing::debug!(
                order_id = %id,
                attempt = attempt,
                expected_version = expected_version,
                "Concurrent update won the race, re-reading order"
            );
        }

        Err(OrderError::Storage(format!(
            "order {id} still contended after {MAX_CAS_ATTEMPTS} attempts"
        )))
    }
}

// ============================================================================
// Dead Letter Store
// ============================================================================

type DlqRow = (
    Uuid,
    String,
    String,
    String,
    i32,
    i64,
    Vec<u8>,
    String,
    i32,
    DateTime<Utc>,
);

pub struct ScyllaDeadLetterStore {
    session: Arc<Session>,
}

impl ScyllaDeadLetterStore {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl DeadLetterStore for ScyllaDeadLetterStore {
    async fn insert(&self, message: &DlqMessage) -> Result<(), OrderError> {
        self.session
            .query_unpaged(
                "INSERT INTO dead_letter_queue (
                    id, consumer_group, topic, message_key, partition_id,
                    message_offset, payload, error_message, failure_count, failed_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    message.id,
                    &message.consumer_group,
                    &message.topic,
                    &message.key,
                    message.partition,
                    message.offset,
                    &message.payload,
                    &message.error_message,
                    message.failure_count,
                    message.failed_at,
                ),
            )
            .await
            .map_err(|e| OrderError::Storage(format!("Failed to insert into DLQ: {e}")))?;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<DlqMessage>, OrderError> {
        let result = self
            .session
            .query_unpaged(
                "SELECT id, consumer_group, topic, message_key, partition_id,
                        message_offset, payload, error_message, failure_count, failed_at
                 FROM dead_letter_queue",
                &[],
            )
            .await
            .map_err(|e| OrderError::Storage(format!("Failed to query DLQ: {e}")))?;

        let rows = result.into_rows_result().map_err(storage)?;
        let mut messages = Vec::new();
        for row in rows.rows::<DlqRow>().map_err(storage)? {
            let (
                id,
                consumer_group,
                topic,
                key,
                partition,
                offset,
                payload,
                error_message,
                failure_count,
                failed_at,
            ) = row.map_err(storage)?;

            messages.push(DlqMessage {
                id,
                consumer_group,
                topic,
                key,
                partition,
                offset,
                payload,
                error_message,
                failure_count,
                failed_at,
            });
        }

        messages.sort_by(|a, b| b.failed_at.cmp(&a.failed_at));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn stats(&self) -> Result<DlqStats, OrderError> {
        let result = self
            .session
            .query_unpaged("SELECT topic FROM dead_letter_queue", &[])
            .await
            .map_err(|e| OrderError::Storage(format!("Failed to count DLQ messages: {e}")))?;

        let rows = result.into_rows_result().map_err(storage)?;
        let mut stats = DlqStats::default();
        for row in rows.rows::<(String,)>().map_err(storage)? {
            let (topic,) = row.map_err(storage)?;
            stats.total_messages += 1;
            *stats.by_topic.entry(topic).or_insert(0) += 1;
        }
        Ok(stats)
    }
}
