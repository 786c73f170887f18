use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::channel::{ChannelError, EventEnvelope, MessageHandler, Publisher, Subscriber};
use super::settlement::DeliveryPolicy;

// ============================================================================
// In-Memory Broker - partitioned log for tests and single-process runs
// ============================================================================
//
// Each topic has a fixed number of partitions; a key always hashes to the
// same partition. Each consumer group keeps one committed cursor per
// partition. A subscriber works a partition only while holding that
// cursor's lock, so two members of one group never see the same partition
// at the same time. Different partitions are worked independently.
//
// ============================================================================

pub const DEFAULT_PARTITIONS: usize = 4;

#[derive(Clone)]
pub struct InMemoryBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    partitions: usize,
    topics: Mutex<HashMap<String, Arc<TopicLog>>>,
    failing_sends: AtomicU32,
}

struct TopicLog {
    name: String,
    partitions: Vec<Arc<PartitionLog>>,
}

struct PartitionLog {
    records: RwLock<Vec<StoredRecord>>,
    appended: Notify,
    /// Committed offset per consumer group
    cursors: Mutex<HashMap<String, Arc<AsyncMutex<usize>>>>,
}

#[derive(Clone)]
struct StoredRecord {
    key: String,
    payload: Vec<u8>,
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

impl InMemoryBroker {
    pub fn new(partitions: usize) -> Self {
        Self {
            inner: Arc::new(BrokerInner {
                partitions: partitions.max(1),
                topics: Mutex::new(HashMap::new()),
                failing_sends: AtomicU32::new(0),
            }),
        }
    }

    pub fn publisher(&self, topic: impl Into<String>) -> InMemoryPublisher {
        InMemoryPublisher {
            broker: self.clone(),
            topic: topic.into(),
        }
    }

    pub fn subscriber(&self, topics: &[&str], policy: DeliveryPolicy) -> InMemorySubscriber {
        InMemorySubscriber {
            broker: self.clone(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            policy,
        }
    }

    /// Make the next `count` sends fail with `ChannelError::Unavailable`
    pub fn fail_next_sends(&self, count: u32) {
        self.inner.failing_sends.store(count, Ordering::SeqCst);
    }

    pub fn partition_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.inner.partitions as u64) as usize
    }

    /// Every record on `topic`, partition by partition in offset order
    pub fn records(&self, topic: &str) -> Vec<EventEnvelope> {
        let log = self.topic(topic);
        let mut out = Vec::new();
        for (partition, part) in log.partitions.iter().enumerate() {
            let records = part.records.read().unwrap_or_else(|e| e.into_inner());
            for (offset, record) in records.iter().enumerate() {
                out.push(envelope(&log.name, partition, offset, record));
            }
        }
        out
    }

    /// Committed offset of `group` on one partition
    pub fn committed(&self, topic: &str, group: &str, partition: usize) -> Option<usize> {
        let log = self.topic(topic);
        let part = log.partitions.get(partition)?;
        let cursor = part.cursor(group);
        let committed = cursor.try_lock().map(|c| *c).ok();
        committed
    }

    fn topic(&self, name: &str) -> Arc<TopicLog> {
        let mut topics = self.inner.topics.lock().unwrap_or_else(|e| e.into_inner());
        topics
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(TopicLog {
                    name: name.to_string(),
                    partitions: (0..self.inner.partitions)
                        .map(|_| {
                            Arc::new(PartitionLog {
                                records: RwLock::new(Vec::new()),
                                appended: Notify::new(),
                                cursors: Mutex::new(HashMap::new()),
                            })
                        })
                        .collect(),
                })
            })
            .clone()
    }

    fn take_injected_failure(&self) -> bool {
        self.inner
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl PartitionLog {
    fn cursor(&self, group: &str) -> Arc<AsyncMutex<usize>> {
        let mut cursors = self.cursors.lock().unwrap_or_else(|e| e.into_inner());
        cursors
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(0)))
            .clone()
    }

    fn get(&self, offset: usize) -> Option<StoredRecord> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        records.get(offset).cloned()
    }
}

fn envelope(topic: &str, partition: usize, offset: usize, record: &StoredRecord) -> EventEnvelope {
    EventEnvelope {
        topic: topic.to_string(),
        key: record.key.clone(),
        payload: record.payload.clone(),
        partition: partition as i32,
        offset: offset as i64,
    }
}

// ============================================================================
// Publisher
// ============================================================================

#[derive(Clone)]
pub struct InMemoryPublisher {
    broker: InMemoryBroker,
    topic: String,
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn send(&self, key: &str, payload: Vec<u8>) -> Result<(), ChannelError> {
        if self.broker.take_injected_failure() {
            return Err(ChannelError::Unavailable(format!(
                "in-memory broker refused send to {}",
                self.topic
            )));
        }

        let log = self.broker.topic(&self.topic);
        let partition = self.broker.partition_for(key);
        let part = &log.partitions[partition];

        let offset = {
            let mut records = part.records.write().unwrap_or_else(|e| e.into_inner());
            records.push(StoredRecord {
                key: key.to_string(),
                payload,
            });
            records.len() - 1
        };
        part.appended.notify_waiters();

        tracing::debug!(
            topic = %self.topic,
            key = %key,
            partition = partition,
            offset = offset,
            "Appended to in-memory log"
        );
        Ok(())
    }
}

// ============================================================================
// Subscriber
// ============================================================================

pub struct InMemorySubscriber {
    broker: InMemoryBroker,
    topics: Vec<String>,
    policy: DeliveryPolicy,
}

#[async_trait]
impl Subscriber for InMemorySubscriber {
    async fn consume(
        &self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> Result<(), ChannelError> {
        let mut workers = JoinSet::new();

        for topic in &self.topics {
            let log = self.broker.topic(topic);
            for (partition, part) in log.partitions.iter().enumerate() {
                workers.spawn(work_partition(
                    log.name.clone(),
                    partition,
                    part.clone(),
                    self.policy.clone(),
                    handler.clone(),
                    cancel.clone(),
                ));
            }
        }

        tracing::info!(
            topics = ?self.topics,
            group = %self.policy.group(),
            partitions = workers.len(),
            "Subscribed to in-memory topics"
        );

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Partition worker failed");
                cancel.cancel();
                return Err(ChannelError::Transport(e.to_string()));
            }
        }

        tracing::debug!(group = %self.policy.group(), "In-memory consumer stopped");
        Ok(())
    }
}

async fn work_partition(
    topic: String,
    partition: usize,
    part: Arc<PartitionLog>,
    policy: DeliveryPolicy,
    handler: Arc<dyn MessageHandler>,
    cancel: CancellationToken,
) {
    // Holding the cursor is holding the partition lease for this group
    let cursor = part.cursor(policy.group());
    let mut committed = tokio::select! {
        _ = cancel.cancelled() => return,
        lease = cursor.lock_owned() => lease,
    };

    loop {
        let appended = part.appended.notified();

        let Some(record) = part.get(*committed) else {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = appended => {}
            }
            continue;
        };

        let message = envelope(&topic, partition, *committed, &record);
        let settlement = policy.settle(handler.as_ref(), &message, &cancel).await;

        if !settlement.is_committable() {
            return;
        }
        *committed += 1;
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::HandlerError;
    use std::time::Duration;
    use tokio::sync::mpsc;

    struct Forward(mpsc::UnboundedSender<EventEnvelope>);

    #[async_trait]
    impl MessageHandler for Forward {
        async fn handle(&self, message: &EventEnvelope, _: &CancellationToken) -> Result<(), HandlerError> {
            let _ = self.0.send(message.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_same_key_is_delivered_in_send_order() {
        let broker = InMemoryBroker::new(4);
        let publisher = broker.publisher("payment-completed");
        for i in 0..20u8 {
            publisher.send("order-a", vec![i]).await.unwrap();
        }

        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let subscriber = broker.subscriber(&["payment-completed"], DeliveryPolicy::new("g"));
        let consumer = {
            let cancel = cancel.clone();
            tokio::spawn(async move { subscriber.consume(Arc::new(Forward(tx)), cancel).await })
        };

        for i in 0..20u8 {
            let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(message.payload, vec![i]);
            assert_eq!(message.key, "order-a");
        }

        cancel.cancel();
        assert!(consumer.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_groups_consume_independently() {
        let broker = InMemoryBroker::default();
        broker.publisher("t").send("k", vec![7]).await.unwrap();

        let cancel = CancellationToken::new();
        let mut receivers = Vec::new();
        for group in ["one", "two"] {
            let (tx, rx) = mpsc::unbounded_channel();
            receivers.push(rx);
            let subscriber = broker.subscriber(&["t"], DeliveryPolicy::new(group));
            let cancel = cancel.clone();
            tokio::spawn(async move { subscriber.consume(Arc::new(Forward(tx)), cancel).await });
        }

        for rx in receivers.iter_mut() {
            let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(message.payload, vec![7]);
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_late_publish_wakes_idle_consumer() {
        let broker = InMemoryBroker::new(1);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let subscriber = broker.subscriber(&["t"], DeliveryPolicy::new("g"));
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { subscriber.consume(Arc::new(Forward(tx)), cancel).await });
        }

        tokio::time::sleep(Duration::from_millis(20)).await;
        broker.publisher("t").send("k", vec![1]).await.unwrap();

        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.offset, 0);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_injected_failures_reject_sends() {
        let broker = InMemoryBroker::default();
        let publisher = broker.publisher("t");
        broker.fail_next_sends(1);

        assert!(matches!(
            publisher.send("k", vec![1]).await,
            Err(ChannelError::Unavailable(_))
        ));
        publisher.send("k", vec![2]).await.unwrap();
        assert_eq!(broker.records("t").len(), 1);
    }

    #[tokio::test]
    async fn test_abandoned_message_is_redelivered_to_next_member() {
        struct CancelOnce;

        #[async_trait]
        impl MessageHandler for CancelOnce {
            async fn handle(&self, _: &EventEnvelope, _: &CancellationToken) -> Result<(), HandlerError> {
                Err(HandlerError::Cancelled)
            }
        }

        let broker = InMemoryBroker::new(1);
        broker.publisher("t").send("k", vec![9]).await.unwrap();

        // First member gives up without acking
        let first = broker.subscriber(&["t"], DeliveryPolicy::new("g"));
        first
            .consume(Arc::new(CancelOnce), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(broker.committed("t", "g", 0), Some(0));

        // Next member picks the same offset up
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let second = broker.subscriber(&["t"], DeliveryPolicy::new("g"));
        {
            let cancel = cancel.clone();
            tokio::spawn(async move { second.consume(Arc::new(Forward(tx)), cancel).await });
        }
        let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(message.offset, 0);
        assert_eq!(message.payload, vec![9]);
        cancel.cancel();
    }
}
