use async_trait::async_trait;
use kameo::actor::ActorRef;
use kameo::Actor;
use rust_decimal::Decimal;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use order_assembly::actors::{dlq_messages, dlq_stats, Coordinator, DlqActor};
use order_assembly::config::{ASSEMBLY_WORKER_GROUP, NOTIFIER_GROUP, ORDER_SERVICE_GROUP};
use order_assembly::domain::order::{OrderError, OrderStatus, PartPrice, PaymentMethod};
use order_assembly::events::{EventCodec, ProtobufCodec};
use order_assembly::messaging::{DeliveryPolicy, HandlerError, InMemoryBroker, Publisher};
use order_assembly::service::{
    AssemblyWorker, FixedBuildDelay, Notification, NotificationConsumer, Notifier, OrderService,
    SimulatedPaymentGateway, StaticPartCatalog,
};
use order_assembly::store::{InMemoryDeadLetterStore, InMemoryOrderRepository};
use order_assembly::utils::RetryConfig;

const PAYMENT_TOPIC: &str = "payment-completed";
const ASSEMBLY_TOPIC: &str = "assembly-completed";

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn subjects_for(&self, order_id: Uuid) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.order_id == order_id)
            .map(|n| n.subject.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), HandlerError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// The three saga participants wired over one in-memory broker
struct Saga {
    broker: InMemoryBroker,
    service: Arc<OrderService>,
    parts: Vec<Uuid>,
    dlq: ActorRef<DlqActor>,
    notifier: Arc<RecordingNotifier>,
}

impl Saga {
    fn new() -> Self {
        let broker = InMemoryBroker::default();
        let codec: Arc<dyn EventCodec> = Arc::new(ProtobufCodec);
        let catalog = Arc::new(StaticPartCatalog::new([
            PartPrice { id: Uuid::new_v4(), price: Decimal::new(1999, 2) },
            PartPrice { id: Uuid::new_v4(), price: Decimal::new(500, 2) },
        ]));
        let parts = catalog.part_ids();

        let service = Arc::new(OrderService::new(
            Arc::new(InMemoryOrderRepository::new()),
            catalog,
            Arc::new(SimulatedPaymentGateway::new()),
            codec,
            Arc::new(broker.publisher(PAYMENT_TOPIC)),
        ));
        let dlq = DlqActor::spawn(DlqActor::new(Arc::new(InMemoryDeadLetterStore::new())));

        Self {
            broker,
            service,
            parts,
            dlq,
            notifier: Arc::new(RecordingNotifier::default()),
        }
    }

    fn policy(&self, group: &str) -> DeliveryPolicy {
        DeliveryPolicy::new(group)
            .with_backoff(RetryConfig {
                max_attempts: u32::MAX,
                initial_delay: Duration::from_millis(5),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
            })
            .with_dead_letters(self.dlq.clone())
    }

    fn start(&self) -> Coordinator {
        let codec: Arc<dyn EventCodec> = Arc::new(ProtobufCodec);
        let worker = AssemblyWorker::new(codec.clone(), Arc::new(self.broker.publisher(ASSEMBLY_TOPIC)))
            .with_delay(Arc::new(FixedBuildDelay(Duration::from_millis(10))));
        let notifications = NotificationConsumer::new(
            codec,
            self.notifier.clone(),
            PAYMENT_TOPIC,
            ASSEMBLY_TOPIC,
        );

        let mut coordinator = Coordinator::new(Duration::from_secs(1));
        coordinator.spawn_listener(
            ORDER_SERVICE_GROUP,
            Arc::new(self.broker.subscriber(&[ASSEMBLY_TOPIC], self.policy(ORDER_SERVICE_GROUP))),
            self.service.clone(),
        );
        coordinator.spawn_listener(
            ASSEMBLY_WORKER_GROUP,
            Arc::new(self.broker.subscriber(&[PAYMENT_TOPIC], self.policy(ASSEMBLY_WORKER_GROUP))),
            Arc::new(worker),
        );
        coordinator.spawn_listener(
            NOTIFIER_GROUP,
            Arc::new(self.broker.subscriber(
                &[PAYMENT_TOPIC, ASSEMBLY_TOPIC],
                self.policy(NOTIFIER_GROUP),
            )),
            Arc::new(notifications),
        );
        coordinator
    }

    async fn wait_for_status(&self, order_id: Uuid, status: OrderStatus) {
        let service = self.service.clone();
        eventually(move || {
            let service = service.clone();
            async move { service.get_order(order_id).await.unwrap().status == status }
        })
        .await;
    }
}

async fn eventually<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within 5s");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_paid_order_is_assembled_end_to_end() {
    let saga = Saga::new();
    let coordinator = saga.start();
    let user_id = Uuid::new_v4();

    let order = saga.service.create_order(user_id, &saga.parts).await.unwrap();
    assert_eq!(order.status, OrderStatus::PendingPayment);
    assert_eq!(order.total_price, Decimal::new(2499, 2));

    let paid = saga.service.pay_order(order.id, PaymentMethod::Paypal).await.unwrap();
    assert_eq!(paid.status, OrderStatus::Paid);
    let transaction_id = paid.transaction_id.clone().unwrap();

    saga.wait_for_status(order.id, OrderStatus::Assembled).await;

    let assembled = saga.service.get_order(order.id).await.unwrap();
    assert_eq!(assembled.transaction_id.as_deref(), Some(transaction_id.as_str()));
    assert_eq!(assembled.payment_method, Some(PaymentMethod::Paypal));

    let payments = saga.broker.records(PAYMENT_TOPIC);
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].key, order.id.to_string());
    let assemblies = saga.broker.records(ASSEMBLY_TOPIC);
    assert_eq!(assemblies.len(), 1);
    assert_eq!(assemblies[0].key, order.id.to_string());

    let notifier = saga.notifier.clone();
    eventually(move || {
        let count = notifier.subjects_for(order.id).len();
        async move { count == 2 }
    })
    .await;

    let report = coordinator.shutdown().await;
    assert_eq!(report.aborted, 0);
    assert_eq!(dlq_stats(&saga.dlq).await.unwrap().total_messages, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_redelivered_assembly_completed_is_absorbed() {
    let saga = Saga::new();
    let coordinator = saga.start();

    let order = saga.service.create_order(Uuid::new_v4(), &saga.parts[..1]).await.unwrap();
    saga.service.pay_order(order.id, PaymentMethod::Card).await.unwrap();
    saga.wait_for_status(order.id, OrderStatus::Assembled).await;
    let version = saga.service.get_order(order.id).await.unwrap().version;

    // Replay the exact record the worker produced
    let original = saga.broker.records(ASSEMBLY_TOPIC).remove(0);
    let replay = saga.broker.publisher(ASSEMBLY_TOPIC);
    replay.send(&original.key, original.payload.clone()).await.unwrap();
    replay.send(&original.key, original.payload).await.unwrap();

    tokio::time::sleep(Duration::from_millis(300)).await;
    let report = coordinator.shutdown().await;
    assert_eq!(report.aborted, 0);

    let partition = saga.broker.partition_for(&original.key);
    assert_eq!(saga.broker.committed(ASSEMBLY_TOPIC, ORDER_SERVICE_GROUP, partition), Some(3));

    let order = saga.service.get_order(order.id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Assembled);
    assert_eq!(order.version, version);
    assert_eq!(dlq_stats(&saga.dlq).await.unwrap().total_messages, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pay_and_cancel_race_has_one_winner() {
    let saga = Arc::new(Saga::new());

    for _ in 0..20 {
        let order = saga.service.create_order(Uuid::new_v4(), &saga.parts).await.unwrap();

        let pay = {
            let saga = saga.clone();
            tokio::spawn(async move { saga.service.pay_order(order.id, PaymentMethod::BankTransfer).await })
        };
        let cancel = {
            let saga = saga.clone();
            tokio::spawn(async move { saga.service.cancel_order(order.id).await })
        };
        let (paid, cancelled) = (pay.await.unwrap(), cancel.await.unwrap());

        let current = saga.service.get_order(order.id).await.unwrap();
        match (paid, cancelled) {
            (Ok(_), Err(OrderError::OrderCannotBeCancelled(OrderStatus::Paid))) => {
                assert_eq!(current.status, OrderStatus::Paid);
                assert!(current.transaction_id.is_some());
            }
            (Err(OrderError::OrderCannotBePaid(OrderStatus::Cancelled)), Ok(_)) => {
                assert_eq!(current.status, OrderStatus::Cancelled);
                assert!(current.transaction_id.is_none());
            }
            other => panic!("both or neither transition applied: {other:?}"),
        }
    }

    // Exactly one PaymentCompleted per paid order
    let records = saga.broker.records(PAYMENT_TOPIC);
    let mut keys: Vec<_> = records.iter().map(|r| r.key.clone()).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), records.len());
    for key in keys {
        let id: Uuid = key.parse().unwrap();
        assert_eq!(saga.service.get_order(id).await.unwrap().status, OrderStatus::Paid);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_malformed_event_is_dead_lettered_and_stream_continues() {
    let saga = Saga::new();
    let coordinator = saga.start();

    let order = saga.service.create_order(Uuid::new_v4(), &saga.parts).await.unwrap();
    let key = order.id.to_string();

    // Garbage first on the order's partition, then a real payment behind it
    saga.broker
        .publisher(ASSEMBLY_TOPIC)
        .send(&key, vec![0xff, 0x01, 0x02])
        .await
        .unwrap();
    saga.service.pay_order(order.id, PaymentMethod::Card).await.unwrap();
    saga.wait_for_status(order.id, OrderStatus::Assembled).await;

    let dlq = saga.dlq.clone();
    eventually(move || {
        let dlq = dlq.clone();
        async move {
            dlq_stats(&dlq)
                .await
                .map(|s| s.by_topic.get(ASSEMBLY_TOPIC) == Some(&2))
                .unwrap_or(false)
        }
    })
    .await;

    // Both the order service and the notifier reject the same record
    let messages = dlq_messages(&saga.dlq, 10).await.unwrap();
    assert_eq!(messages.len(), 2);
    let mut groups: Vec<_> = messages.iter().map(|m| m.consumer_group.clone()).collect();
    groups.sort();
    let mut expected = vec![NOTIFIER_GROUP.to_string(), ORDER_SERVICE_GROUP.to_string()];
    expected.sort();
    assert_eq!(groups, expected);
    assert!(messages.iter().all(|m| m.key == key && m.payload == vec![0xff, 0x01, 0x02]));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn test_paid_order_cannot_be_cancelled() {
    let saga = Saga::new();
    let order = saga.service.create_order(Uuid::new_v4(), &saga.parts).await.unwrap();
    saga.service.pay_order(order.id, PaymentMethod::Card).await.unwrap();

    let err = saga.service.cancel_order(order.id).await.unwrap_err();

    assert!(matches!(err, OrderError::OrderCannotBeCancelled(OrderStatus::Paid)));
    assert_eq!(err.code().as_str(), "ORDER_CANNOT_BE_CANCELLED");
    assert_eq!(
        saga.service.get_order(order.id).await.unwrap().status,
        OrderStatus::Paid
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unpublished_payment_is_delivered_after_restart() {
    let saga = Saga::new();
    let order = saga.service.create_order(Uuid::new_v4(), &saga.parts).await.unwrap();
    saga.service.pay_order(order.id, PaymentMethod::Card).await.unwrap();

    // PaymentCompleted sits on the log while no consumers run
    let first = saga.start();
    first.shutdown().await;

    let second = saga.start();
    saga.wait_for_status(order.id, OrderStatus::Assembled).await;
    second.shutdown().await;

    // An abandoned attempt is redelivered, so at least one completion exists
    assert!(!saga.broker.records(ASSEMBLY_TOPIC).is_empty());
    assert_eq!(dlq_stats(&saga.dlq).await.unwrap().total_messages, 0);
}
