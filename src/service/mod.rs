// ============================================================================
// Services - use cases and event handlers of the order saga
// ============================================================================

pub mod assembly_worker;
pub mod build_delay;
pub mod collaborators;
pub mod notifier;
pub mod order_service;

pub use assembly_worker::AssemblyWorker;
pub use build_delay::{BuildDelay, FixedBuildDelay, RandomBuildDelay};
pub use collaborators::{PartCatalog, PaymentGateway, SimulatedPaymentGateway, StaticPartCatalog};
pub use notifier::{LogNotifier, Notification, NotificationConsumer, Notifier};
pub use order_service::{AssemblyOutcome, OrderService};
