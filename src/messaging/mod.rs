// ============================================================================
// Messaging - publish/subscribe channels and delivery settlement
// ============================================================================

pub mod channel;
pub mod memory;
pub mod redpanda;
pub mod settlement;

pub use channel::{ChannelError, EventEnvelope, HandlerError, MessageHandler, Publisher, Subscriber};
pub use memory::{InMemoryBroker, InMemoryPublisher, InMemorySubscriber};
pub use redpanda::{RedpandaPublisher, RedpandaSubscriber};
pub use settlement::{DeliveryPolicy, Settlement};
