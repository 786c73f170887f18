// ============================================================================
// Store - repository and dead-letter persistence
// ============================================================================

pub mod memory;
pub mod scylla;

pub use memory::{InMemoryDeadLetterStore, InMemoryOrderRepository};
pub use self::scylla::{ScyllaDeadLetterStore, ScyllaOrderRepository};
