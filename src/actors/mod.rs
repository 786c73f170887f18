// ============================================================================
// Actors - process supervision and dead-letter handling
// ============================================================================

pub mod coordinator;
pub mod dlq;

pub use coordinator::{shutdown_signal, Coordinator, ShutdownReport};
pub use dlq::{
    dlq_messages, dlq_stats, AddToDlq, DeadLetterStore, DlqActor, DlqMessage, DlqStats,
    GetDlqMessages, GetDlqStats,
};
