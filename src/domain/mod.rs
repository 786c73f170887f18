// ============================================================================
// Domain Layer - Business Logic
// ============================================================================
//
// The order aggregate owns the purchase-order state machine. Nothing in here
// knows about brokers, wire formats or databases; those live in `events`,
// `messaging` and `store`.
//
// ============================================================================

pub mod aggregate;
pub mod order;

pub use aggregate::Aggregate;
