// ============================================================================
// Order Domain - Business Logic for the Order Aggregate
// ============================================================================
//
// - Value objects (OrderItem, OrderStatus, PaymentMethod)
// - Commands and the events they produce
// - Errors with stable user-facing codes
// - The aggregate and its state machine
// - The repository contract that serializes mutations per order
//
// ============================================================================

pub mod aggregate;
pub mod commands;
pub mod errors;
pub mod events;
pub mod repository;
pub mod value_objects;

pub use aggregate::*;
pub use commands::*;
pub use errors::*;
pub use events::*;
pub use repository::*;
pub use value_objects::*;
