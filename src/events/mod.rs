// ============================================================================
// Integration Events - schema, wire format and codec
// ============================================================================

pub mod codec;
pub mod schema;
pub mod wire;

pub use codec::{parse_id, DecodeError, EventCodec, ProtobufCodec};
pub use schema::{AssemblyCompleted, PaymentCompleted};
