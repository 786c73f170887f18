use prost::Message;
use uuid::Uuid;

use super::schema::{AssemblyCompleted, PaymentCompleted};
use super::wire::{AssemblyCompletedProto, PaymentCompletedProto};
use crate::utils::IsTransient;

// ============================================================================
// Event Codec - bytes <-> integration events
// ============================================================================
//
// Encoding is deterministic and never fails for a well-formed event.
// Decoding never panics: every malformed input is a `DecodeError`.
//
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("payload is empty")]
    Empty,

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("missing required field `{0}`")]
    MissingField(&'static str),

    #[error("field `{field}` is not a valid identifier: {value:?}")]
    InvalidIdentifier { field: &'static str, value: String },

    #[error("field `{field}` is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// A payload that failed to decode will fail the same way on every attempt
impl IsTransient for DecodeError {
    fn is_transient(&self) -> bool {
        false
    }
}

pub trait EventCodec: Send + Sync {
    fn encode_payment_completed(&self, event: &PaymentCompleted) -> Vec<u8>;
    fn decode_payment_completed(&self, bytes: &[u8]) -> Result<PaymentCompleted, DecodeError>;

    fn encode_assembly_completed(&self, event: &AssemblyCompleted) -> Vec<u8>;
    fn decode_assembly_completed(&self, bytes: &[u8]) -> Result<AssemblyCompleted, DecodeError>;
}

/// Protocol Buffers codec; identifiers travel as hyphenated UUID text
#[derive(Debug, Default, Clone, Copy)]
pub struct ProtobufCodec;

impl EventCodec for ProtobufCodec {
    fn encode_payment_completed(&self, event: &PaymentCompleted) -> Vec<u8> {
        PaymentCompletedProto {
            event_id: event.event_id.to_string(),
            order_id: event.order_id.to_string(),
            user_id: event.user_id.to_string(),
            payment_method: event.payment_method.as_str().to_string(),
            transaction_id: event.transaction_id.clone(),
        }
        .encode_to_vec()
    }

    fn decode_payment_completed(&self, bytes: &[u8]) -> Result<PaymentCompleted, DecodeError> {
        let proto: PaymentCompletedProto = decode_message(bytes)?;

        let payment_method = required("payment_method", &proto.payment_method)?
            .parse()
            .map_err(|e: crate::domain::order::UnknownVariant| DecodeError::InvalidField {
                field: "payment_method",
                reason: e.to_string(),
            })?;
        let transaction_id = required("transaction_id", &proto.transaction_id)?.to_string();

        Ok(PaymentCompleted {
            event_id: parse_id("event_id", &proto.event_id)?,
            order_id: parse_id("order_id", &proto.order_id)?,
            user_id: parse_id("user_id", &proto.user_id)?,
            payment_method,
            transaction_id,
        })
    }

    fn encode_assembly_completed(&self, event: &AssemblyCompleted) -> Vec<u8> {
        AssemblyCompletedProto {
            event_id: event.event_id.to_string(),
            order_id: event.order_id.to_string(),
            user_id: event.user_id.to_string(),
            build_time_seconds: event.build_time_seconds,
        }
        .encode_to_vec()
    }

    fn decode_assembly_completed(&self, bytes: &[u8]) -> Result<AssemblyCompleted, DecodeError> {
        let proto: AssemblyCompletedProto = decode_message(bytes)?;

        if proto.build_time_seconds == 0 {
            return Err(DecodeError::MissingField("build_time_seconds"));
        }

        Ok(AssemblyCompleted {
            event_id: parse_id("event_id", &proto.event_id)?,
            order_id: parse_id("order_id", &proto.order_id)?,
            user_id: parse_id("user_id", &proto.user_id)?,
            build_time_seconds: proto.build_time_seconds,
        })
    }
}

fn decode_message<M: Message + Default>(bytes: &[u8]) -> Result<M, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    M::decode(bytes).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Blank text counts as absent
fn required<'a>(field: &'static str, value: &'a str) -> Result<&'a str, DecodeError> {
    if value.trim().is_empty() {
        Err(DecodeError::MissingField(field))
    } else {
        Ok(value)
    }
}

/// Parse a required identifier field
pub fn parse_id(field: &'static str, value: &str) -> Result<Uuid, DecodeError> {
    Uuid::parse_str(required(field, value)?).map_err(|_| DecodeError::InvalidIdentifier {
        field,
        value: value.to_string(),
    })
}

// ============================================================================
// Unit Tests
// ============================================================================
