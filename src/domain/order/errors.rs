use uuid::Uuid;

use super::value_objects::OrderStatus;
use crate::events::DecodeError;
use crate::messaging::ChannelError;
use crate::utils::IsTransient;

// ============================================================================
// Order Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum OrderError {
    #[error("Order not found: {0}")]
    NotFound(Uuid),

    #[error("Order already exists: {0}")]
    AlreadyExists(Uuid),

    #[error("Invalid order data: {0}")]
    InvalidOrderData(String),

    #[error("Order cannot be paid in status {0}")]
    OrderCannotBePaid(OrderStatus),

    #[error("Order cannot be cancelled in status {0}")]
    OrderCannotBeCancelled(OrderStatus),

    #[error("Order cannot be assembled in status {0}")]
    OrderCannotBeAssembled(OrderStatus),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    TransientChannel(#[from] ChannelError),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Stored data that can never be read back, retrying will not help
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),
}

/// Stable codes surfaced to callers of the order service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotFound,
    AlreadyExists,
    InvalidOrderData,
    OrderCannotBePaid,
    OrderCannotBeCancelled,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::AlreadyExists => "ALREADY_EXISTS",
            ErrorCode::InvalidOrderData => "INVALID_ORDER_DATA",
            ErrorCode::OrderCannotBePaid => "ORDER_CANNOT_BE_PAID",
            ErrorCode::OrderCannotBeCancelled => "ORDER_CANNOT_BE_CANCELLED",
            ErrorCode::Internal => "INTERNAL",
        }
    }
}

impl OrderError {
    pub fn code(&self) -> ErrorCode {
        match self {
            OrderError::NotFound(_) => ErrorCode::NotFound,
            OrderError::AlreadyExists(_) => ErrorCode::AlreadyExists,
            OrderError::InvalidOrderData(_) => ErrorCode::InvalidOrderData,
            OrderError::OrderCannotBePaid(_) => ErrorCode::OrderCannotBePaid,
            OrderError::OrderCannotBeCancelled(_) => ErrorCode::OrderCannotBeCancelled,
            _ => ErrorCode::Internal,
        }
    }

    /// Message safe to show to a caller; internals collapse to a generic text
    pub fn public_message(&self) -> String {
        match self.code() {
            ErrorCode::Internal => "internal error".to_string(),
            _ => self.to_string(),
        }
    }
}

impl IsTransient for OrderError {
    fn is_transient(&self) -> bool {
        match self {
            OrderError::TransientChannel(e) => e.is_transient(),
            OrderError::UpstreamUnavailable(_) | OrderError::Storage(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_errors_keep_their_message() {
        let err = OrderError::OrderCannotBeCancelled(OrderStatus::Paid);
        assert_eq!(err.code(), ErrorCode::OrderCannotBeCancelled);
        assert_eq!(err.code().as_str(), "ORDER_CANNOT_BE_CANCELLED");
        assert!(err.public_message().contains("PAID"));
    }

    #[test]
    fn test_internal_errors_do_not_leak_details() {
        let err = OrderError::Storage("connection reset by 10.0.0.7".to_string());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.public_message(), "internal error");

        let err = OrderError::OrderCannotBeAssembled(OrderStatus::Cancelled);
        assert_eq!(err.code(), ErrorCode::Internal);
    }

    #[test]
    fn test_transient_classification() {
        assert!(OrderError::UpstreamUnavailable("timeout".into()).is_transient());
        assert!(OrderError::TransientChannel(ChannelError::Unavailable("open".into())).is_transient());
        assert!(!OrderError::Decode(DecodeError::Empty).is_transient());
        assert!(!OrderError::NotFound(Uuid::new_v4()).is_transient());
        assert!(OrderError::Storage("timeout".into()).is_transient());
        assert!(!OrderError::CorruptRecord("bad items json".into()).is_transient());
    }

    #[test]
    fn test_corrupt_record_is_internal() {
        let err = OrderError::CorruptRecord("bad items json".into());
        assert_eq!(err.code(), ErrorCode::Internal);
        assert_eq!(err.public_message(), "internal error");
    }
}
