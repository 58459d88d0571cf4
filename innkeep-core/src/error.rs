use uuid::Uuid;

/// Everything the reservation core can reject or fail with.
///
/// Validation-class errors go straight back to the caller. `Conflict` and
/// `GatewayUnavailable` may be resubmitted. `CallbackFatal` means a callback
/// marker was already consumed and the downstream writes did not land: it has to
/// reach an operator.
#[derive(Debug, thiserror::Error)]
pub enum ReservationError {
    #[error("Invalid room selection: {0}")]
    InvalidRoomSelection(String),

    #[error("Insufficient inventory for rooms {rooms:?}")]
    InsufficientInventory { rooms: Vec<Uuid> },

    #[error("Accommodation owners cannot book their own rooms")]
    SelfBookingForbidden,

    #[error("Inventory is locked by another reservation: {0}")]
    Conflict(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Payment failed for reference {reference} (code {code})")]
    PaymentFailed { reference: String, code: String },

    #[error("Unknown or expired payment callback: {0}")]
    UnknownOrExpiredCallback(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Availability snapshot expired or missing for session {0}")]
    SnapshotExpired(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Callback amount {received} does not match recorded charge {expected}")]
    AmountMismatch { expected: i64, received: i64 },

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Callback {reference} failed after its marker was consumed: {reason}")]
    CallbackFatal { reference: String, reason: String },
}

pub type ReservationResult<T> = Result<T, ReservationError>;

impl ReservationError {
    /// The caller may resubmit the same request.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReservationError::Conflict(_) | ReservationError::GatewayUnavailable(_)
        )
    }

    /// User-facing rejections that must not be retried.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            ReservationError::InvalidRoomSelection(_)
                | ReservationError::InsufficientInventory { .. }
                | ReservationError::SelfBookingForbidden
                | ReservationError::Forbidden(_)
                | ReservationError::InvalidStateTransition { .. }
                | ReservationError::InvalidRequest(_)
                | ReservationError::SnapshotExpired(_)
                | ReservationError::NotFound(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, ReservationError::CallbackFatal { .. })
    }

    pub fn storage(err: impl std::fmt::Display) -> Self {
        ReservationError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ReservationError::Conflict("room".into()).is_retryable());
        assert!(ReservationError::GatewayUnavailable("timeout".into()).is_retryable());
        assert!(!ReservationError::SelfBookingForbidden.is_retryable());
        assert!(!ReservationError::PaymentFailed {
            reference: "r".into(),
            code: "24".into()
        }
        .is_retryable());
    }

    #[test]
    fn validation_class() {
        assert!(ReservationError::InsufficientInventory { rooms: vec![] }.is_validation());
        assert!(ReservationError::Forbidden("not yours".into()).is_validation());
        assert!(!ReservationError::Conflict("room".into()).is_validation());
        assert!(!ReservationError::UnknownOrExpiredCallback("x".into()).is_validation());
    }

    #[test]
    fn only_callback_fatal_is_fatal() {
        let err = ReservationError::CallbackFatal {
            reference: "ref-1".into(),
            reason: "db down".into(),
        };
        assert!(err.is_fatal());
        assert!(!ReservationError::storage("db down").is_fatal());
    }
}
