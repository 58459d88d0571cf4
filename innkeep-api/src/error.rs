use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use innkeep_core::ReservationError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    AuthenticationError(String),
    #[error("{0}")]
    AuthorizationError(String),
    #[error(transparent)]
    Reservation(#[from] ReservationError),
    #[error("{0}")]
    InternalServerError(String),
}

/// HTTP status for each reservation failure.
pub fn status_for(err: &ReservationError) -> StatusCode {
    match err {
        ReservationError::InvalidRoomSelection(_) | ReservationError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        ReservationError::SelfBookingForbidden | ReservationError::Forbidden(_) => StatusCode::FORBIDDEN,
        ReservationError::NotFound(_) | ReservationError::UnknownOrExpiredCallback(_) => StatusCode::NOT_FOUND,
        ReservationError::InsufficientInventory { .. }
        | ReservationError::InvalidStateTransition { .. }
        | ReservationError::Conflict(_) => StatusCode::CONFLICT,
        ReservationError::SnapshotExpired(_) => StatusCode::GONE,
        ReservationError::PaymentFailed { .. } => StatusCode::PAYMENT_REQUIRED,
        ReservationError::GatewayUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        ReservationError::AmountMismatch { .. }
        | ReservationError::Storage(_)
        | ReservationError::CallbackFatal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, retryable) = match self {
            AppError::AuthenticationError(msg) => (StatusCode::UNAUTHORIZED, msg, false),
            AppError::AuthorizationError(msg) => (StatusCode::FORBIDDEN, msg, false),
            AppError::Reservation(err) => {
                let status = status_for(&err);
                if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
                    tracing::error!(alert = err.is_fatal(), "Internal Server Error: {}", err);
                    (status, "Internal Server Error".to_string(), false)
                } else {
                    (status, err.to_string(), err.is_retryable())
                }
            }
            AppError::InternalServerError(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string(), false)
            }
        };

        let body = Json(json!({
            "error": error_message,
            "retryable": retryable,
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn validation_errors_are_client_errors() {
        assert_eq!(
            status_for(&ReservationError::InsufficientInventory { rooms: vec![Uuid::new_v4()] }),
            StatusCode::CONFLICT
        );
        assert_eq!(status_for(&ReservationError::SelfBookingForbidden), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&ReservationError::InvalidRoomSelection("r".into())), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&ReservationError::SnapshotExpired("t".into())), StatusCode::GONE);
    }

    #[test]
    fn infrastructure_errors() {
        assert_eq!(status_for(&ReservationError::Conflict("room".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&ReservationError::GatewayUnavailable("timeout".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ReservationError::CallbackFatal { reference: "r".into(), reason: "db".into() }),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_carries_retry_hint() {
        let response = AppError::from(ReservationError::Conflict("room busy".into())).into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["retryable"], true);
        assert!(body["error"].as_str().unwrap().contains("room busy"));
    }

    #[tokio::test]
    async fn storage_details_are_not_leaked() {
        let response = AppError::from(ReservationError::storage("password=hunter2")).into_response();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "Internal Server Error");
    }
}
