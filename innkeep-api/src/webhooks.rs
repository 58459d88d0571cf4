use axum::{
    extract::State,
    routing::post,
    Json,
    Router,
};
use chrono::Utc;
use innkeep_core::payment::PaymentCallback;
use innkeep_core::ReservationError;
use innkeep_shared::models::events::BookingPurchasedEvent;
use innkeep_store::events::TOPIC_BOOKING_PURCHASED;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_callback))
}

/// POST /v1/webhooks/payments
///
/// Anything the gateway should not redeliver is acknowledged with 200: a settled
/// charge, a declined one, and a reference we no longer track. Only a failure after
/// the marker was consumed answers 500, and that one needs an operator.
pub async fn handle_payment_callback(
    State(state): State<AppState>,
    Json(callback): Json<PaymentCallback>,
) -> Result<Json<Value>, AppError> {
    tracing::info!(reference = %callback.reference, code = %callback.result_code, "Received payment callback");

    match state.callbacks.handle(&callback).await {
        Ok(outcome) => {
            if let Some(kafka) = &state.kafka {
                let event = BookingPurchasedEvent {
                    booking_id: outcome.booking_id,
                    accommodation_id: outcome.accommodation_id,
                    user_id: outcome.user_id,
                    transaction_id: outcome.transaction_id,
                    amount: outcome.amount,
                    timestamp: Utc::now().timestamp(),
                };
                kafka
                    .publish_json(TOPIC_BOOKING_PURCHASED, &outcome.booking_id.to_string(), &event)
                    .await;
            }
            Ok(Json(json!({
                "status": "PURCHASED",
                "booking_id": outcome.booking_id,
                "transaction_id": outcome.transaction_id,
            })))
        }
        Err(ReservationError::PaymentFailed { reference, code }) => Ok(Json(json!({
            "status": "PAYMENT_FAILED",
            "reference": reference,
            "code": code,
        }))),
        Err(ReservationError::UnknownOrExpiredCallback(reference)) => Ok(Json(json!({
            "status": "IGNORED",
            "reference": reference,
        }))),
        Err(e) => {
            if e.is_fatal() {
                state.metrics.callback_fatal.inc();
            }
            Err(e.into())
        }
    }
}
