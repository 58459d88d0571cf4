use axum::{
    extract::{Extension, Json, Path, State},
    routing::post,
    Router,
};
use chrono::Utc;
use innkeep_booking::SettlementRun;
use innkeep_core::{BookingRequest, Requester};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{auth_middleware, operator_middleware};
use crate::state::AppState;
use crate::worker::publish_settlement;

#[derive(Debug, Deserialize)]
pub struct VoidRequest {
    pub reason: String,
}

pub fn routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/v1/admin/bookings/{id}/void", post(void_booking))
        .route("/v1/admin/settlement/run", post(run_settlement))
        .route_layer(axum::middleware::from_fn(operator_middleware))
        .route_layer(axum::middleware::from_fn_with_state(state, auth_middleware))
}

/// POST /v1/admin/bookings/{id}/void
async fn void_booking(
    State(state): State<AppState>,
    Extension(operator): Extension<Requester>,
    Path(booking_id): Path<Uuid>,
    Json(req): Json<VoidRequest>,
) -> Result<Json<BookingRequest>, AppError> {
    tracing::info!(booking_id = %booking_id, operator_id = %operator.user_id, "Operator void requested");
    let booking = state.reservations.void_booking(booking_id, &req.reason).await?;
    Ok(Json(booking))
}

/// POST /v1/admin/settlement/run
///
/// Runs one scheduler tick on demand.
async fn run_settlement(State(state): State<AppState>) -> Result<Json<SettlementRun>, AppError> {
    let run = state.settlement.run_all(Utc::now()).await?;
    state.metrics.record_run(&run);
    publish_settlement(&state, &run).await;
    Ok(Json(run))
}
