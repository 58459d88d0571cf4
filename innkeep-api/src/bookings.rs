use axum::{
    extract::{Extension, Json, Path, State},
    http::StatusCode,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use innkeep_booking::BookingView;
use innkeep_core::{BookingReceipt, BookingRequest, ContactInfo, CreateBookingCommand, Requester, RoomLine};
use serde::Deserialize;
use tracing::info;
use uuid::Uuid;

use crate::error::AppError;
use crate::middleware::{auth_middleware, circuit_breaker_middleware};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateBookingBody {
    /// Token of the search result the guest picked rooms from.
    pub session_token: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub rooms: Vec<RoomLine>,
    pub contact: ContactInfo,
    #[serde(default)]
    pub guest_id: Option<Uuid>,
    #[serde(default)]
    pub travel_statement_id: Option<Uuid>,
}

pub fn routes(state: AppState) -> Router<AppState> {
    let create = Router::new()
        .route("/v1/bookings", post(create_booking))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), auth_middleware))
        .route_layer(axum::middleware::from_fn_with_state(state.clone(), circuit_breaker_middleware));

    let manage = Router::new()
        .route("/v1/bookings/{id}", get(get_booking))
        .route("/v1/bookings/{id}/cancel", post(cancel_booking))
        .route_layer(axum::middleware::from_fn_with_state(state, auth_middleware));

    create.merge(manage)
}

async fn create_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Json(body): Json<CreateBookingBody>,
) -> Result<(StatusCode, Json<BookingReceipt>), AppError> {
    let command = CreateBookingCommand {
        requester,
        guest_id: body.guest_id,
        session_token: body.session_token,
        check_in: body.check_in,
        check_out: body.check_out,
        rooms: body.rooms,
        contact: body.contact,
        travel_statement_id: body.travel_statement_id,
    };

    let receipt = state.reservations.create_booking(command).await?;
    state.metrics.bookings_created.inc();

    info!(booking_id = %receipt.booking_id, user_id = %requester.user_id, "Booking created, awaiting payment");
    Ok((StatusCode::CREATED, Json(receipt)))
}

async fn get_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingView>, AppError> {
    let view = state.reservations.get_booking(requester, booking_id).await?;
    Ok(Json(view))
}

async fn cancel_booking(
    State(state): State<AppState>,
    Extension(requester): Extension<Requester>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingRequest>, AppError> {
    let booking = state.reservations.cancel_booking(requester, booking_id).await?;
    Ok(Json(booking))
}
