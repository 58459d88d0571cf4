use chrono::{DateTime, Utc};
use innkeep_shared::Masked;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::BookingStatus;

/// A bookable room unit of an accommodation.
///
/// `available_units` is the authoritative remaining count; it only moves while the
/// row is locked. `version` advances on every reservation so cached readers can
/// tell their view is stale.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoomInventory {
    pub id: Uuid,
    pub accommodation_id: Uuid,
    pub unit_price: i64,
    pub total_units: i32,
    pub available_units: i32,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl RoomInventory {
    pub fn new(accommodation_id: Uuid, unit_price: i64, total_units: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            accommodation_id,
            unit_price,
            total_units,
            available_units: total_units,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Accommodation {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub booking_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContactInfo {
    pub full_name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
}

/// The reservation aggregate root. Only state transitions mutate it after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRequest {
    pub id: Uuid,
    /// Guest the stay is for.
    pub user_id: Uuid,
    /// Account that created (and pays for) the booking.
    pub creator_id: Uuid,
    pub accommodation_id: Uuid,
    pub contact: ContactInfo,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub total_rooms: i32,
    pub total_amount: i64,
    pub status: BookingStatus,
    pub transaction_id: Option<Uuid>,
    pub travel_statement_id: Option<Uuid>,
    pub inventory_released: bool,
    pub deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One room line of a booking. Prices are a point-in-time copy of the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingRequestDetail {
    pub id: Uuid,
    pub booking_request_id: Uuid,
    pub room_id: Uuid,
    pub quantity: i32,
    pub price: i64,
    pub original_price: i64,
}

impl BookingRequestDetail {
    pub fn line_total(&self) -> i64 {
        self.price * i64::from(self.quantity)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    Charge,
    Payout,
}

impl TransactionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Charge => "CHARGE",
            TransactionKind::Payout => "PAYOUT",
        }
    }
}

/// Append-only money movement record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: Uuid,
    pub kind: TransactionKind,
    pub booking_request_id: Uuid,
    pub amount: i64,
    pub payment_method: String,
    pub gateway_reference: Option<String>,
    pub bank_code: Option<String>,
    pub bank_transaction_no: Option<String>,
    pub pay_date: DateTime<Utc>,
    pub creator_id: Uuid,
    pub receiver_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Guest,
    BusinessAdmin,
    Operator,
}

impl Role {
    pub fn from_claim(role: &str) -> Self {
        match role {
            "BUSINESS_ADMIN" => Role::BusinessAdmin,
            "OPERATOR" => Role::Operator,
            _ => Role::Guest,
        }
    }
}

/// The authenticated caller, passed explicitly into every operation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub role: Role,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomLine {
    pub room_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookingCommand {
    pub requester: Requester,
    /// Guest the stay is for when booking on behalf of a travel statement.
    pub guest_id: Option<Uuid>,
    pub session_token: String,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub rooms: Vec<RoomLine>,
    pub contact: ContactInfo,
    pub travel_statement_id: Option<Uuid>,
}

/// What the caller gets back from a successful create: where to send the guest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BookingReceipt {
    pub booking_id: Uuid,
    pub status: BookingStatus,
    pub amount: i64,
    pub gateway_reference: String,
    pub redirect_url: String,
    pub expires_at: DateTime<Utc>,
}
