use uuid::Uuid;

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingPurchasedEvent {
    pub booking_id: Uuid,
    pub accommodation_id: Uuid,
    pub user_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: i64,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct BookingsExpiredEvent {
    pub booking_ids: Vec<Uuid>,
    pub timestamp: i64,
}

#[derive(Debug, serde::Serialize, serde::Deserialize, Clone)]
pub struct PayoutsIssuedEvent {
    pub booking_ids: Vec<Uuid>,
    pub timestamp: i64,
}

/// Payload handed to the notification channel for accommodation owners.
#[derive(Debug, serde::Serialize, serde::Deserialize, Clone, PartialEq)]
pub struct OwnerNotification {
    pub recipients: Vec<Uuid>,
    pub content: String,
    pub booking_id: Option<Uuid>,
    pub timestamp: i64,
}
