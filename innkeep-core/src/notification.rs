use async_trait::async_trait;
use uuid::Uuid;

/// Outbound notifications. Fire-and-forget: implementations log their own failures.
#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, user_ids: &[Uuid], content: &str, booking_id: Option<Uuid>);
}
