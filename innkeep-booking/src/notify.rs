use async_trait::async_trait;
use innkeep_core::notification::NotificationService;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub recipients: Vec<Uuid>,
    pub content: String,
    pub booking_id: Option<Uuid>,
}

/// Keeps every notification in memory so tests can assert on them.
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotification>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl NotificationService for RecordingNotifier {
    async fn send(&self, user_ids: &[Uuid], content: &str, booking_id: Option<Uuid>) {
        self.sent.lock().await.push(SentNotification {
            recipients: user_ids.to_vec(),
            content: content.to_string(),
            booking_id,
        });
    }
}
