use async_trait::async_trait;
use std::time::Duration;

use crate::error::ReservationResult;
use crate::snapshot::AvailabilitySnapshot;

/// Read side of the search cache.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn get(&self, session_token: &str) -> ReservationResult<Option<AvailabilitySnapshot>>;
}

/// TTL-bound key/value store backing the idempotency ledger.
#[async_trait]
pub trait MarkerStore: Send + Sync {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> ReservationResult<()>;

    async fn get(&self, key: &str) -> ReservationResult<Option<String>>;

    async fn delete(&self, key: &str) -> ReservationResult<()>;

    /// Atomic get-then-delete. Of two concurrent callers at most one sees the value.
    async fn take(&self, key: &str) -> ReservationResult<Option<String>>;

    /// Delete only while the key still holds `expected`. Returns whether it did.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> ReservationResult<bool>;
}
