//! Idempotency ledger for in-flight payments.
//!
//! One record per payment session, reachable two ways: by gateway reference (what a
//! callback carries) and by creator (who may hold at most one live session). A third
//! key maps the payload fingerprint back to the pending booking.

use chrono::{DateTime, Utc};
use innkeep_core::cache::MarkerStore;
use innkeep_core::{ReservationError, ReservationResult, RoomLine};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingPayment {
    pub user_id: Uuid,
    pub creator_id: Uuid,
    pub booking_id: Uuid,
    pub travel_statement_id: Option<Uuid>,
    pub fingerprint: String,
    pub amount: i64,
    pub gateway_reference: String,
}

fn reference_key(reference: &str) -> String {
    format!("ledger:ref:{}", reference)
}

fn user_key(creator_id: Uuid) -> String {
    format!("ledger:user:{}", creator_id)
}

fn fingerprint_key(fingerprint: &str) -> String {
    format!("ledger:fingerprint:{}", fingerprint)
}

/// SHA-256 over the canonical booking payload. Line order does not matter.
pub fn fingerprint(
    creator_id: Uuid,
    user_id: Uuid,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    lines: &[RoomLine],
    travel_statement_id: Option<Uuid>,
) -> String {
    let mut sorted: Vec<&RoomLine> = lines.iter().collect();
    sorted.sort_by_key(|line| line.room_id);

    let mut hasher = Sha256::new();
    hasher.update(creator_id.as_bytes());
    hasher.update(user_id.as_bytes());
    hasher.update(check_in.to_rfc3339().as_bytes());
    hasher.update(check_out.to_rfc3339().as_bytes());
    for line in sorted {
        hasher.update(line.room_id.as_bytes());
        hasher.update(line.quantity.to_be_bytes());
    }
    if let Some(statement) = travel_statement_id {
        hasher.update(statement.as_bytes());
    }
    hex::encode(hasher.finalize())
}

#[derive(Clone)]
pub struct IdempotencyLedger {
    markers: Arc<dyn MarkerStore>,
    ttl: Duration,
}

impl IdempotencyLedger {
    pub fn new(markers: Arc<dyn MarkerStore>, ttl: Duration) -> Self {
        Self { markers, ttl }
    }

    /// Write all three keys. The user index now points at this session.
    pub async fn record(&self, entry: &PendingPayment) -> ReservationResult<()> {
        let payload = serde_json::to_string(entry).map_err(ReservationError::storage)?;
        self.markers
            .set(&reference_key(&entry.gateway_reference), &payload, self.ttl)
            .await?;
        self.markers
            .set(&user_key(entry.creator_id), &entry.gateway_reference, self.ttl)
            .await?;
        self.markers
            .set(&fingerprint_key(&entry.fingerprint), &entry.booking_id.to_string(), self.ttl)
            .await?;
        Ok(())
    }

    /// The creator's live session, if its reference entry has not been consumed or expired.
    pub async fn current_for_user(&self, creator_id: Uuid) -> ReservationResult<Option<PendingPayment>> {
        let Some(reference) = self.markers.get(&user_key(creator_id)).await? else {
            return Ok(None);
        };
        match self.markers.get(&reference_key(&reference)).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    pub async fn booking_for_fingerprint(&self, fingerprint: &str) -> ReservationResult<Option<Uuid>> {
        let raw = self.markers.get(&fingerprint_key(fingerprint)).await?;
        Ok(raw.and_then(|id| Uuid::parse_str(&id).ok()))
    }

    /// Atomically take the entry for a gateway reference. Only one caller ever gets it.
    pub async fn consume(&self, reference: &str) -> ReservationResult<Option<PendingPayment>> {
        match self.markers.take(&reference_key(reference)).await? {
            Some(raw) => decode(&raw).map(Some),
            None => Ok(None),
        }
    }

    /// Free the creator to start again. Leaves the user index alone if a newer
    /// session has replaced this one.
    pub async fn release_user(&self, entry: &PendingPayment) -> ReservationResult<()> {
        self.markers
            .delete_if_equals(&user_key(entry.creator_id), &entry.gateway_reference)
            .await?;
        self.markers.delete(&fingerprint_key(&entry.fingerprint)).await
    }

    /// Drop every key of the entry.
    pub async fn forget(&self, entry: &PendingPayment) -> ReservationResult<()> {
        self.markers.delete(&reference_key(&entry.gateway_reference)).await?;
        self.release_user(entry).await
    }

    /// Retire a superseded session once its replacement is committed. A late callback
    /// for the old reference then finds nothing.
    pub async fn supersede(&self, prior: &PendingPayment, current: &PendingPayment) -> ReservationResult<()> {
        self.markers.delete(&reference_key(&prior.gateway_reference)).await?;
        if prior.fingerprint != current.fingerprint {
            self.markers.delete(&fingerprint_key(&prior.fingerprint)).await?;
        }
        Ok(())
    }

    /// Best-effort variant of `forget` for cleanup paths that must not fail.
    pub async fn discard(&self, entry: &PendingPayment) {
        if let Err(e) = self.forget(entry).await {
            warn!(reference = %entry.gateway_reference, error = %e, "Could not clear ledger entry");
        }
    }
}

fn decode(raw: &str) -> ReservationResult<PendingPayment> {
    serde_json::from_str(raw).map_err(ReservationError::storage)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Marker store without TTLs, enough for index-path checks.
    #[derive(Default)]
    struct MapMarkers(Mutex<HashMap<String, String>>);

    #[async_trait]
    impl MarkerStore for MapMarkers {
        async fn set(&self, key: &str, value: &str, _ttl: Duration) -> ReservationResult<()> {
            self.0.lock().await.insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn get(&self, key: &str) -> ReservationResult<Option<String>> {
            Ok(self.0.lock().await.get(key).cloned())
        }

        async fn delete(&self, key: &str) -> ReservationResult<()> {
            self.0.lock().await.remove(key);
            Ok(())
        }

        async fn take(&self, key: &str) -> ReservationResult<Option<String>> {
            Ok(self.0.lock().await.remove(key))
        }

        async fn delete_if_equals(&self, key: &str, expected: &str) -> ReservationResult<bool> {
            let mut map = self.0.lock().await;
            if map.get(key).map(String::as_str) == Some(expected) {
                map.remove(key);
                Ok(true)
            } else {
                Ok(false)
            }
        }
    }

    fn entry(creator_id: Uuid, reference: &str) -> PendingPayment {
        PendingPayment {
            user_id: creator_id,
            creator_id,
            booking_id: Uuid::new_v4(),
            travel_statement_id: None,
            fingerprint: format!("fp-{reference}"),
            amount: 270,
            gateway_reference: reference.to_string(),
        }
    }

    fn ledger() -> IdempotencyLedger {
        IdempotencyLedger::new(Arc::new(MapMarkers::default()), Duration::from_secs(900))
    }

    #[tokio::test]
    async fn both_index_paths_reach_the_entry() {
        let ledger = ledger();
        let creator = Uuid::new_v4();
        let pending = entry(creator, "ref-1");
        ledger.record(&pending).await.unwrap();

        assert_eq!(ledger.current_for_user(creator).await.unwrap(), Some(pending.clone()));
        assert_eq!(
            ledger.booking_for_fingerprint("fp-ref-1").await.unwrap(),
            Some(pending.booking_id)
        );
        assert_eq!(ledger.consume("ref-1").await.unwrap(), Some(pending));
        assert_eq!(ledger.consume("ref-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn consumed_entry_is_no_longer_current() {
        let ledger = ledger();
        let creator = Uuid::new_v4();
        ledger.record(&entry(creator, "ref-1")).await.unwrap();

        ledger.consume("ref-1").await.unwrap();
        assert_eq!(ledger.current_for_user(creator).await.unwrap(), None);
    }

    #[tokio::test]
    async fn releasing_a_superseded_session_keeps_the_newer_one() {
        let ledger = ledger();
        let creator = Uuid::new_v4();
        let old = entry(creator, "ref-old");
        let new = entry(creator, "ref-new");
        ledger.record(&old).await.unwrap();
        ledger.record(&new).await.unwrap();

        ledger.release_user(&old).await.unwrap();
        assert_eq!(ledger.current_for_user(creator).await.unwrap(), Some(new));
    }

    #[tokio::test]
    async fn forget_clears_every_key() {
        let ledger = ledger();
        let creator = Uuid::new_v4();
        let pending = entry(creator, "ref-1");
        ledger.record(&pending).await.unwrap();

        ledger.forget(&pending).await.unwrap();
        assert_eq!(ledger.current_for_user(creator).await.unwrap(), None);
        assert_eq!(ledger.booking_for_fingerprint("fp-ref-1").await.unwrap(), None);
        assert_eq!(ledger.consume("ref-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn supersede_keeps_a_shared_fingerprint() {
        let ledger = ledger();
        let creator = Uuid::new_v4();
        let old = entry(creator, "ref-old");
        let mut new = entry(creator, "ref-new");
        new.fingerprint = old.fingerprint.clone();
        ledger.record(&old).await.unwrap();
        ledger.record(&new).await.unwrap();

        ledger.supersede(&old, &new).await.unwrap();
        assert_eq!(ledger.consume("ref-old").await.unwrap(), None);
        assert_eq!(
            ledger.booking_for_fingerprint(&new.fingerprint).await.unwrap(),
            Some(new.booking_id)
        );
    }

    #[test]
    fn fingerprint_ignores_line_order() {
        let creator = Uuid::new_v4();
        let now = Utc::now();
        let later = now + chrono::Duration::days(1);
        let a = RoomLine { room_id: Uuid::new_v4(), quantity: 2 };
        let b = RoomLine { room_id: Uuid::new_v4(), quantity: 1 };

        let first = fingerprint(creator, creator, now, later, &[a, b], None);
        let second = fingerprint(creator, creator, now, later, &[b, a], None);
        let other = fingerprint(creator, creator, now, later, &[a], None);

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(first.len(), 64);
    }
}
