use chrono::{DateTime, Utc};
use innkeep_core::pricing::payout_amount;
use innkeep_core::repository::ReservationStore;
use innkeep_core::{
    BookingRequest, ReservationError, ReservationResult, Transaction, TransactionKind, Transition,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::policy::BookingPolicy;
use crate::reservation::{abandon, release_booking};

pub const PAYOUT_METHOD: &str = "PAYOUT";

/// Bookings a sweep changed, for audit.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SweepReport {
    pub affected: Vec<Uuid>,
}

impl SweepReport {
    pub fn len(&self) -> usize {
        self.affected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.affected.is_empty()
    }
}

/// Result of one full scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SettlementRun {
    pub expired: SweepReport,
    pub paid_out: SweepReport,
    pub released: SweepReport,
}

/// Periodic repair of state the request path cannot guarantee.
///
/// Every sweep is idempotent: each change is a conditional transition or a
/// flag flip, so a row already handled is skipped by the next pass.
pub struct SettlementService {
    store: Arc<dyn ReservationStore>,
    policy: BookingPolicy,
}

impl SettlementService {
    pub fn new(store: Arc<dyn ReservationStore>, policy: BookingPolicy) -> Self {
        Self { store, policy }
    }

    pub async fn run_all(&self, now: DateTime<Utc>) -> ReservationResult<SettlementRun> {
        Ok(SettlementRun {
            expired: self.expire_stale(now).await?,
            paid_out: self.pay_out_due(now).await?,
            released: self.release_completed(now).await?,
        })
    }

    /// `PENDING` bookings older than the payment session window become `UN_PURCHASED`.
    pub async fn expire_stale(&self, now: DateTime<Utc>) -> ReservationResult<SweepReport> {
        let cutoff = now - self.policy.session_window();
        let stale = self.store.find_stale_pending(cutoff).await?;

        let mut report = SweepReport::default();
        for booking in stale {
            match self.expire_one(&booking).await {
                Ok(true) => report.affected.push(booking.id),
                Ok(false) => {}
                Err(e) => error!(booking_id = %booking.id, error = %e, "Failed to expire booking"),
            }
        }

        if !report.is_empty() {
            info!(count = report.len(), bookings = ?report.affected, "Expired stale pending bookings");
        }
        Ok(report)
    }

    async fn expire_one(&self, booking: &BookingRequest) -> ReservationResult<bool> {
        let mut uow = self.store.begin().await?;
        let released = release_booking(uow.as_mut(), booking.id, Transition::Expire).await;
        match released {
            Ok(true) => {
                uow.commit().await?;
                Ok(true)
            }
            other => {
                abandon(uow).await;
                other
            }
        }
    }

    /// `PURCHASED` bookings past check-in become `SUCCEED` with one payout to the owner.
    pub async fn pay_out_due(&self, now: DateTime<Utc>) -> ReservationResult<SweepReport> {
        let due = self.store.find_due_purchased(now).await?;

        let mut report = SweepReport::default();
        for booking in due {
            match self.pay_out_one(&booking, now).await {
                Ok(true) => report.affected.push(booking.id),
                Ok(false) => {}
                Err(e) => error!(booking_id = %booking.id, error = %e, "Failed to settle booking"),
            }
        }

        if !report.is_empty() {
            info!(count = report.len(), bookings = ?report.affected, "Paid out settled bookings");
        }
        Ok(report)
    }

    async fn pay_out_one(&self, booking: &BookingRequest, now: DateTime<Utc>) -> ReservationResult<bool> {
        let owner_id = self
            .store
            .get_accommodation(booking.accommodation_id)
            .await?
            .map(|a| a.owner_id)
            .ok_or_else(|| ReservationError::NotFound(format!("accommodation {}", booking.accommodation_id)))?;

        let charged = self
            .store
            .list_transactions(booking.id)
            .await?
            .into_iter()
            .find(|t| t.kind == TransactionKind::Charge)
            .map(|t| t.amount)
            .unwrap_or(booking.total_amount);

        let payout = Transaction {
            id: Uuid::new_v4(),
            kind: TransactionKind::Payout,
            booking_request_id: booking.id,
            amount: payout_amount(charged, self.policy.payout_percent),
            payment_method: PAYOUT_METHOD.to_string(),
            gateway_reference: None,
            bank_code: None,
            bank_transaction_no: None,
            pay_date: now,
            creator_id: booking.creator_id,
            receiver_id: Some(owner_id),
            created_at: now,
        };

        let mut uow = self.store.begin().await?;
        let written = async {
            if !uow.transition(booking.id, Transition::Settle).await? {
                return Ok(false);
            }
            uow.insert_transaction(&payout).await?;
            Ok::<_, ReservationError>(true)
        }
        .await;

        match written {
            Ok(true) => {
                uow.commit().await?;
                info!(booking_id = %booking.id, owner_id = %owner_id, amount = payout.amount, "Payout issued");
                Ok(true)
            }
            other => {
                abandon(uow).await;
                other
            }
        }
    }

    /// Settled stays past check-out hand their units back to the pool, once.
    pub async fn release_completed(&self, now: DateTime<Utc>) -> ReservationResult<SweepReport> {
        let completed = self.store.find_unreleased_completed(now).await?;

        let mut report = SweepReport::default();
        for booking in completed {
            match self.release_one(booking.id).await {
                Ok(true) => report.affected.push(booking.id),
                Ok(false) => {}
                Err(e) => error!(booking_id = %booking.id, error = %e, "Failed to release inventory"),
            }
        }

        if !report.is_empty() {
            info!(count = report.len(), bookings = ?report.affected, "Released inventory of completed stays");
        }
        Ok(report)
    }

    async fn release_one(&self, booking_id: Uuid) -> ReservationResult<bool> {
        let mut uow = self.store.begin().await?;
        let written = async {
            let details = uow.booking_details(booking_id).await?;
            let room_ids: Vec<Uuid> = details.iter().map(|d| d.room_id).collect();
            uow.lock_rooms(&room_ids).await?;

            if !uow.mark_inventory_released(booking_id).await? {
                return Ok(false);
            }
            for detail in &details {
                uow.release_units(detail.room_id, detail.quantity).await?;
            }
            Ok::<_, ReservationError>(true)
        }
        .await;

        match written {
            Ok(true) => {
                uow.commit().await?;
                Ok(true)
            }
            other => {
                abandon(uow).await;
                other
            }
        }
    }
}
