use chrono::Utc;
use innkeep_core::notification::NotificationService;
use innkeep_core::payment::PaymentCallback;
use innkeep_core::repository::ReservationStore;
use innkeep_core::{
    BookingRequest, ReservationError, ReservationResult, Transaction, TransactionKind, Transition,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::ledger::{IdempotencyLedger, PendingPayment};
use crate::reservation::abandon;

pub const CHARGE_METHOD: &str = "GATEWAY";

/// What a successful callback finalized.
#[derive(Debug, Clone, PartialEq)]
pub struct CallbackOutcome {
    pub booking_id: Uuid,
    pub accommodation_id: Uuid,
    pub user_id: Uuid,
    pub transaction_id: Uuid,
    pub amount: i64,
}

/// Reconciles the gateway's asynchronous result with the pending booking.
///
/// The ledger entry for the reference is consumed exactly once. Whatever goes wrong
/// after that point is surfaced as `CallbackFatal`: the entry is spent and the
/// callback cannot be replayed safely.
pub struct CallbackHandler {
    store: Arc<dyn ReservationStore>,
    ledger: IdempotencyLedger,
    notifier: Arc<dyn NotificationService>,
}

impl CallbackHandler {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        ledger: IdempotencyLedger,
        notifier: Arc<dyn NotificationService>,
    ) -> Self {
        Self { store, ledger, notifier }
    }

    pub async fn handle(&self, callback: &PaymentCallback) -> ReservationResult<CallbackOutcome> {
        let Some(entry) = self.ledger.consume(&callback.reference).await? else {
            warn!(reference = %callback.reference, code = %callback.result_code, "Unknown or expired payment callback");
            return Err(ReservationError::UnknownOrExpiredCallback(callback.reference.clone()));
        };

        if !callback.is_success() {
            if let Err(e) = self.ledger.release_user(&entry).await {
                warn!(reference = %callback.reference, error = %e, "Could not release user session marker");
            }
            info!(
                booking_id = %entry.booking_id,
                reference = %callback.reference,
                code = %callback.result_code,
                "Payment failed, booking left pending for expiry"
            );
            return Err(ReservationError::PaymentFailed {
                reference: callback.reference.clone(),
                code: callback.result_code.clone(),
            });
        }

        match self.finalize(&entry, callback).await {
            Ok(outcome) => {
                if let Err(e) = self.ledger.release_user(&entry).await {
                    warn!(reference = %callback.reference, error = %e, "Could not release user session marker");
                }
                self.notify_owner(&outcome).await;
                info!(
                    booking_id = %outcome.booking_id,
                    transaction_id = %outcome.transaction_id,
                    amount = outcome.amount,
                    "Booking purchased"
                );
                Ok(outcome)
            }
            Err(e) => {
                error!(
                    alert = true,
                    booking_id = %entry.booking_id,
                    reference = %callback.reference,
                    error = %e,
                    "Payment callback failed after its ledger entry was consumed"
                );
                Err(ReservationError::CallbackFatal {
                    reference: callback.reference.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn finalize(&self, entry: &PendingPayment, callback: &PaymentCallback) -> ReservationResult<CallbackOutcome> {
        if callback.amount != entry.amount {
            return Err(ReservationError::AmountMismatch {
                expected: entry.amount,
                received: callback.amount,
            });
        }

        let booking = self
            .store
            .get_booking(entry.booking_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("booking {}", entry.booking_id)))?;

        let now = Utc::now();
        let charge = Transaction {
            id: Uuid::new_v4(),
            kind: TransactionKind::Charge,
            booking_request_id: booking.id,
            amount: callback.amount,
            payment_method: CHARGE_METHOD.to_string(),
            gateway_reference: Some(callback.reference.clone()),
            bank_code: callback.bank_code.clone(),
            bank_transaction_no: callback.bank_transaction_no.clone(),
            pay_date: callback.paid_at().unwrap_or(now),
            creator_id: entry.creator_id,
            receiver_id: None,
            created_at: now,
        };

        let mut uow = self.store.begin().await?;
        let written = async {
            if !uow.transition(booking.id, Transition::PaymentConfirmed).await? {
                return Err(ReservationError::InvalidStateTransition {
                    from: booking.status.to_string(),
                    to: Transition::PaymentConfirmed.to_status().to_string(),
                });
            }
            uow.insert_transaction(&charge).await?;
            uow.link_charge(booking.id, charge.id).await?;
            if let Some(statement_id) = entry.travel_statement_id {
                uow.attach_to_statement(statement_id, booking.id).await?;
            }
            uow.increment_booking_count(booking.accommodation_id).await
        }
        .await;

        if let Err(e) = written {
            abandon(uow).await;
            return Err(e);
        }
        uow.commit().await?;

        Ok(outcome(&booking, &charge))
    }

    /// Fire-and-forget. A missing accommodation only costs the notification.
    async fn notify_owner(&self, outcome: &CallbackOutcome) {
        let owner = match self.store.get_accommodation(outcome.accommodation_id).await {
            Ok(Some(accommodation)) => accommodation.owner_id,
            Ok(None) => {
                warn!(accommodation_id = %outcome.accommodation_id, "No owner to notify");
                return;
            }
            Err(e) => {
                warn!(accommodation_id = %outcome.accommodation_id, error = %e, "Owner lookup failed");
                return;
            }
        };

        let content = format!("New paid booking {} for {}", outcome.booking_id, outcome.amount);
        self.notifier.send(&[owner], &content, Some(outcome.booking_id)).await;
    }
}

fn outcome(booking: &BookingRequest, charge: &Transaction) -> CallbackOutcome {
    CallbackOutcome {
        booking_id: booking.id,
        accommodation_id: booking.accommodation_id,
        user_id: booking.user_id,
        transaction_id: charge.id,
        amount: charge.amount,
    }
}
