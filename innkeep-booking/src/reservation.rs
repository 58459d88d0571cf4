use chrono::Utc;
use innkeep_core::cache::SnapshotStore;
use innkeep_core::payment::{PaymentGateway, PaymentSession, SessionRequest};
use innkeep_core::repository::{ReservationStore, UnitOfWork};
use innkeep_core::snapshot::{check_lines, AvailabilitySnapshot, PricedLine};
use innkeep_core::{
    BookingReceipt, BookingRequest, BookingRequestDetail, BookingStatus, CreateBookingCommand,
    ReservationError, ReservationResult, Requester, Role, RoomInventory, Transition,
};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::{self, IdempotencyLedger, PendingPayment};
use crate::policy::BookingPolicy;

/// A booking with its line items, as returned to readers.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    pub booking: BookingRequest,
    pub details: Vec<BookingRequestDetail>,
}

/// Create, cancel and void. Every inventory change runs inside one unit of work
/// holding the row locks of all rooms it touches.
pub struct ReservationService {
    store: Arc<dyn ReservationStore>,
    snapshots: Arc<dyn SnapshotStore>,
    gateway: Arc<dyn PaymentGateway>,
    ledger: IdempotencyLedger,
    policy: BookingPolicy,
}

struct Reserved {
    prior: Option<PendingPayment>,
    booking: BookingRequest,
    entry: PendingPayment,
    session: PaymentSession,
}

impl ReservationService {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        snapshots: Arc<dyn SnapshotStore>,
        gateway: Arc<dyn PaymentGateway>,
        ledger: IdempotencyLedger,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            store,
            snapshots,
            gateway,
            ledger,
            policy,
        }
    }

    pub async fn create_booking(&self, command: CreateBookingCommand) -> ReservationResult<BookingReceipt> {
        check_lines(&command.rooms)?;
        if command.check_out <= command.check_in {
            return Err(ReservationError::InvalidRequest(
                "check-out must be after check-in".to_string(),
            ));
        }

        let snapshot = self
            .snapshots
            .get(&command.session_token)
            .await?
            .ok_or_else(|| ReservationError::SnapshotExpired(command.session_token.clone()))?;
        if snapshot.criteria.check_in != command.check_in || snapshot.criteria.check_out != command.check_out {
            return Err(ReservationError::InvalidRequest(
                "stay dates differ from the searched dates".to_string(),
            ));
        }
        let priced = snapshot.validate(command.requester.user_id, &command.rooms)?;

        let mut uow = self.store.begin().await?;
        let outcome = self.reserve(uow.as_mut(), &command, &snapshot, &priced).await;
        let reserved = match outcome {
            Ok(reserved) => reserved,
            Err(e) => {
                abandon(uow).await;
                return Err(e);
            }
        };

        // The correlation entry must exist before the guest can reach the payment page.
        if let Err(e) = self.ledger.record(&reserved.entry).await {
            abandon(uow).await;
            self.ledger.discard(&reserved.entry).await;
            return Err(e);
        }
        if let Err(e) = uow.commit().await {
            self.ledger.discard(&reserved.entry).await;
            return Err(e);
        }

        if let Some(prior) = reserved.prior.as_ref() {
            if let Err(e) = self.ledger.supersede(prior, &reserved.entry).await {
                warn!(reference = %prior.gateway_reference, error = %e, "Could not retire superseded session");
            }
        }

        let Reserved { booking, session, .. } = reserved;
        info!(
            booking_id = %booking.id,
            creator_id = %booking.creator_id,
            amount = booking.total_amount,
            reference = %session.reference,
            "Booking created"
        );

        Ok(BookingReceipt {
            booking_id: booking.id,
            status: booking.status,
            amount: booking.total_amount,
            gateway_reference: session.reference,
            redirect_url: session.redirect_url,
            expires_at: booking.created_at + self.policy.session_window(),
        })
    }

    async fn reserve(
        &self,
        uow: &mut dyn UnitOfWork,
        command: &CreateBookingCommand,
        snapshot: &AvailabilitySnapshot,
        priced: &[PricedLine],
    ) -> ReservationResult<Reserved> {
        // Held until commit, so the creator's live session cannot change under us.
        uow.lock_creator(command.requester.user_id).await?;
        let prior = self.ledger.current_for_user(command.requester.user_id).await?;

        let prior_details = match prior.as_ref() {
            Some(entry) => uow.booking_details(entry.booking_id).await?,
            None => Vec::new(),
        };

        let mut room_ids: Vec<Uuid> = priced.iter().map(|line| line.room_id).collect();
        room_ids.extend(prior_details.iter().map(|d| d.room_id));
        let locked: HashMap<Uuid, RoomInventory> = uow
            .lock_rooms(&room_ids)
            .await?
            .into_iter()
            .map(|room| (room.id, room))
            .collect();

        let foreign: Vec<String> = priced
            .iter()
            .filter(|line| {
                locked
                    .get(&line.room_id)
                    .map_or(true, |room| room.accommodation_id != snapshot.accommodation_id)
            })
            .map(|line| line.room_id.to_string())
            .collect();
        if !foreign.is_empty() {
            return Err(ReservationError::InvalidRoomSelection(format!(
                "rooms no longer offered: {}",
                foreign.join(", ")
            )));
        }

        let mut available: HashMap<Uuid, i32> = locked
            .values()
            .map(|room| (room.id, room.available_units))
            .collect();

        if let Some(entry) = prior.as_ref() {
            if uow.transition(entry.booking_id, Transition::Supersede).await? {
                for detail in &prior_details {
                    uow.release_units(detail.room_id, detail.quantity).await?;
                    if let (Some(units), Some(room)) = (available.get_mut(&detail.room_id), locked.get(&detail.room_id)) {
                        *units = (*units + detail.quantity).min(room.total_units);
                    }
                }
                info!(booking_id = %entry.booking_id, creator_id = %entry.creator_id, "Superseded pending booking");
            }
        }

        let short: Vec<Uuid> = priced
            .iter()
            .filter(|line| available.get(&line.room_id).copied().unwrap_or(0) < line.quantity)
            .map(|line| line.room_id)
            .collect();
        if !short.is_empty() {
            return Err(ReservationError::InsufficientInventory { rooms: short });
        }

        let now = Utc::now();
        let booking_id = Uuid::new_v4();
        let amount = self.policy.surcharge.charge_total(priced, command.requester.role);
        let user_id = command.guest_id.unwrap_or(command.requester.user_id);

        let booking = BookingRequest {
            id: booking_id,
            user_id,
            creator_id: command.requester.user_id,
            accommodation_id: snapshot.accommodation_id,
            contact: command.contact.clone(),
            check_in: command.check_in,
            check_out: command.check_out,
            total_rooms: priced.iter().map(|line| line.quantity).sum(),
            total_amount: amount,
            status: BookingStatus::Pending,
            transaction_id: None,
            travel_statement_id: command.travel_statement_id,
            inventory_released: false,
            deleted: false,
            created_at: now,
            updated_at: now,
        };
        let details: Vec<BookingRequestDetail> = priced
            .iter()
            .map(|line| BookingRequestDetail {
                id: Uuid::new_v4(),
                booking_request_id: booking_id,
                room_id: line.room_id,
                quantity: line.quantity,
                price: line.price,
                original_price: line.original_price,
            })
            .collect();

        uow.insert_booking(&booking, &details).await?;
        for line in priced {
            uow.reserve_units(line.room_id, line.quantity).await?;
        }

        let session = self.open_session(&booking).await?;

        let entry = PendingPayment {
            user_id,
            creator_id: booking.creator_id,
            booking_id,
            travel_statement_id: booking.travel_statement_id,
            fingerprint: ledger::fingerprint(
                booking.creator_id,
                user_id,
                booking.check_in,
                booking.check_out,
                &command.rooms,
                booking.travel_statement_id,
            ),
            amount,
            gateway_reference: session.reference.clone(),
        };

        Ok(Reserved { prior, booking, entry, session })
    }

    /// Bounded so a hung gateway cannot hold room locks indefinitely.
    async fn open_session(&self, booking: &BookingRequest) -> ReservationResult<PaymentSession> {
        let request = SessionRequest {
            booking_id: booking.id,
            amount: booking.total_amount,
            currency: self.policy.currency.clone(),
            return_url: self.policy.return_url.clone(),
            description: format!("Booking {}", booking.id),
        };

        match tokio::time::timeout(self.policy.gateway_timeout, self.gateway.create_session(&request)).await {
            Ok(result) => result,
            Err(_) => Err(ReservationError::GatewayUnavailable("payment session request timed out".to_string())),
        }
    }

    /// Creator withdraws a booking they have not paid for.
    pub async fn cancel_booking(&self, requester: Requester, booking_id: Uuid) -> ReservationResult<BookingRequest> {
        let booking = self.load(booking_id).await?;
        if booking.creator_id != requester.user_id {
            return Err(ReservationError::Forbidden(format!(
                "booking {} belongs to another user",
                booking_id
            )));
        }
        Transition::UserCancel.apply(booking.status)?;

        let canceled = self.withdraw(booking, Transition::UserCancel).await?;
        self.clear_ledger(&canceled).await;

        info!(booking_id = %booking_id, creator_id = %requester.user_id, "Booking canceled by creator");
        Ok(canceled)
    }

    /// Operator action for a withdrawn accommodation or a fraud hold.
    pub async fn void_booking(&self, booking_id: Uuid, reason: &str) -> ReservationResult<BookingRequest> {
        let booking = self.load(booking_id).await?;
        Transition::OperatorVoid.apply(booking.status)?;

        let voided = self.withdraw(booking, Transition::OperatorVoid).await?;
        self.clear_ledger(&voided).await;

        warn!(booking_id = %booking_id, reason, "Booking voided by operator");
        Ok(voided)
    }

    pub async fn get_booking(&self, requester: Requester, booking_id: Uuid) -> ReservationResult<BookingView> {
        let booking = self.load(booking_id).await?;
        let allowed = requester.role == Role::Operator
            || requester.user_id == booking.creator_id
            || requester.user_id == booking.user_id;
        if !allowed {
            return Err(ReservationError::Forbidden(format!(
                "booking {} belongs to another user",
                booking_id
            )));
        }

        let details = self.store.get_details(booking_id).await?;
        Ok(BookingView { booking, details })
    }

    async fn load(&self, booking_id: Uuid) -> ReservationResult<BookingRequest> {
        self.store
            .get_booking(booking_id)
            .await?
            .ok_or_else(|| ReservationError::NotFound(format!("booking {}", booking_id)))
    }

    /// Take a pending booking out of play and hand its units back.
    async fn withdraw(&self, mut booking: BookingRequest, transition: Transition) -> ReservationResult<BookingRequest> {
        let mut uow = self.store.begin().await?;
        let released = release_booking(uow.as_mut(), booking.id, transition).await;
        match released {
            Ok(true) => {
                uow.commit().await?;
                booking.status = transition.to_status();
                booking.updated_at = Utc::now();
                Ok(booking)
            }
            Ok(false) => {
                abandon(uow).await;
                // Lost a race with the callback or the expiry sweep.
                let current = self.load(booking.id).await?;
                Err(ReservationError::InvalidStateTransition {
                    from: current.status.to_string(),
                    to: transition.to_status().to_string(),
                })
            }
            Err(e) => {
                abandon(uow).await;
                Err(e)
            }
        }
    }

    async fn clear_ledger(&self, booking: &BookingRequest) {
        match self.ledger.current_for_user(booking.creator_id).await {
            Ok(Some(entry)) if entry.booking_id == booking.id => self.ledger.discard(&entry).await,
            Ok(_) => {}
            Err(e) => warn!(booking_id = %booking.id, error = %e, "Could not read ledger entry"),
        }
    }
}

/// Lock the booking's rooms, apply a releasing transition and return the units.
/// Returns false, with nothing written, when the booking was not in the source state.
pub(crate) async fn release_booking(
    uow: &mut dyn UnitOfWork,
    booking_id: Uuid,
    transition: Transition,
) -> ReservationResult<bool> {
    let details = uow.booking_details(booking_id).await?;
    let room_ids: Vec<Uuid> = details.iter().map(|d| d.room_id).collect();
    uow.lock_rooms(&room_ids).await?;

    if !uow.transition(booking_id, transition).await? {
        return Ok(false);
    }
    if transition.releases_inventory() {
        for detail in &details {
            uow.release_units(detail.room_id, detail.quantity).await?;
        }
    }
    Ok(true)
}

pub(crate) async fn abandon(uow: Box<dyn UnitOfWork>) {
    if let Err(e) = uow.rollback().await {
        warn!(error = %e, "Rollback failed");
    }
}
