use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ReservationResult;
use crate::models::{
    Accommodation, BookingRequest, BookingRequestDetail, RoomInventory, Transaction,
};
use crate::status::Transition;

/// Durable storage for bookings, inventory and the ledger of money movements.
#[async_trait]
pub trait ReservationStore: Send + Sync {
    /// Open a unit of work. Row locks taken inside it are held until commit or rollback.
    async fn begin(&self) -> ReservationResult<Box<dyn UnitOfWork>>;

    async fn get_booking(&self, id: Uuid) -> ReservationResult<Option<BookingRequest>>;

    async fn get_details(&self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>>;

    async fn get_room(&self, id: Uuid) -> ReservationResult<Option<RoomInventory>>;

    async fn get_accommodation(&self, id: Uuid) -> ReservationResult<Option<Accommodation>>;

    async fn list_transactions(&self, booking_id: Uuid) -> ReservationResult<Vec<Transaction>>;

    /// `PENDING` bookings created before the cutoff.
    async fn find_stale_pending(
        &self,
        created_before: DateTime<Utc>,
    ) -> ReservationResult<Vec<BookingRequest>>;

    /// `PURCHASED` bookings whose check-in is before the cutoff.
    async fn find_due_purchased(
        &self,
        check_in_before: DateTime<Utc>,
    ) -> ReservationResult<Vec<BookingRequest>>;

    /// `SUCCEED` bookings past check-out that still hold their units.
    async fn find_unreleased_completed(
        &self,
        check_out_before: DateTime<Utc>,
    ) -> ReservationResult<Vec<BookingRequest>>;
}

/// One atomic batch of writes.
///
/// A create takes the creator lock first, so one user's creates run one at a time.
/// Callers lock every room they will touch with a single `lock_rooms` call before
/// reading inventory; implementations acquire the set in id order, so concurrent
/// callers never deadlock on overlapping sets. Dropping without `commit` rolls back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Exclusive per-creator lock, held until commit or rollback. Taken before any
    /// room lock. Fails with `Conflict` when the wait times out.
    async fn lock_creator(&mut self, creator_id: Uuid) -> ReservationResult<()>;

    /// Exclusive locks on the given rooms. Fails with `Conflict` when the wait times out.
    /// Rooms that do not exist are simply absent from the result.
    async fn lock_rooms(&mut self, room_ids: &[Uuid]) -> ReservationResult<Vec<RoomInventory>>;

    /// Take units out of the pool of a locked room and advance its version.
    async fn reserve_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<RoomInventory>;

    /// Return units to the pool of a locked room.
    async fn release_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<()>;

    async fn booking_details(&mut self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>>;

    async fn insert_booking(
        &mut self,
        booking: &BookingRequest,
        details: &[BookingRequestDetail],
    ) -> ReservationResult<()>;

    /// Conditional update: moves the booking only if it is still in the transition's
    /// source state. Returns whether a row changed.
    async fn transition(&mut self, booking_id: Uuid, transition: Transition) -> ReservationResult<bool>;

    async fn insert_transaction(&mut self, transaction: &Transaction) -> ReservationResult<()>;

    /// Attach the charge transaction. Fails if the booking already has one.
    async fn link_charge(&mut self, booking_id: Uuid, transaction_id: Uuid) -> ReservationResult<()>;

    /// Flip `inventory_released`. Returns false when it was already set.
    async fn mark_inventory_released(&mut self, booking_id: Uuid) -> ReservationResult<bool>;

    async fn attach_to_statement(&mut self, statement_id: Uuid, booking_id: Uuid) -> ReservationResult<()>;

    async fn increment_booking_count(&mut self, accommodation_id: Uuid) -> ReservationResult<()>;

    async fn commit(self: Box<Self>) -> ReservationResult<()>;

    async fn rollback(self: Box<Self>) -> ReservationResult<()>;
}
