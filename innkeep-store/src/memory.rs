//! In-process adapters for the storage ports.
//!
//! They keep the same contract as the Postgres and Redis adapters: per-room exclusive
//! locks with a bounded wait, conditional transitions, and all-or-nothing units of
//! work. Used by the test suites and by local runs without infrastructure.
//!
//! There is no read isolation: writes of an open unit are visible to other readers
//! before commit. Rollback restores only the fields the unit itself wrote.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::cache::{MarkerStore, SnapshotStore};
use innkeep_core::repository::{ReservationStore, UnitOfWork};
use innkeep_core::snapshot::AvailabilitySnapshot;
use innkeep_core::{
    Accommodation, BookingRequest, BookingRequestDetail, BookingStatus, ReservationError,
    ReservationResult, RoomInventory, Transaction, Transition,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    rooms: HashMap<Uuid, RoomInventory>,
    accommodations: HashMap<Uuid, Accommodation>,
    bookings: HashMap<Uuid, BookingRequest>,
    details: HashMap<Uuid, Vec<BookingRequestDetail>>,
    transactions: Vec<Transaction>,
    statements: HashSet<(Uuid, Uuid)>,
}

fn guard(tables: &Mutex<Tables>) -> MutexGuard<'_, Tables> {
    tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Prior value of each field a unit wrote. An abandoned unit puts back only those
/// fields, so edits made meanwhile to other fields of the same row survive.
enum Undo {
    Units { room_id: Uuid, available_units: i32, version: i64 },
    Booking(Uuid),
    Details(Uuid),
    Status(Uuid, BookingStatus),
    Charge(Uuid, Option<Uuid>),
    Released(Uuid, bool),
    Transaction(Uuid),
    BookingCount(Uuid),
    Statement(Uuid, Uuid),
}

#[derive(Clone)]
pub struct InMemoryReservationStore {
    tables: Arc<Mutex<Tables>>,
    room_locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
    creator_locks: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
    lock_timeout: Duration,
    fail_commits: Arc<Mutex<bool>>,
}

impl Default for InMemoryReservationStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl InMemoryReservationStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            room_locks: Arc::new(Mutex::new(HashMap::new())),
            creator_locks: Arc::new(Mutex::new(HashMap::new())),
            lock_timeout,
            fail_commits: Arc::new(Mutex::new(false)),
        }
    }

    pub fn seed_accommodation(&self, owner_id: Uuid) -> Accommodation {
        let accommodation = Accommodation {
            id: Uuid::new_v4(),
            owner_id,
            booking_count: 0,
        };
        guard(&self.tables)
            .accommodations
            .insert(accommodation.id, accommodation.clone());
        accommodation
    }

    pub fn seed_room(&self, accommodation_id: Uuid, unit_price: i64, total_units: i32) -> RoomInventory {
        let room = RoomInventory::new(accommodation_id, unit_price, total_units);
        guard(&self.tables).rooms.insert(room.id, room.clone());
        room
    }

    /// Direct edit of a stored booking, e.g. to age it past a cutoff.
    pub fn modify_booking(&self, id: Uuid, edit: impl FnOnce(&mut BookingRequest)) {
        if let Some(booking) = guard(&self.tables).bookings.get_mut(&id) {
            edit(booking);
        }
    }

    /// Reprice a room outside any unit of work, as the catalogue would.
    pub fn set_unit_price(&self, room_id: Uuid, unit_price: i64) {
        if let Some(room) = guard(&self.tables).rooms.get_mut(&room_id) {
            room.unit_price = unit_price;
        }
    }

    pub fn booking(&self, id: Uuid) -> Option<BookingRequest> {
        guard(&self.tables).bookings.get(&id).cloned()
    }

    pub fn accommodation(&self, id: Uuid) -> Option<Accommodation> {
        guard(&self.tables).accommodations.get(&id).cloned()
    }

    pub fn room(&self, id: Uuid) -> Option<RoomInventory> {
        guard(&self.tables).rooms.get(&id).cloned()
    }

    pub fn bookings(&self) -> Vec<BookingRequest> {
        guard(&self.tables).bookings.values().cloned().collect()
    }

    pub fn transactions(&self) -> Vec<Transaction> {
        guard(&self.tables).transactions.clone()
    }

    pub fn statement_bookings(&self, statement_id: Uuid) -> Vec<Uuid> {
        guard(&self.tables)
            .statements
            .iter()
            .filter(|(statement, _)| *statement == statement_id)
            .map(|(_, booking)| *booking)
            .collect()
    }

    /// Make every subsequent commit fail and roll back.
    pub fn fail_commits(&self, fail: bool) {
        *self.fail_commits.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    async fn acquire(
        &self,
        locks: &Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>,
        id: Uuid,
    ) -> ReservationResult<OwnedMutexGuard<()>> {
        let lock = locks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(id)
            .or_default()
            .clone();
        tokio::time::timeout(self.lock_timeout, lock.lock_owned())
            .await
            .map_err(|_| ReservationError::Conflict(format!("timed out waiting for lock on {id}")))
    }

    fn filter_bookings(&self, predicate: impl Fn(&BookingRequest) -> bool) -> Vec<BookingRequest> {
        let mut found: Vec<BookingRequest> = guard(&self.tables)
            .bookings
            .values()
            .filter(|b| !b.deleted && predicate(b))
            .cloned()
            .collect();
        found.sort_by_key(|b| b.created_at);
        found
    }
}

#[async_trait]
impl ReservationStore for InMemoryReservationStore {
    async fn begin(&self) -> ReservationResult<Box<dyn UnitOfWork>> {
        Ok(Box::new(MemoryUnitOfWork {
            store: self.clone(),
            held: HashMap::new(),
            creator: None,
            journal: Vec::new(),
            finished: false,
        }))
    }

    async fn get_booking(&self, id: Uuid) -> ReservationResult<Option<BookingRequest>> {
        Ok(guard(&self.tables).bookings.get(&id).filter(|b| !b.deleted).cloned())
    }

    async fn get_details(&self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>> {
        Ok(guard(&self.tables).details.get(&booking_id).cloned().unwrap_or_default())
    }

    async fn get_room(&self, id: Uuid) -> ReservationResult<Option<RoomInventory>> {
        Ok(self.room(id))
    }

    async fn get_accommodation(&self, id: Uuid) -> ReservationResult<Option<Accommodation>> {
        Ok(guard(&self.tables).accommodations.get(&id).cloned())
    }

    async fn list_transactions(&self, booking_id: Uuid) -> ReservationResult<Vec<Transaction>> {
        Ok(guard(&self.tables)
            .transactions
            .iter()
            .filter(|t| t.booking_request_id == booking_id)
            .cloned()
            .collect())
    }

    async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        Ok(self.filter_bookings(|b| b.status == BookingStatus::Pending && b.created_at < created_before))
    }

    async fn find_due_purchased(&self, check_in_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        Ok(self.filter_bookings(|b| b.status == BookingStatus::Purchased && b.check_in < check_in_before))
    }

    async fn find_unreleased_completed(&self, check_out_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        Ok(self.filter_bookings(|b| {
            b.status == BookingStatus::Succeed && !b.inventory_released && b.check_out < check_out_before
        }))
    }
}

pub struct MemoryUnitOfWork {
    store: InMemoryReservationStore,
    held: HashMap<Uuid, OwnedMutexGuard<()>>,
    creator: Option<(Uuid, OwnedMutexGuard<()>)>,
    journal: Vec<Undo>,
    finished: bool,
}

impl MemoryUnitOfWork {
    fn ensure_locked(&self, room_id: Uuid) -> ReservationResult<()> {
        if self.held.contains_key(&room_id) {
            Ok(())
        } else {
            Err(ReservationError::Storage(format!("room {room_id} mutated without its lock")))
        }
    }

    fn undo(&mut self) {
        let mut tables = guard(&self.store.tables);
        while let Some(entry) = self.journal.pop() {
            match entry {
                Undo::Units { room_id, available_units, version } => {
                    if let Some(room) = tables.rooms.get_mut(&room_id) {
                        room.available_units = available_units;
                        room.version = version;
                    }
                }
                Undo::Booking(id) => {
                    tables.bookings.remove(&id);
                }
                Undo::Details(booking_id) => {
                    tables.details.remove(&booking_id);
                }
                Undo::Status(id, status) => {
                    if let Some(booking) = tables.bookings.get_mut(&id) {
                        booking.status = status;
                    }
                }
                Undo::Charge(id, transaction_id) => {
                    if let Some(booking) = tables.bookings.get_mut(&id) {
                        booking.transaction_id = transaction_id;
                    }
                }
                Undo::Released(id, released) => {
                    if let Some(booking) = tables.bookings.get_mut(&id) {
                        booking.inventory_released = released;
                    }
                }
                Undo::Transaction(id) => tables.transactions.retain(|t| t.id != id),
                Undo::BookingCount(accommodation_id) => {
                    if let Some(accommodation) = tables.accommodations.get_mut(&accommodation_id) {
                        accommodation.booking_count -= 1;
                    }
                }
                Undo::Statement(statement_id, booking_id) => {
                    tables.statements.remove(&(statement_id, booking_id));
                }
            }
        }
    }

    /// Apply `edit` to a booking and journal whichever tracked fields it changed.
    fn edit_booking<R>(&mut self, booking_id: Uuid, edit: impl FnOnce(&mut BookingRequest) -> R) -> ReservationResult<R> {
        let mut tables = guard(&self.store.tables);
        let booking = tables
            .bookings
            .get_mut(&booking_id)
            .ok_or_else(|| ReservationError::NotFound(format!("booking {booking_id}")))?;
        let (status, charge, released) = (booking.status, booking.transaction_id, booking.inventory_released);
        let result = edit(booking);

        let mut changed = Vec::new();
        if booking.status != status {
            changed.push(Undo::Status(booking_id, status));
        }
        if booking.transaction_id != charge {
            changed.push(Undo::Charge(booking_id, charge));
        }
        if booking.inventory_released != released {
            changed.push(Undo::Released(booking_id, released));
        }
        if !changed.is_empty() {
            booking.updated_at = Utc::now();
        }
        drop(tables);

        self.journal.extend(changed);
        Ok(result)
    }

    fn journal_units(&mut self, room: &RoomInventory) {
        self.journal.push(Undo::Units {
            room_id: room.id,
            available_units: room.available_units,
            version: room.version,
        });
    }
}

impl Drop for MemoryUnitOfWork {
    fn drop(&mut self) {
        if !self.finished {
            self.undo();
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn lock_creator(&mut self, creator_id: Uuid) -> ReservationResult<()> {
        if self.creator.as_ref().is_some_and(|(held, _)| *held == creator_id) {
            return Ok(());
        }
        let acquired = self.store.acquire(&self.store.creator_locks, creator_id).await?;
        self.creator = Some((creator_id, acquired));
        Ok(())
    }

    async fn lock_rooms(&mut self, room_ids: &[Uuid]) -> ReservationResult<Vec<RoomInventory>> {
        let mut ids = room_ids.to_vec();
        ids.sort();
        ids.dedup();

        for id in &ids {
            if self.held.contains_key(id) {
                continue;
            }
            let acquired = self.store.acquire(&self.store.room_locks, *id).await?;
            self.held.insert(*id, acquired);
        }

        let tables = guard(&self.store.tables);
        Ok(ids.iter().filter_map(|id| tables.rooms.get(id).cloned()).collect())
    }

    async fn reserve_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<RoomInventory> {
        self.ensure_locked(room_id)?;
        let mut tables = guard(&self.store.tables);
        let room = tables
            .rooms
            .get_mut(&room_id)
            .ok_or_else(|| ReservationError::InvalidRoomSelection(room_id.to_string()))?;
        if room.available_units < quantity {
            return Err(ReservationError::InsufficientInventory { rooms: vec![room_id] });
        }
        let previous = room.clone();
        room.available_units -= quantity;
        room.version += 1;
        room.updated_at = Utc::now();
        let updated = room.clone();
        drop(tables);

        self.journal_units(&previous);
        Ok(updated)
    }

    async fn release_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<()> {
        self.ensure_locked(room_id)?;
        let mut tables = guard(&self.store.tables);
        if let Some(room) = tables.rooms.get_mut(&room_id) {
            let previous = room.clone();
            room.available_units = (room.available_units + quantity).min(room.total_units);
            room.version += 1;
            room.updated_at = Utc::now();
            drop(tables);
            self.journal_units(&previous);
        }
        Ok(())
    }

    async fn booking_details(&mut self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>> {
        self.store.get_details(booking_id).await
    }

    async fn insert_booking(&mut self, booking: &BookingRequest, details: &[BookingRequestDetail]) -> ReservationResult<()> {
        for detail in details {
            self.ensure_locked(detail.room_id)?;
        }
        let mut tables = guard(&self.store.tables);
        if tables.bookings.contains_key(&booking.id) {
            return Err(ReservationError::Storage(format!("duplicate booking {}", booking.id)));
        }
        tables.bookings.insert(booking.id, booking.clone());
        tables.details.insert(booking.id, details.to_vec());
        drop(tables);

        self.journal.push(Undo::Booking(booking.id));
        self.journal.push(Undo::Details(booking.id));
        Ok(())
    }

    async fn transition(&mut self, booking_id: Uuid, transition: Transition) -> ReservationResult<bool> {
        self.edit_booking(booking_id, |booking| {
            if booking.status == transition.from_status() {
                booking.status = transition.to_status();
                true
            } else {
                false
            }
        })
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> ReservationResult<()> {
        let mut tables = guard(&self.store.tables);
        let duplicate = tables.transactions.iter().any(|t| {
            t.booking_request_id == transaction.booking_request_id && t.kind == transaction.kind
        });
        if duplicate {
            return Err(ReservationError::Storage(format!(
                "booking {} already has a {} transaction",
                transaction.booking_request_id,
                transaction.kind.as_str()
            )));
        }
        tables.transactions.push(transaction.clone());
        drop(tables);

        self.journal.push(Undo::Transaction(transaction.id));
        Ok(())
    }

    async fn link_charge(&mut self, booking_id: Uuid, transaction_id: Uuid) -> ReservationResult<()> {
        let linked = self.edit_booking(booking_id, |booking| {
            if booking.transaction_id.is_some() {
                false
            } else {
                booking.transaction_id = Some(transaction_id);
                true
            }
        })?;
        if linked {
            Ok(())
        } else {
            Err(ReservationError::Storage(format!("booking {booking_id} already has a charge")))
        }
    }

    async fn mark_inventory_released(&mut self, booking_id: Uuid) -> ReservationResult<bool> {
        self.edit_booking(booking_id, |booking| {
            !std::mem::replace(&mut booking.inventory_released, true)
        })
    }

    async fn attach_to_statement(&mut self, statement_id: Uuid, booking_id: Uuid) -> ReservationResult<()> {
        let inserted = guard(&self.store.tables).statements.insert((statement_id, booking_id));
        if inserted {
            self.journal.push(Undo::Statement(statement_id, booking_id));
        }
        Ok(())
    }

    async fn increment_booking_count(&mut self, accommodation_id: Uuid) -> ReservationResult<()> {
        let mut tables = guard(&self.store.tables);
        if let Some(accommodation) = tables.accommodations.get_mut(&accommodation_id) {
            accommodation.booking_count += 1;
            drop(tables);
            self.journal.push(Undo::BookingCount(accommodation_id));
        }
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> ReservationResult<()> {
        let fail = *self.store.fail_commits.lock().unwrap_or_else(|p| p.into_inner());
        if fail {
            self.undo();
            self.finished = true;
            return Err(ReservationError::Storage("commit rejected".to_string()));
        }
        self.journal.clear();
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> ReservationResult<()> {
        self.undo();
        self.finished = true;
        Ok(())
    }
}

/// TTL map with the same semantics as the Redis marker commands.
#[derive(Default)]
pub struct InMemoryMarkerStore {
    entries: AsyncMutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryMarkerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.lock().await.values().filter(|(_, exp)| *exp > now).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MarkerStore for InMemoryMarkerStore {
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> ReservationResult<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value.to_string(), Instant::now() + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> ReservationResult<Option<String>> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> ReservationResult<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> ReservationResult<Option<String>> {
        let removed = self.entries.lock().await.remove(key);
        Ok(removed
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value))
    }

    async fn delete_if_equals(&self, key: &str, expected: &str) -> ReservationResult<bool> {
        let mut entries = self.entries.lock().await;
        let live = matches!(
            entries.get(key),
            Some((value, expires)) if value == expected && *expires > Instant::now()
        );
        if live {
            entries.remove(key);
        }
        Ok(live)
    }
}

#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, AvailabilitySnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, session_token: &str, snapshot: AvailabilitySnapshot) {
        self.snapshots
            .write()
            .await
            .insert(session_token.to_string(), snapshot);
    }

    pub async fn evict(&self, session_token: &str) {
        self.snapshots.write().await.remove(session_token);
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn get(&self, session_token: &str) -> ReservationResult<Option<AvailabilitySnapshot>> {
        Ok(self.snapshots.read().await.get(session_token).cloned())
    }
}
