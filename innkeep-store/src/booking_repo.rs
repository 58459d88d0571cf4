use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeep_core::models::ContactInfo;
use innkeep_core::repository::{ReservationStore, UnitOfWork};
use innkeep_core::{
    Accommodation, BookingRequest, BookingRequestDetail, BookingStatus, ReservationError,
    ReservationResult, RoomInventory, Transaction, TransactionKind, Transition,
};
use innkeep_shared::Masked;
use sqlx::{PgPool, Postgres};
use std::collections::HashSet;
use uuid::Uuid;

/// Upper bound on rows a single sweep pass picks up.
const SWEEP_BATCH: i64 = 500;

const BOOKING_COLUMNS: &str = "id, user_id, creator_id, accommodation_id, contact_name, contact_email, \
     contact_phone, check_in, check_out, total_rooms, total_amount, status, transaction_id, \
     travel_statement_id, inventory_released, deleted, created_at, updated_at";

const ROOM_COLUMNS: &str =
    "id, accommodation_id, unit_price, total_units, available_units, version, updated_at";

/// Postgres-backed reservation storage. Room exclusivity comes from `SELECT ... FOR UPDATE`.
#[derive(Clone)]
pub struct PgReservationStore {
    pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgReservationStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self { pool, lock_timeout_ms }
    }

    async fn find_bookings(
        &self,
        status: BookingStatus,
        condition: &str,
        cutoff: DateTime<Utc>,
    ) -> ReservationResult<Vec<BookingRequest>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM booking_requests \
             WHERE status = $1 AND NOT deleted AND {condition} < $2 \
             ORDER BY {condition} LIMIT $3"
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(status.as_str())
            .bind(cutoff)
            .bind(SWEEP_BATCH)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.into_iter().map(BookingRequest::try_from).collect()
    }
}

/// Lock waits and deadlocks are retryable conflicts, everything else is storage failure.
fn db_error(err: sqlx::Error) -> ReservationError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some("55P03") | Some("40P01") => {
                return ReservationError::Conflict(db.message().to_string());
            }
            _ => {}
        }
    }
    ReservationError::storage(err)
}

#[derive(sqlx::FromRow)]
struct RoomRow {
    id: Uuid,
    accommodation_id: Uuid,
    unit_price: i64,
    total_units: i32,
    available_units: i32,
    version: i64,
    updated_at: DateTime<Utc>,
}

impl From<RoomRow> for RoomInventory {
    fn from(row: RoomRow) -> Self {
        Self {
            id: row.id,
            accommodation_id: row.accommodation_id,
            unit_price: row.unit_price,
            total_units: row.total_units,
            available_units: row.available_units,
            version: row.version,
            updated_at: row.updated_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    user_id: Uuid,
    creator_id: Uuid,
    accommodation_id: Uuid,
    contact_name: String,
    contact_email: String,
    contact_phone: String,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    total_rooms: i32,
    total_amount: i64,
    status: String,
    transaction_id: Option<Uuid>,
    travel_statement_id: Option<Uuid>,
    inventory_released: bool,
    deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for BookingRequest {
    type Error = ReservationError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            creator_id: row.creator_id,
            accommodation_id: row.accommodation_id,
            contact: ContactInfo {
                full_name: row.contact_name,
                email: Masked(row.contact_email),
                phone: Masked(row.contact_phone),
            },
            check_in: row.check_in,
            check_out: row.check_out,
            total_rooms: row.total_rooms,
            total_amount: row.total_amount,
            status: row.status.parse()?,
            transaction_id: row.transaction_id,
            travel_statement_id: row.travel_statement_id,
            inventory_released: row.inventory_released,
            deleted: row.deleted,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct DetailRow {
    id: Uuid,
    booking_request_id: Uuid,
    room_id: Uuid,
    quantity: i32,
    price: i64,
    original_price: i64,
}

impl From<DetailRow> for BookingRequestDetail {
    fn from(row: DetailRow) -> Self {
        Self {
            id: row.id,
            booking_request_id: row.booking_request_id,
            room_id: row.room_id,
            quantity: row.quantity,
            price: row.price,
            original_price: row.original_price,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    kind: String,
    booking_request_id: Uuid,
    amount: i64,
    payment_method: String,
    gateway_reference: Option<String>,
    bank_code: Option<String>,
    bank_transaction_no: Option<String>,
    pay_date: DateTime<Utc>,
    creator_id: Uuid,
    receiver_id: Option<Uuid>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = ReservationError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let kind = match row.kind.as_str() {
            "CHARGE" => TransactionKind::Charge,
            "PAYOUT" => TransactionKind::Payout,
            other => return Err(ReservationError::Storage(format!("unknown transaction kind {other}"))),
        };
        Ok(Self {
            id: row.id,
            kind,
            booking_request_id: row.booking_request_id,
            amount: row.amount,
            payment_method: row.payment_method,
            gateway_reference: row.gateway_reference,
            bank_code: row.bank_code,
            bank_transaction_no: row.bank_transaction_no,
            pay_date: row.pay_date,
            creator_id: row.creator_id,
            receiver_id: row.receiver_id,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AccommodationRow {
    id: Uuid,
    owner_id: Uuid,
    booking_count: i64,
}

#[async_trait]
impl ReservationStore for PgReservationStore {
    async fn begin(&self) -> ReservationResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await.map_err(db_error)?;
        Ok(Box::new(PgUnitOfWork {
            tx,
            lock_timeout_ms: self.lock_timeout_ms,
            timeout_set: false,
            locked: HashSet::new(),
        }))
    }

    async fn get_booking(&self, id: Uuid) -> ReservationResult<Option<BookingRequest>> {
        let sql = format!("SELECT {BOOKING_COLUMNS} FROM booking_requests WHERE id = $1 AND NOT deleted");
        let row: Option<BookingRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.map(BookingRequest::try_from).transpose()
    }

    async fn get_details(&self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>> {
        let rows: Vec<DetailRow> = sqlx::query_as(
            "SELECT id, booking_request_id, room_id, quantity, price, original_price \
             FROM booking_request_details WHERE booking_request_id = $1 ORDER BY room_id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(BookingRequestDetail::from).collect())
    }

    async fn get_room(&self, id: Uuid) -> ReservationResult<Option<RoomInventory>> {
        let sql = format!("SELECT {ROOM_COLUMNS} FROM room_inventory WHERE id = $1");
        let row: Option<RoomRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(row.map(RoomInventory::from))
    }

    async fn get_accommodation(&self, id: Uuid) -> ReservationResult<Option<Accommodation>> {
        let row: Option<AccommodationRow> =
            sqlx::query_as("SELECT id, owner_id, booking_count FROM accommodations WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(row.map(|r| Accommodation {
            id: r.id,
            owner_id: r.owner_id,
            booking_count: r.booking_count,
        }))
    }

    async fn list_transactions(&self, booking_id: Uuid) -> ReservationResult<Vec<Transaction>> {
        let rows: Vec<TransactionRow> = sqlx::query_as(
            "SELECT id, kind, booking_request_id, amount, payment_method, gateway_reference, \
             bank_code, bank_transaction_no, pay_date, creator_id, receiver_id, created_at \
             FROM transactions WHERE booking_request_id = $1 ORDER BY created_at",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    async fn find_stale_pending(&self, created_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        self.find_bookings(BookingStatus::Pending, "created_at", created_before).await
    }

    async fn find_due_purchased(&self, check_in_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        self.find_bookings(BookingStatus::Purchased, "check_in", check_in_before).await
    }

    async fn find_unreleased_completed(&self, check_out_before: DateTime<Utc>) -> ReservationResult<Vec<BookingRequest>> {
        let sql = format!(
            "SELECT {BOOKING_COLUMNS} FROM booking_requests \
             WHERE status = $1 AND NOT deleted AND NOT inventory_released AND check_out < $2 \
             ORDER BY check_out LIMIT $3"
        );
        let rows: Vec<BookingRow> = sqlx::query_as(&sql)
            .bind(BookingStatus::Succeed.as_str())
            .bind(check_out_before)
            .bind(SWEEP_BATCH)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.into_iter().map(BookingRequest::try_from).collect()
    }
}

pub struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, Postgres>,
    lock_timeout_ms: u64,
    timeout_set: bool,
    locked: HashSet<Uuid>,
}

/// Advisory lock key for a creator: the two halves of the id folded into one bigint.
fn creator_lock_key(creator_id: Uuid) -> i64 {
    let bits = creator_id.as_u128();
    ((bits >> 64) as u64 ^ bits as u64) as i64
}

impl PgUnitOfWork {
    async fn bound_lock_wait(&mut self) -> ReservationResult<()> {
        if self.timeout_set {
            return Ok(());
        }
        // SET LOCAL takes no bind parameters; the value is a plain integer.
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        self.timeout_set = true;
        Ok(())
    }

    fn ensure_locked(&self, room_id: Uuid) -> ReservationResult<()> {
        if self.locked.contains(&room_id) {
            Ok(())
        } else {
            Err(ReservationError::Storage(format!("room {room_id} mutated without its row lock")))
        }
    }
}

#[async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn lock_creator(&mut self, creator_id: Uuid) -> ReservationResult<()> {
        self.bound_lock_wait().await?;
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(creator_lock_key(creator_id))
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn lock_rooms(&mut self, room_ids: &[Uuid]) -> ReservationResult<Vec<RoomInventory>> {
        let mut ids = room_ids.to_vec();
        ids.sort();
        ids.dedup();

        self.bound_lock_wait().await?;

        let sql = format!(
            "SELECT {ROOM_COLUMNS} FROM room_inventory WHERE id = ANY($1) ORDER BY id FOR UPDATE"
        );
        let rows: Vec<RoomRow> = sqlx::query_as(&sql)
            .bind(&ids)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(db_error)?;

        let rooms: Vec<RoomInventory> = rows.into_iter().map(RoomInventory::from).collect();
        self.locked.extend(rooms.iter().map(|r| r.id));
        Ok(rooms)
    }

    async fn reserve_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<RoomInventory> {
        self.ensure_locked(room_id)?;
        let sql = format!(
            "UPDATE room_inventory \
             SET available_units = available_units - $2, version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND available_units >= $2 RETURNING {ROOM_COLUMNS}"
        );
        let row: Option<RoomRow> = sqlx::query_as(&sql)
            .bind(room_id)
            .bind(quantity)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(db_error)?;

        row.map(RoomInventory::from)
            .ok_or(ReservationError::InsufficientInventory { rooms: vec![room_id] })
    }

    async fn release_units(&mut self, room_id: Uuid, quantity: i32) -> ReservationResult<()> {
        self.ensure_locked(room_id)?;
        sqlx::query(
            "UPDATE room_inventory \
             SET available_units = LEAST(total_units, available_units + $2), version = version + 1, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(room_id)
        .bind(quantity)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn booking_details(&mut self, booking_id: Uuid) -> ReservationResult<Vec<BookingRequestDetail>> {
        let rows: Vec<DetailRow> = sqlx::query_as(
            "SELECT id, booking_request_id, room_id, quantity, price, original_price \
             FROM booking_request_details WHERE booking_request_id = $1 ORDER BY room_id",
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(rows.into_iter().map(BookingRequestDetail::from).collect())
    }

    async fn insert_booking(&mut self, booking: &BookingRequest, details: &[BookingRequestDetail]) -> ReservationResult<()> {
        for detail in details {
            self.ensure_locked(detail.room_id)?;
        }

        sqlx::query(
            r#"
            INSERT INTO booking_requests (id, user_id, creator_id, accommodation_id, contact_name, contact_email,
                contact_phone, check_in, check_out, total_rooms, total_amount, status, transaction_id,
                travel_statement_id, inventory_released, deleted, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            "#,
        )
        .bind(booking.id)
        .bind(booking.user_id)
        .bind(booking.creator_id)
        .bind(booking.accommodation_id)
        .bind(&booking.contact.full_name)
        .bind(booking.contact.email.expose())
        .bind(booking.contact.phone.expose())
        .bind(booking.check_in)
        .bind(booking.check_out)
        .bind(booking.total_rooms)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.transaction_id)
        .bind(booking.travel_statement_id)
        .bind(booking.inventory_released)
        .bind(booking.deleted)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        for detail in details {
            sqlx::query(
                r#"
                INSERT INTO booking_request_details (id, booking_request_id, room_id, quantity, price, original_price)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(detail.id)
            .bind(detail.booking_request_id)
            .bind(detail.room_id)
            .bind(detail.quantity)
            .bind(detail.price)
            .bind(detail.original_price)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        }

        Ok(())
    }

    async fn transition(&mut self, booking_id: Uuid, transition: Transition) -> ReservationResult<bool> {
        let result = sqlx::query(
            "UPDATE booking_requests SET status = $1, updated_at = NOW() WHERE id = $2 AND status = $3",
        )
        .bind(transition.to_status().as_str())
        .bind(booking_id)
        .bind(transition.from_status().as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn insert_transaction(&mut self, transaction: &Transaction) -> ReservationResult<()> {
        // UNIQUE (booking_request_id, kind) backs the once-per-direction rule.
        sqlx::query(
            r#"
            INSERT INTO transactions (id, kind, booking_request_id, amount, payment_method, gateway_reference,
                bank_code, bank_transaction_no, pay_date, creator_id, receiver_id, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.kind.as_str())
        .bind(transaction.booking_request_id)
        .bind(transaction.amount)
        .bind(&transaction.payment_method)
        .bind(&transaction.gateway_reference)
        .bind(&transaction.bank_code)
        .bind(&transaction.bank_transaction_no)
        .bind(transaction.pay_date)
        .bind(transaction.creator_id)
        .bind(transaction.receiver_id)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn link_charge(&mut self, booking_id: Uuid, transaction_id: Uuid) -> ReservationResult<()> {
        let result = sqlx::query(
            "UPDATE booking_requests SET transaction_id = $1, updated_at = NOW() \
             WHERE id = $2 AND transaction_id IS NULL",
        )
        .bind(transaction_id)
        .bind(booking_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(ReservationError::Storage(format!("booking {booking_id} already has a charge")));
        }
        Ok(())
    }

    async fn mark_inventory_released(&mut self, booking_id: Uuid) -> ReservationResult<bool> {
        let result = sqlx::query(
            "UPDATE booking_requests SET inventory_released = TRUE, updated_at = NOW() \
             WHERE id = $1 AND NOT inventory_released",
        )
        .bind(booking_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn attach_to_statement(&mut self, statement_id: Uuid, booking_id: Uuid) -> ReservationResult<()> {
        sqlx::query(
            "INSERT INTO travel_statement_bookings (statement_id, booking_request_id) \
             VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(statement_id)
        .bind(booking_id)
        .execute(&mut *self.tx)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn increment_booking_count(&mut self, accommodation_id: Uuid) -> ReservationResult<()> {
        sqlx::query("UPDATE accommodations SET booking_count = booking_count + 1 WHERE id = $1")
            .bind(accommodation_id)
            .execute(&mut *self.tx)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> ReservationResult<()> {
        self.tx.commit().await.map_err(db_error)
    }

    async fn rollback(self: Box<Self>) -> ReservationResult<()> {
        self.tx.rollback().await.map_err(db_error)
    }
}
