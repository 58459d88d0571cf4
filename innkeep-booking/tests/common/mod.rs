#![allow(dead_code)]

use chrono::{DateTime, Duration, DurationRound, Utc};
use innkeep_booking::{
    BookingPolicy, CallbackHandler, IdempotencyLedger, MockPaymentGateway, RecordingNotifier,
    ReservationService, SettlementService,
};
use innkeep_core::payment::PaymentCallback;
use innkeep_core::snapshot::{AvailabilitySnapshot, SearchCriteria, SnapshotRoom};
use innkeep_core::{
    Accommodation, BookingReceipt, ContactInfo, CreateBookingCommand, Requester, Role,
    RoomInventory, RoomLine,
};
use innkeep_shared::Masked;
use innkeep_store::{InMemoryMarkerStore, InMemoryReservationStore, InMemorySnapshotStore};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

pub struct Harness {
    pub store: InMemoryReservationStore,
    pub markers: Arc<InMemoryMarkerStore>,
    pub snapshots: Arc<InMemorySnapshotStore>,
    pub gateway: Arc<MockPaymentGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub ledger: IdempotencyLedger,
    pub reservations: Arc<ReservationService>,
    pub callbacks: CallbackHandler,
    pub settlement: SettlementService,
    pub policy: BookingPolicy,
    pub owner_id: Uuid,
    pub accommodation: Accommodation,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
}

pub fn harness() -> Harness {
    let policy = BookingPolicy::default();
    let store = InMemoryReservationStore::default();
    let markers = Arc::new(InMemoryMarkerStore::new());
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let ledger = IdempotencyLedger::new(markers.clone(), policy.session_ttl);

    let reservations = Arc::new(ReservationService::new(
        Arc::new(store.clone()),
        snapshots.clone(),
        gateway.clone(),
        ledger.clone(),
        policy.clone(),
    ));
    let callbacks = CallbackHandler::new(Arc::new(store.clone()), ledger.clone(), notifier.clone());
    let settlement = SettlementService::new(Arc::new(store.clone()), policy.clone());

    let owner_id = Uuid::new_v4();
    let accommodation = store.seed_accommodation(owner_id);
    let check_in = (Utc::now() + Duration::days(3))
        .duration_trunc(Duration::hours(1))
        .unwrap_or_else(|_| Utc::now() + Duration::days(3));
    let check_out = check_in + Duration::days(2);

    Harness {
        store,
        markers,
        snapshots,
        gateway,
        notifier,
        ledger,
        reservations,
        callbacks,
        settlement,
        policy,
        owner_id,
        accommodation,
        check_in,
        check_out,
    }
}

impl Harness {
    pub fn add_room(&self, unit_price: i64, units: i32) -> RoomInventory {
        self.store.seed_room(self.accommodation.id, unit_price, units)
    }

    /// Cache a search result showing each room at its price with `remaining` units.
    pub async fn search(&self, rooms: &[(&RoomInventory, i32)]) -> String {
        let token = Uuid::new_v4().to_string();
        let snapshot = AvailabilitySnapshot {
            accommodation_id: self.accommodation.id,
            owner_id: self.owner_id,
            criteria: SearchCriteria {
                check_in: self.check_in,
                check_out: self.check_out,
                guests: Some(2),
            },
            rooms: rooms
                .iter()
                .map(|(room, remaining)| {
                    (
                        room.id,
                        SnapshotRoom {
                            discounted_price: room.unit_price,
                            original_price: room.unit_price + room.unit_price / 5,
                            remaining_units: *remaining,
                        },
                    )
                })
                .collect::<HashMap<_, _>>(),
            issued_at: Utc::now(),
        };
        self.snapshots.put(&token, snapshot).await;
        token
    }

    pub fn command(&self, user_id: Uuid, role: Role, token: &str, lines: &[(Uuid, i32)]) -> CreateBookingCommand {
        CreateBookingCommand {
            requester: Requester { user_id, role },
            guest_id: None,
            session_token: token.to_string(),
            check_in: self.check_in,
            check_out: self.check_out,
            rooms: lines
                .iter()
                .map(|(room_id, quantity)| RoomLine { room_id: *room_id, quantity: *quantity })
                .collect(),
            contact: ContactInfo {
                full_name: "Linh Pham".to_string(),
                email: Masked::from("linh@example.com"),
                phone: Masked::from("0912345678"),
            },
            travel_statement_id: None,
        }
    }

    /// Search then book in one go, as a guest.
    pub async fn book(&self, user_id: Uuid, room: &RoomInventory, quantity: i32) -> BookingReceipt {
        let token = self.search(&[(room, room.available_units)]).await;
        self.reservations
            .create_booking(self.command(user_id, Role::Guest, &token, &[(room.id, quantity)]))
            .await
            .expect("booking should be created")
    }

    pub fn available(&self, room: &RoomInventory) -> i32 {
        self.store.room(room.id).expect("room exists").available_units
    }
}

pub fn success_callback(receipt: &BookingReceipt) -> PaymentCallback {
    PaymentCallback {
        reference: receipt.gateway_reference.clone(),
        result_code: "00".to_string(),
        amount: receipt.amount,
        bank_code: Some("NCB".to_string()),
        pay_date: Some("20240101120000".to_string()),
        bank_transaction_no: Some("14012345".to_string()),
    }
}

pub fn failure_callback(receipt: &BookingReceipt) -> PaymentCallback {
    PaymentCallback {
        result_code: "24".to_string(),
        ..success_callback(receipt)
    }
}
