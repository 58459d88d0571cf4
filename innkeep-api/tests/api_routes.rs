use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use chrono::{DurationRound, Utc};
use innkeep_api::metrics::Metrics;
use innkeep_api::middleware::{Claims, ResiliencyState};
use innkeep_api::state::AuthConfig;
use innkeep_api::{app, AppState};
use innkeep_booking::{
    BookingPolicy, CallbackHandler, IdempotencyLedger, MockPaymentGateway, RecordingNotifier,
    ReservationService, SettlementService,
};
use innkeep_core::snapshot::{AvailabilitySnapshot, SearchCriteria, SnapshotRoom};
use innkeep_core::{Accommodation, RoomInventory};
use innkeep_store::{InMemoryMarkerStore, InMemoryReservationStore, InMemorySnapshotStore};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

const SECRET: &str = "test-secret";

struct TestApp {
    router: Router,
    store: InMemoryReservationStore,
    snapshots: Arc<InMemorySnapshotStore>,
    gateway: Arc<MockPaymentGateway>,
    accommodation: Accommodation,
    room: RoomInventory,
    check_in: chrono::DateTime<Utc>,
}

fn test_app(breaker_threshold: usize) -> TestApp {
    let policy = BookingPolicy::default();
    let store = InMemoryReservationStore::default();
    let snapshots = Arc::new(InMemorySnapshotStore::new());
    let gateway = Arc::new(MockPaymentGateway::new());
    let ledger = IdempotencyLedger::new(Arc::new(InMemoryMarkerStore::new()), policy.session_ttl);

    let state = AppState {
        reservations: Arc::new(ReservationService::new(
            Arc::new(store.clone()),
            snapshots.clone(),
            gateway.clone(),
            ledger.clone(),
            policy.clone(),
        )),
        callbacks: Arc::new(CallbackHandler::new(
            Arc::new(store.clone()),
            ledger,
            Arc::new(RecordingNotifier::new()),
        )),
        settlement: Arc::new(SettlementService::new(Arc::new(store.clone()), policy)),
        redis: None,
        kafka: None,
        auth: AuthConfig { secret: SECRET.to_string() },
        metrics: Arc::new(Metrics::new().unwrap()),
        resiliency: Arc::new(ResiliencyState::new(breaker_threshold, Duration::from_secs(60))),
    };

    let accommodation = store.seed_accommodation(Uuid::new_v4());
    let room = store.seed_room(accommodation.id, 100, 4);
    let check_in = (Utc::now() + chrono::Duration::days(7))
        .duration_trunc(chrono::Duration::hours(1))
        .unwrap();

    TestApp {
        router: app(state),
        store,
        snapshots,
        gateway,
        accommodation,
        room,
        check_in,
    }
}

fn token(user_id: Uuid, role: &str) -> String {
    let claims = Claims {
        sub: user_id.to_string(),
        role: role.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_bytes())).unwrap()
}

impl TestApp {
    async fn search(&self) -> String {
        let session_token = Uuid::new_v4().to_string();
        let snapshot = AvailabilitySnapshot {
            accommodation_id: self.accommodation.id,
            owner_id: self.accommodation.owner_id,
            criteria: SearchCriteria {
                check_in: self.check_in,
                check_out: self.check_in + chrono::Duration::days(1),
                guests: Some(1),
            },
            rooms: HashMap::from([(
                self.room.id,
                SnapshotRoom {
                    discounted_price: 100,
                    original_price: 120,
                    remaining_units: 4,
                },
            )]),
            issued_at: Utc::now(),
        };
        self.snapshots.put(&session_token, snapshot).await;
        session_token
    }

    async fn booking_body(&self, quantity: i32) -> Value {
        json!({
            "session_token": self.search().await,
            "check_in": self.check_in,
            "check_out": self.check_in + chrono::Duration::days(1),
            "rooms": [{ "room_id": self.room.id, "quantity": quantity }],
            "contact": {
                "full_name": "Minh Tran",
                "email": "minh@example.com",
                "phone": "0901234567"
            }
        })
    }

    async fn send(&self, method: Method, uri: &str, bearer: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(bearer) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", bearer));
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    async fn create(&self, bearer: &str, quantity: i32) -> (StatusCode, Value) {
        let body = self.booking_body(quantity).await;
        self.send(Method::POST, "/v1/bookings", Some(bearer), Some(body)).await
    }
}

fn callback(receipt: &Value, code: &str) -> Value {
    json!({
        "reference": receipt["gateway_reference"],
        "result_code": code,
        "amount": receipt["amount"],
        "bank_code": "NCB",
        "pay_date": "20250101120000"
    })
}

#[tokio::test]
async fn health_is_public() {
    let t = test_app(5);
    let response = t
        .router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn booking_routes_require_a_token() {
    let t = test_app(5);
    let body = t.booking_body(1).await;

    let (status, _) = t.send(Method::POST, "/v1/bookings", None, Some(body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = t.send(Method::POST, "/v1/bookings", Some("not-a-jwt"), Some(body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn book_pay_and_read_back() {
    let t = test_app(5);
    let guest = Uuid::new_v4();
    let bearer = token(guest, "GUEST");

    let (status, receipt) = t.create(&bearer, 2).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["status"], "PENDING");
    assert_eq!(receipt["amount"], 216);
    assert_eq!(t.store.room(t.room.id).unwrap().available_units, 2);

    let (status, ack) = t
        .send(Method::POST, "/v1/webhooks/payments", None, Some(callback(&receipt, "00")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "PURCHASED");

    // Gateways redeliver; the second delivery is acknowledged and ignored.
    let (status, ack) = t
        .send(Method::POST, "/v1/webhooks/payments", None, Some(callback(&receipt, "00")))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "IGNORED");
    assert_eq!(t.store.transactions().len(), 1);

    let uri = format!("/v1/bookings/{}", receipt["booking_id"].as_str().unwrap());
    let (status, view) = t.send(Method::GET, &uri, Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["booking"]["status"], "PURCHASED");
    assert_eq!(view["details"][0]["price"], 100);
    assert_eq!(view["booking"]["contact"]["email"], "minh@example.com");

    let (status, _) = t.send(Method::GET, &uri, Some(&token(Uuid::new_v4(), "GUEST")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let response = t
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("innkeep_bookings_created_total 1"));
}

#[tokio::test]
async fn business_admin_gets_reduced_surcharge() {
    let t = test_app(5);
    let (status, receipt) = t.create(&token(Uuid::new_v4(), "BUSINESS_ADMIN"), 1).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(receipt["amount"], 104);
}

#[tokio::test]
async fn rejections_map_to_client_errors() {
    let t = test_app(5);

    let (status, body) = t.create(&token(t.accommodation.owner_id, "GUEST"), 1).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["retryable"], false);

    let (status, _) = t.create(&token(Uuid::new_v4(), "GUEST"), 9).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let mut body = t.booking_body(1).await;
    body["session_token"] = json!("never-issued");
    let (status, _) = t
        .send(Method::POST, "/v1/bookings", Some(&token(Uuid::new_v4(), "GUEST")), Some(body))
        .await;
    assert_eq!(status, StatusCode::GONE);
}

#[tokio::test]
async fn declined_payment_is_acknowledged() {
    let t = test_app(5);
    let (_, receipt) = t.create(&token(Uuid::new_v4(), "GUEST"), 1).await;

    let (status, ack) = t
        .send(Method::POST, "/v1/webhooks/payments", None, Some(callback(&receipt, "24")))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "PAYMENT_FAILED");
    assert!(t.store.transactions().is_empty());
}

#[tokio::test]
async fn fatal_callback_answers_500_and_is_counted() {
    let t = test_app(5);
    let (_, receipt) = t.create(&token(Uuid::new_v4(), "GUEST"), 1).await;

    t.store.fail_commits(true);
    let (status, body) = t
        .send(Method::POST, "/v1/webhooks/payments", None, Some(callback(&receipt, "00")))
        .await;
    t.store.fail_commits(false);

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Internal Server Error");

    let response = t
        .router
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert!(String::from_utf8_lossy(&text).contains("innkeep_callback_fatal_total 1"));
}

#[tokio::test]
async fn creator_cancels_pending_booking() {
    let t = test_app(5);
    let guest = Uuid::new_v4();
    let bearer = token(guest, "GUEST");
    let (_, receipt) = t.create(&bearer, 3).await;
    let uri = format!("/v1/bookings/{}/cancel", receipt["booking_id"].as_str().unwrap());

    let (status, _) = t.send(Method::POST, &uri, Some(&token(Uuid::new_v4(), "GUEST")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, booking) = t.send(Method::POST, &uri, Some(&bearer), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "UN_PURCHASED");
    assert_eq!(t.store.room(t.room.id).unwrap().available_units, 4);

    let (status, _) = t.send(Method::POST, &uri, Some(&bearer), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn admin_routes_need_operator_role() {
    let t = test_app(5);
    let (_, receipt) = t.create(&token(Uuid::new_v4(), "GUEST"), 1).await;
    let uri = format!("/v1/admin/bookings/{}/void", receipt["booking_id"].as_str().unwrap());
    let reason = json!({ "reason": "accommodation withdrawn" });

    let (status, _) = t
        .send(Method::POST, &uri, Some(&token(Uuid::new_v4(), "GUEST")), Some(reason.clone()))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let operator = token(Uuid::new_v4(), "OPERATOR");
    let (status, booking) = t.send(Method::POST, &uri, Some(&operator), Some(reason)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(booking["status"], "CANCELED");

    let (status, run) = t.send(Method::POST, "/v1/admin/settlement/run", Some(&operator), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["expired"]["affected"], json!([]));
}

#[tokio::test]
async fn gateway_outage_trips_the_breaker() {
    let t = test_app(2);
    let bearer = token(Uuid::new_v4(), "GUEST");
    t.gateway.set_failing(true);

    for _ in 0..2 {
        let (status, body) = t.create(&bearer, 1).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["retryable"], true);
    }
    assert_eq!(t.store.room(t.room.id).unwrap().available_units, 4);

    // Open now: the gateway is healthy again but requests fail fast until the reset timeout.
    t.gateway.set_failing(false);
    let (status, body) = t.create(&bearer, 1).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("OPEN"));
    assert!(t.store.bookings().is_empty());
}
