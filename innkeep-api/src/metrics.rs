use axum::{extract::State, http::StatusCode};
use innkeep_booking::SettlementRun;
use prometheus::{Encoder, IntCounter, Registry, TextEncoder};

use crate::state::AppState;

pub struct Metrics {
    registry: Registry,
    pub bookings_created: IntCounter,
    pub bookings_expired: IntCounter,
    pub payouts: IntCounter,
    pub callback_fatal: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let bookings_created = IntCounter::new("innkeep_bookings_created_total", "Bookings reserved and sent to payment")?;
        let bookings_expired = IntCounter::new("innkeep_bookings_expired_total", "Pending bookings expired by the sweep")?;
        let payouts = IntCounter::new("innkeep_payouts_total", "Owner payouts issued")?;
        let callback_fatal = IntCounter::new(
            "innkeep_callback_fatal_total",
            "Payment callbacks that failed after their marker was consumed",
        )?;

        registry.register(Box::new(bookings_created.clone()))?;
        registry.register(Box::new(bookings_expired.clone()))?;
        registry.register(Box::new(payouts.clone()))?;
        registry.register(Box::new(callback_fatal.clone()))?;

        Ok(Self {
            registry,
            bookings_created,
            bookings_expired,
            payouts,
            callback_fatal,
        })
    }

    pub fn record_run(&self, run: &SettlementRun) {
        self.bookings_expired.inc_by(run.expired.len() as u64);
        self.payouts.inc_by(run.paid_out.len() as u64);
    }

    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&families, &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).to_string())
    }
}

pub async fn metrics_endpoint(State(state): State<AppState>) -> (StatusCode, String) {
    match state.metrics.render() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        ),
    }
}

pub async fn health() -> &'static str {
    "ok"
}
