use chrono::Utc;
use innkeep_booking::{SettlementRun, SweepReport};
use innkeep_shared::models::events::{BookingsExpiredEvent, PayoutsIssuedEvent};
use innkeep_store::events::{TOPIC_BOOKINGS_EXPIRED, TOPIC_PAYOUTS_ISSUED};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::state::AppState;

/// Expires pending bookings whose payment session ran out.
pub async fn start_expiry_worker(state: AppState, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = every.as_secs(), "Expiry worker started");

    loop {
        ticker.tick().await;
        match state.settlement.expire_stale(Utc::now()).await {
            Ok(report) => {
                state.metrics.bookings_expired.inc_by(report.len() as u64);
                publish_expired(&state, &report).await;
            }
            Err(e) => error!("Expiry sweep failed: {}", e),
        }
    }
}

/// Pays out stays past check-in, then hands back units of stays past check-out.
pub async fn start_payout_worker(state: AppState, every: Duration) {
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(interval_secs = every.as_secs(), "Payout worker started");

    loop {
        ticker.tick().await;
        let now = Utc::now();
        match state.settlement.pay_out_due(now).await {
            Ok(report) => {
                state.metrics.payouts.inc_by(report.len() as u64);
                publish_payouts(&state, &report).await;
            }
            Err(e) => error!("Payout sweep failed: {}", e),
        }
        if let Err(e) = state.settlement.release_completed(now).await {
            error!("Release sweep failed: {}", e);
        }
    }
}

pub async fn publish_settlement(state: &AppState, run: &SettlementRun) {
    publish_expired(state, &run.expired).await;
    publish_payouts(state, &run.paid_out).await;
}

async fn publish_expired(state: &AppState, report: &SweepReport) {
    let Some(kafka) = &state.kafka else { return };
    if report.is_empty() {
        return;
    }
    let event = BookingsExpiredEvent {
        booking_ids: report.affected.clone(),
        timestamp: Utc::now().timestamp(),
    };
    kafka.publish_json(TOPIC_BOOKINGS_EXPIRED, "sweep", &event).await;
}

async fn publish_payouts(state: &AppState, report: &SweepReport) {
    let Some(kafka) = &state.kafka else { return };
    if report.is_empty() {
        return;
    }
    let event = PayoutsIssuedEvent {
        booking_ids: report.affected.clone(),
        timestamp: Utc::now().timestamp(),
    };
    kafka.publish_json(TOPIC_PAYOUTS_ISSUED, "sweep", &event).await;
}
