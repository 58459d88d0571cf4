use std::sync::Arc;
use innkeep_booking::{CallbackHandler, ReservationService, SettlementService};
use innkeep_store::{EventProducer, RedisClient};

use crate::metrics::Metrics;
use crate::middleware::resiliency::ResiliencyState;

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationService>,
    pub callbacks: Arc<CallbackHandler>,
    pub settlement: Arc<SettlementService>,
    /// Rate limiting is skipped without Redis (tests, local runs).
    pub redis: Option<Arc<RedisClient>>,
    pub kafka: Option<Arc<EventProducer>>,
    pub auth: AuthConfig,
    pub metrics: Arc<Metrics>,
    pub resiliency: Arc<ResiliencyState>,
}
