use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use innkeep_api::{
    app,
    metrics::Metrics,
    middleware::ResiliencyState,
    state::{AppState, AuthConfig},
    worker,
};
use innkeep_booking::{
    BookingPolicy, CallbackHandler, HttpPaymentGateway, IdempotencyLedger, MockPaymentGateway,
    ReservationService, SettlementService,
};
use innkeep_core::payment::PaymentGateway;
use innkeep_store::app_config::{BusinessRules, Config, GatewayConfig};
use innkeep_store::{DbClient, EventProducer, KafkaNotifier, PgReservationStore, RedisClient};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn booking_policy(rules: &BusinessRules, gateway: &GatewayConfig) -> BookingPolicy {
    BookingPolicy {
        session_ttl: rules.payment_session_ttl(),
        surcharge: rules.surcharge_policy(),
        payout_percent: rules.payout_percent,
        currency: rules.currency.clone(),
        return_url: gateway.return_url.clone(),
        gateway_timeout: Duration::from_millis(gateway.timeout_ms),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "innkeep_api=debug,innkeep_booking=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("Failed to load config")?;
    tracing::info!("Starting Innkeep API on port {} ({})", config.server.port, config.run_mode);

    // Postgres
    let db = DbClient::new(&config.database).await.context("Failed to connect to Postgres")?;
    db.migrate().await.context("Failed to run migrations")?;
    let rules = db
        .fetch_business_rules(config.business_rules.clone())
        .await
        .context("Failed to load business rules")?;
    let policy = booking_policy(&rules, &config.gateway);
    let store = Arc::new(PgReservationStore::new(db.pool.clone(), config.database.lock_timeout_ms));

    // Redis: snapshots, ledger markers, rate limiting
    let redis = Arc::new(RedisClient::new(&config.redis.url).await.context("Failed to connect to Redis")?);

    // Kafka
    let kafka = Arc::new(EventProducer::new(&config.kafka.brokers).context("Failed to create Kafka producer")?);
    let notifier = Arc::new(KafkaNotifier::new(kafka.as_ref().clone()));

    let gateway: Arc<dyn PaymentGateway> = if config.gateway.base_url.is_empty() {
        tracing::warn!("No gateway base_url configured, using the mock payment gateway");
        Arc::new(MockPaymentGateway::new())
    } else {
        Arc::new(
            HttpPaymentGateway::new(
                config.gateway.base_url.clone(),
                Duration::from_millis(config.gateway.timeout_ms),
            )
            .context("Failed to build payment gateway client")?,
        )
    };

    let ledger = IdempotencyLedger::new(redis.clone(), policy.session_ttl);

    let app_state = AppState {
        reservations: Arc::new(ReservationService::new(
            store.clone(),
            redis.clone(),
            gateway,
            ledger.clone(),
            policy.clone(),
        )),
        callbacks: Arc::new(CallbackHandler::new(store.clone(), ledger, notifier)),
        settlement: Arc::new(SettlementService::new(store, policy)),
        redis: Some(redis),
        kafka: Some(kafka),
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
        metrics: Arc::new(Metrics::new().context("Failed to register metrics")?),
        resiliency: Arc::new(ResiliencyState::default()),
    };

    if config.scheduler_enabled() {
        let every = Duration::from_secs(config.scheduler.interval_seconds);
        tokio::spawn(worker::start_expiry_worker(app_state.clone(), every));
        tokio::spawn(worker::start_payout_worker(app_state.clone(), every));
    } else {
        tracing::info!("Settlement scheduler disabled in {} mode", config.run_mode);
    }

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.context("Failed to bind listener")?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}
