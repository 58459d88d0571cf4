use async_trait::async_trait;
use innkeep_core::payment::{PaymentGateway, PaymentSession, SessionRequest};
use innkeep_core::{ReservationError, ReservationResult};
use reqwest::Client;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// JSON client for a hosted payment page provider.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
}

impl HttpPaymentGateway {
    pub fn new(base_url: String, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn create_session(&self, request: &SessionRequest) -> ReservationResult<PaymentSession> {
        let url = format!("{}/sessions", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| ReservationError::GatewayUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(booking_id = %request.booking_id, %status, "Gateway refused session");
            return Err(ReservationError::GatewayUnavailable(format!("gateway returned {}", status)));
        }

        let session: PaymentSession = response
            .json()
            .await
            .map_err(|e| ReservationError::GatewayUnavailable(format!("invalid gateway response: {}", e)))?;

        info!(booking_id = %request.booking_id, reference = %session.reference, "Payment session opened");
        Ok(session)
    }
}

/// In-process gateway for local runs and tests.
///
/// References are `mock_{booking id}` so a test can build the matching callback.
#[derive(Default)]
pub struct MockPaymentGateway {
    failing: AtomicBool,
}

impl MockPaymentGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reference_for(booking_id: uuid::Uuid) -> String {
        format!("mock_{}", booking_id.simple())
    }

    /// Toggle simulated outages.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn create_session(&self, request: &SessionRequest) -> ReservationResult<PaymentSession> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ReservationError::GatewayUnavailable("simulated gateway outage".to_string()));
        }

        let reference = Self::reference_for(request.booking_id);
        Ok(PaymentSession {
            redirect_url: format!("{}?ref={}", request.return_url, reference),
            reference,
        })
    }
}
