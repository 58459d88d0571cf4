use innkeep_core::pricing::SurchargePolicy;
use std::time::Duration;

/// Tunables the booking services run with. Built from the business rules at start-up.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    /// Payment session validity. Ledger TTL and the expiry cutoff both read this.
    pub session_ttl: Duration,
    pub surcharge: SurchargePolicy,
    pub payout_percent: u32,
    pub currency: String,
    pub return_url: String,
    pub gateway_timeout: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            session_ttl: Duration::from_secs(15 * 60),
            surcharge: SurchargePolicy::default(),
            payout_percent: 90,
            currency: "VND".to_string(),
            return_url: "http://localhost:3000/payments/return".to_string(),
            gateway_timeout: Duration::from_secs(3),
        }
    }
}

impl BookingPolicy {
    pub fn session_window(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.session_ttl).unwrap_or_else(|_| chrono::Duration::minutes(15))
    }
}
