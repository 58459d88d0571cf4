use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ReservationResult;

/// Result code the gateway sends for a settled charge.
pub const SUCCESS_CODE: &str = "00";

const PAY_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRequest {
    pub booking_id: Uuid,
    pub amount: i64,
    pub currency: String,
    pub return_url: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentSession {
    pub reference: String,
    pub redirect_url: String,
}

/// Asynchronous result delivered by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentCallback {
    pub reference: String,
    pub result_code: String,
    pub amount: i64,
    pub bank_code: Option<String>,
    /// `yyyyMMddHHmmss`, gateway local time treated as UTC.
    pub pay_date: Option<String>,
    pub bank_transaction_no: Option<String>,
}

impl PaymentCallback {
    pub fn is_success(&self) -> bool {
        self.result_code == SUCCESS_CODE
    }

    pub fn paid_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.pay_date.as_deref()?;
        NaiveDateTime::parse_from_str(raw, PAY_DATE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }
}

/// Black-box payment provider: signatures and wire format live behind this trait.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a payment session and return where to redirect the guest.
    /// Failures surface as `GatewayUnavailable`.
    async fn create_session(&self, request: &SessionRequest) -> ReservationResult<PaymentSession>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    fn callback(code: &str, pay_date: Option<&str>) -> PaymentCallback {
        PaymentCallback {
            reference: "ref-1".to_string(),
            result_code: code.to_string(),
            amount: 270,
            bank_code: Some("NCB".to_string()),
            pay_date: pay_date.map(str::to_string),
            bank_transaction_no: Some("VNP1234".to_string()),
        }
    }

    #[test]
    fn only_00_is_success() {
        assert!(callback("00", None).is_success());
        assert!(!callback("24", None).is_success());
        assert!(!callback("", None).is_success());
    }

    #[test]
    fn parses_gateway_pay_date() {
        let paid = callback("00", Some("20241225143005")).paid_at().unwrap();
        assert_eq!(paid.year(), 2024);
        assert_eq!(paid.month(), 12);
        assert_eq!(paid.hour(), 14);
        assert_eq!(paid.second(), 5);

        assert!(callback("00", Some("not-a-date")).paid_at().is_none());
        assert!(callback("00", None).paid_at().is_none());
    }
}
