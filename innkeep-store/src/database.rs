use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;
use serde_json::Value;

use crate::app_config::{BusinessRules, DatabaseConfig};

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

#[derive(sqlx::FromRow)]
struct RuleRow {
    rule_key: String,
    rule_value: Value,
}

impl DbClient {
    pub async fn new(config: &DatabaseConfig) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(3))
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&self.pool)
            .await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Overlay the `business_rules` table on top of the file configuration.
    pub async fn fetch_business_rules(&self, defaults: BusinessRules) -> Result<BusinessRules, sqlx::Error> {
        let rows: Vec<RuleRow> = sqlx::query_as("SELECT rule_key, rule_value FROM business_rules")
            .fetch_all(&self.pool)
            .await?;

        let mut rules = defaults;
        for row in rows {
            apply_rule(&mut rules, &row.rule_key, &row.rule_value);
        }
        Ok(rules)
    }
}

/// Expected value format: `{"value": <number/string>}`. Unknown keys are ignored.
fn apply_rule(rules: &mut BusinessRules, key: &str, value: &Value) {
    let Some(v) = value.get("value") else {
        return;
    };
    match key {
        "payment_session_seconds" => if let Some(u) = v.as_u64() { rules.payment_session_seconds = u; },
        "guest_surcharge" => if let Some(f) = v.as_f64() { rules.guest_surcharge = f; },
        "business_admin_surcharge" => if let Some(f) = v.as_f64() { rules.business_admin_surcharge = f; },
        "payout_percent" => {
            if let Some(u) = v.as_u64().and_then(|u| u32::try_from(u).ok()) {
                rules.payout_percent = u.min(100);
            }
        }
        "currency" => if let Some(s) = v.as_str() { rules.currency = s.to_string(); },
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn overlays_known_rules() {
        let mut rules = BusinessRules::default();
        apply_rule(&mut rules, "guest_surcharge", &json!({"value": 1.1}));
        apply_rule(&mut rules, "payout_percent", &json!({"value": 250}));
        apply_rule(&mut rules, "currency", &json!({"value": "USD"}));

        assert_eq!(rules.guest_surcharge, 1.1);
        assert_eq!(rules.payout_percent, 100);
        assert_eq!(rules.currency, "USD");
    }

    #[test]
    fn ignores_malformed_rules() {
        let mut rules = BusinessRules::default();
        apply_rule(&mut rules, "guest_surcharge", &json!(1.5));
        apply_rule(&mut rules, "payment_session_seconds", &json!({"value": "soon"}));
        apply_rule(&mut rules, "seat_hold_seconds", &json!({"value": 60}));

        assert_eq!(rules, BusinessRules::default());
    }
}
