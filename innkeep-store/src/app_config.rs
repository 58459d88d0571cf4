use innkeep_core::pricing::SurchargePolicy;
use serde::Deserialize;
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Filled from `RUN_MODE`, not from files.
    #[serde(default)]
    pub run_mode: String,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub kafka: KafkaConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BusinessRules {
    /// How long a payment session stays open. Marker TTL and expiry cutoff both use it.
    pub payment_session_seconds: u64,
    pub guest_surcharge: f64,
    pub business_admin_surcharge: f64,
    /// Owner share of the charge paid out at check-in.
    pub payout_percent: u32,
    pub currency: String,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            payment_session_seconds: 900,
            guest_surcharge: 1.08,
            business_admin_surcharge: 1.04,
            payout_percent: 90,
            currency: "VND".to_string(),
        }
    }
}

impl BusinessRules {
    pub fn payment_session_ttl(&self) -> Duration {
        Duration::from_secs(self.payment_session_seconds)
    }

    pub fn surcharge_policy(&self) -> SurchargePolicy {
        SurchargePolicy {
            guest_multiplier: self.guest_surcharge,
            business_admin_multiplier: self.business_admin_surcharge,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SchedulerConfig {
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    /// Overrides the `RUN_MODE` gate when set.
    pub enabled: Option<bool>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval(),
            enabled: None,
        }
    }
}

fn default_interval() -> u64 { 15 }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Upper bound on waiting for a room row lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

fn default_max_connections() -> u32 { 5 }

fn default_lock_timeout_ms() -> u64 { 5000 }

#[derive(Debug, Deserialize, Clone)]
pub struct RedisConfig {
    pub url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct GatewayConfig {
    /// Empty selects the in-process mock gateway.
    #[serde(default)]
    pub base_url: String,
    pub return_url: String,
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_gateway_timeout_ms() -> u64 { 3000 }

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides are optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. `INNKEEP_DATABASE__URL=postgres://...`
            .add_source(config::Environment::with_prefix("INNKEEP").separator("__"))
            .build()?;

        let mut config: Config = s.try_deserialize()?;
        config.run_mode = run_mode;
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.run_mode == "production"
    }

    /// The settlement sweeps only run in production unless explicitly switched.
    pub fn scheduler_enabled(&self) -> bool {
        self.scheduler.enabled.unwrap_or_else(|| self.is_production())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(run_mode: &str, enabled: Option<bool>) -> Config {
        Config {
            run_mode: run_mode.to_string(),
            server: ServerConfig { port: 8080 },
            database: DatabaseConfig {
                url: "postgres://localhost/innkeep".to_string(),
                max_connections: 5,
                lock_timeout_ms: 5000,
            },
            redis: RedisConfig { url: "redis://localhost".to_string() },
            kafka: KafkaConfig { brokers: "localhost:9092".to_string() },
            auth: AuthConfig { jwt_secret: "secret".to_string() },
            gateway: GatewayConfig {
                base_url: String::new(),
                return_url: "https://innkeep.test/payments/return".to_string(),
                timeout_ms: 3000,
            },
            business_rules: BusinessRules::default(),
            scheduler: SchedulerConfig { interval_seconds: 15, enabled },
        }
    }

    #[test]
    fn scheduler_follows_run_mode() {
        assert!(config("production", None).scheduler_enabled());
        assert!(!config("development", None).scheduler_enabled());
        assert!(config("development", Some(true)).scheduler_enabled());
        assert!(!config("production", Some(false)).scheduler_enabled());
    }

    #[test]
    fn default_rules_use_fifteen_minute_sessions() {
        let rules = BusinessRules::default();
        assert_eq!(rules.payment_session_ttl(), Duration::from_secs(15 * 60));
        assert_eq!(rules.surcharge_policy(), SurchargePolicy::default());
    }
}
