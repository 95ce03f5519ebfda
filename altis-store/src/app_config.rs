use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub kafka: KafkaConfig,
    #[serde(default)]
    pub business_rules: BusinessRules,
}

/// Booking rules. Defaults match the fixed booking policy: 15 minute holds,
/// 10 second payment budget, 3 attempts.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct BusinessRules {
    #[serde(default = "default_seat_hold_seconds")]
    pub seat_hold_seconds: u64,
    #[serde(default = "default_payment_timeout_seconds")]
    pub payment_timeout_seconds: u64,
    #[serde(default = "default_max_payment_attempts")]
    pub max_payment_attempts: u32,
    #[serde(default = "default_sweep_interval_seconds")]
    pub sweep_interval_seconds: u64,
    #[serde(default = "default_persist_retry_attempts")]
    pub persist_retry_attempts: u32,
    #[serde(default = "default_persist_retry_base_ms")]
    pub persist_retry_base_ms: u64,
}

fn default_seat_hold_seconds() -> u64 { 900 }
fn default_payment_timeout_seconds() -> u64 { 10 }
fn default_max_payment_attempts() -> u32 { 3 }
fn default_sweep_interval_seconds() -> u64 { 30 }
fn default_persist_retry_attempts() -> u32 { 3 }
fn default_persist_retry_base_ms() -> u64 { 100 }

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            seat_hold_seconds: default_seat_hold_seconds(),
            payment_timeout_seconds: default_payment_timeout_seconds(),
            max_payment_attempts: default_max_payment_attempts(),
            sweep_interval_seconds: default_sweep_interval_seconds(),
            persist_retry_attempts: default_persist_retry_attempts(),
            persist_retry_base_ms: default_persist_retry_base_ms(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    /// Unset means in-memory stores.
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 { 5 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct KafkaConfig {
    pub brokers: Option<String>,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_topic() -> String { "booking.events".to_string() }

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            topic: default_topic(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Per-environment overrides, optional
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Local overrides, never checked in
            .add_source(config::File::with_name("config/local").required(false))
            // Eg.. `ALTIS__BUSINESS_RULES__SEAT_HOLD_SECONDS=600`
            .add_source(config::Environment::with_prefix("ALTIS").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{File, FileFormat};

    fn parse(toml: &str) -> Config {
        config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults_apply_to_empty_config() {
        let config = parse("");
        assert_eq!(config.business_rules, BusinessRules::default());
        assert_eq!(config.business_rules.seat_hold_seconds, 900);
        assert!(config.database.url.is_none());
        assert_eq!(config.kafka.topic, "booking.events");
    }

    #[test]
    fn test_partial_override() {
        let config = parse(
            r#"
            [database]
            url = "postgres://localhost/altis"

            [business_rules]
            seat_hold_seconds = 600
            "#,
        );
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/altis"));
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.business_rules.seat_hold_seconds, 600);
        assert_eq!(config.business_rules.max_payment_attempts, 3);
    }
}
