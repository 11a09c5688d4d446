//! Application configuration
//!
//! Everything is read from environment variables, with defaults suited to a
//! local run: in-memory store, log-only publisher, metrics on :9090.

use std::str::FromStr;
use std::time::Duration;

use crate::outbox::OutboxProcessorConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration: {var}")]
    Missing { var: &'static str },

    #[error("Invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaConfig {
    pub enabled: bool,
    pub brokers: String,
    pub topic_prefix: String,
    pub topic_environment: String,
    /// Broker acknowledgement deadline, enforced inside the publisher's
    /// circuit breaker. Always shorter than the processor's publish timeout.
    pub delivery_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub store_backend: StoreBackend,
    /// Present whenever `store_backend` is Postgres.
    pub database: Option<DatabaseConfig>,
    pub outbox: OutboxProcessorConfig,
    pub kafka: KafkaConfig,
    pub metrics_port: u16,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let store_backend = match lookup("STORE_BACKEND").as_deref().map(str::trim) {
            None | Some("") | Some("memory") => StoreBackend::Memory,
            Some("postgres") => StoreBackend::Postgres,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let database = match (store_backend, lookup("DATABASE_URL")) {
            (StoreBackend::Postgres, None) => {
                return Err(ConfigError::Missing { var: "DATABASE_URL" })
            }
            (_, Some(url)) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10)?,
            }),
            (StoreBackend::Memory, None) => None,
        };

        let batch_size: usize = parse_or(&lookup, "OUTBOX_BATCH_SIZE", 10)?;
        if batch_size == 0 {
            return Err(ConfigError::Invalid {
                var: "OUTBOX_BATCH_SIZE",
                value: "0".to_string(),
            });
        }
        let outbox = OutboxProcessorConfig {
            batch_size,
            poll_interval: Duration::from_millis(parse_or(&lookup, "OUTBOX_POLL_MS", 1000)?),
            publish_timeout: Duration::from_millis(parse_or(
                &lookup,
                "OUTBOX_PUBLISH_TIMEOUT_MS",
                5000,
            )?),
        };

        let kafka = KafkaConfig {
            enabled: parse_or(&lookup, "KAFKA_ENABLED", false)?,
            brokers: lookup("KAFKA_BROKERS").unwrap_or_else(|| "127.0.0.1:9092".to_string()),
            topic_prefix: lookup("KAFKA_TOPIC_PREFIX").unwrap_or_else(|| "orders".to_string()),
            topic_environment: lookup("KAFKA_TOPIC_ENVIRONMENT")
                .unwrap_or_else(|| "dev".to_string()),
            delivery_timeout: Duration::from_millis(parse_or(
                &lookup,
                "KAFKA_DELIVERY_TIMEOUT_MS",
                4000,
            )?),
        };
        if kafka.delivery_timeout.is_zero() || kafka.delivery_timeout >= outbox.publish_timeout {
            return Err(ConfigError::Invalid {
                var: "KAFKA_DELIVERY_TIMEOUT_MS",
                value: format!(
                    "{} (must be positive and below OUTBOX_PUBLISH_TIMEOUT_MS={})",
                    kafka.delivery_timeout.as_millis(),
                    outbox.publish_timeout.as_millis()
                ),
            });
        }

        Ok(Self {
            store_backend,
            database,
            outbox,
            kafka,
            metrics_port: parse_or(&lookup, "METRICS_PORT", 9090)?,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid { var, value: raw }),
    }
}
