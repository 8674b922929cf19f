//! Service configuration loaded from the environment.

use crate::error::{BillingError, Result};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Which transport carries usage summaries to the billing service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryMode {
    Kafka,
    Http,
}

impl FromStr for DeliveryMode {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "kafka" => Ok(DeliveryMode::Kafka),
            "http" => Ok(DeliveryMode::Http),
            other => Err(BillingError::Config(format!(
                "unknown BILLING_DELIVERY_MODE '{}', expected 'kafka' or 'http'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClickHouseConfig {
    pub url: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub query_timeout_ms: u64,
}

impl ClickHouseConfig {
    pub fn from_env() -> Self {
        Self {
            url: env_or("CLICKHOUSE_URL", "http://clickhouse:8123"),
            database: env_or("CLICKHOUSE_DB", "periscope"),
            username: env_or("CLICKHOUSE_USER", "default"),
            password: env_or("CLICKHOUSE_PASSWORD", ""),
            query_timeout_ms: env_parse("CLICKHOUSE_QUERY_TIMEOUT_MS", 30_000),
        }
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    pub grpc_url: String,
    pub timeout_secs: u64,
    pub service_token: String,
}

impl DirectoryConfig {
    pub fn from_env() -> Self {
        Self {
            grpc_url: env_or("TENANT_DIRECTORY_GRPC_URL", "http://tenant-directory:19002"),
            timeout_secs: env_parse("TENANT_DIRECTORY_TIMEOUT_SECS", 10),
            service_token: env_or("SERVICE_TOKEN", ""),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Delivery transport settings. Only the fields of the selected mode are used.
#[derive(Clone)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub kafka_brokers: String,
    pub kafka_topic: String,
    pub kafka_timeout_ms: u64,
    pub ingest_url: String,
    pub ingest_timeout_secs: u64,
    pub service_token: String,
}

impl fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("mode", &self.mode)
            .field("kafka_brokers", &self.kafka_brokers)
            .field("kafka_topic", &self.kafka_topic)
            .field("kafka_timeout_ms", &self.kafka_timeout_ms)
            .field("ingest_url", &self.ingest_url)
            .field("ingest_timeout_secs", &self.ingest_timeout_secs)
            .field("service_token", &"[REDACTED]")
            .finish()
    }
}

impl DeliveryConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            mode: env_or("BILLING_DELIVERY_MODE", "kafka").parse()?,
            kafka_brokers: env_or("KAFKA_BROKERS", "localhost:9092"),
            kafka_topic: env_or("BILLING_KAFKA_TOPIC", "billing.usage_reports"),
            kafka_timeout_ms: env_parse("KAFKA_TIMEOUT_MS", 10_000),
            ingest_url: env_or("BILLING_INGEST_URL", "http://billing:18003/ingest-usage"),
            ingest_timeout_secs: env_parse("BILLING_INGEST_TIMEOUT_SECS", 30),
            service_token: env_or("SERVICE_TOKEN", ""),
        })
    }
}

/// Sweep tuning shared by the orchestrator and scheduler.
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    /// Trailing window used to enumerate active tenants.
    pub active_tenant_lookback_days: i64,
    /// Where a tenant's cursor starts on its first incremental run.
    pub cursor_default_lookback_hours: i64,
    /// Incremental windows shorter than this are skipped.
    pub min_incremental_window_secs: i64,
    pub incremental_interval_secs: u64,
    pub geo_top_n: u32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            active_tenant_lookback_days: 7,
            cursor_default_lookback_hours: 24,
            min_incremental_window_secs: 60,
            incremental_interval_secs: 300,
            geo_top_n: 20,
        }
    }
}

impl SummarizerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            active_tenant_lookback_days: env_parse(
                "BILLING_ACTIVE_TENANT_LOOKBACK_DAYS",
                defaults.active_tenant_lookback_days,
            ),
            cursor_default_lookback_hours: env_parse(
                "BILLING_CURSOR_DEFAULT_LOOKBACK_HOURS",
                defaults.cursor_default_lookback_hours,
            ),
            min_incremental_window_secs: defaults.min_incremental_window_secs,
            incremental_interval_secs: env_parse(
                "BILLING_INCREMENTAL_INTERVAL_SECS",
                defaults.incremental_interval_secs,
            )
            .max(60),
            geo_top_n: env_parse("BILLING_GEO_TOP_N", defaults.geo_top_n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub db_max_connections: u32,
    pub http_port: u16,
    pub clickhouse: ClickHouseConfig,
    pub directory: DirectoryConfig,
    pub delivery: DeliveryConfig,
    pub summarizer: SummarizerConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| BillingError::Config("DATABASE_URL must be set".to_string()))?;

        Ok(Self {
            database_url,
            db_max_connections: env_parse("DB_MAX_CONNECTIONS", 5),
            http_port: env_parse("PORT", 8080),
            clickhouse: ClickHouseConfig::from_env(),
            directory: DirectoryConfig::from_env(),
            delivery: DeliveryConfig::from_env()?,
            summarizer: SummarizerConfig::from_env(),
        })
    }
}
