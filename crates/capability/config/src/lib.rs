//! 应用运行配置加载。

use rust_decimal::Decimal;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;

/// 配置加载错误。
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env: {0}")]
    Missing(String),
    #[error("invalid value for {0}: {1}")]
    Invalid(String, String),
}

/// 应用运行配置。
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub http_addr: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_username: Option<String>,
    pub mqtt_password: Option<String>,
    pub mqtt_topic_prefix: String,
    pub ingest_enabled: bool,
    pub wal_dir: PathBuf,
    pub wal_segment_max_bytes: u64,
    pub file_store_dir: PathBuf,
    pub file_store_retention_days: u32,
    pub default_rate_id: Option<i64>,
    pub low_balance_threshold: Decimal,
    pub tx_timeout_ms: u64,
    pub recovery_on_startup: bool,
}

impl AppConfig {
    /// 从环境变量读取配置。
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = env::var("PREPAY_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("PREPAY_DATABASE_URL".to_string()))?;
        let http_addr =
            env::var("PREPAY_HTTP_ADDR").unwrap_or_else(|_| "127.0.0.1:8080".to_string());
        let mqtt_host = env::var("PREPAY_MQTT_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let mqtt_port = read_with_default("PREPAY_MQTT_PORT", 1883u16)?;
        let mqtt_username = read_optional("PREPAY_MQTT_USERNAME");
        let mqtt_password = read_optional("PREPAY_MQTT_PASSWORD");
        let mqtt_topic_prefix =
            env::var("PREPAY_MQTT_TOPIC_PREFIX").unwrap_or_else(|_| "prepay/meter".to_string());
        let ingest_enabled = read_bool_with_default("PREPAY_INGEST", false);
        let wal_dir = PathBuf::from(
            env::var("PREPAY_WAL_DIR").unwrap_or_else(|_| "data/wal".to_string()),
        );
        let wal_segment_max_bytes =
            read_with_default("PREPAY_WAL_SEGMENT_MAX_BYTES", 64 * 1024 * 1024u64)?;
        if wal_segment_max_bytes == 0 {
            return Err(ConfigError::Invalid(
                "PREPAY_WAL_SEGMENT_MAX_BYTES".to_string(),
                "0".to_string(),
            ));
        }
        let file_store_dir = PathBuf::from(
            env::var("PREPAY_FILE_STORE_DIR").unwrap_or_else(|_| "data/store".to_string()),
        );
        let file_store_retention_days =
            read_with_default("PREPAY_FILE_STORE_RETENTION_DAYS", 90u32)?;
        let default_rate_id = read_optional_parsed::<i64>("PREPAY_DEFAULT_RATE_ID")?;
        let low_balance_threshold =
            read_with_default("PREPAY_LOW_BALANCE_THRESHOLD", Decimal::TEN)?;
        let tx_timeout_ms = read_with_default("PREPAY_TX_TIMEOUT_MS", 10_000u64)?;
        let recovery_on_startup = read_bool_with_default("PREPAY_RECOVERY_ON_STARTUP", true);

        Ok(Self {
            database_url,
            http_addr,
            mqtt_host,
            mqtt_port,
            mqtt_username,
            mqtt_password,
            mqtt_topic_prefix,
            ingest_enabled,
            wal_dir,
            wal_segment_max_bytes,
            file_store_dir,
            file_store_retention_days,
            default_rate_id,
            low_balance_threshold,
            tx_timeout_ms,
            recovery_on_startup,
        })
    }
}

fn read_with_default<T: FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    let value = match env::var(key) {
        Ok(value) => value,
        Err(_) => return Ok(default),
    };
    value
        .trim()
        .parse::<T>()
        .map_err(|_| ConfigError::Invalid(key.to_string(), value))
}

fn read_optional(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) if !value.is_empty() => Some(value),
        _ => None,
    }
}

fn read_optional_parsed<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid(key.to_string(), value)),
        Err(_) => Ok(None),
    }
}

fn read_bool_with_default(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "on"),
        Err(_) => default,
    }
}
