use prepay_config::{AppConfig, ConfigError};
use rust_decimal::Decimal;
use std::path::PathBuf;

#[test]
fn defaults_apply_and_database_url_is_required() {
    unsafe {
        std::env::remove_var("PREPAY_DATABASE_URL");
    }
    let err = AppConfig::from_env().expect_err("missing dsn");
    assert!(matches!(err, ConfigError::Missing(key) if key == "PREPAY_DATABASE_URL"));

    unsafe {
        std::env::set_var("PREPAY_DATABASE_URL", "postgres://prepay@localhost/prepay");
    }
    let config = AppConfig::from_env().expect("config");
    assert_eq!(config.http_addr, "127.0.0.1:8080");
    assert_eq!(config.mqtt_host, "127.0.0.1");
    assert_eq!(config.mqtt_port, 1883);
    assert_eq!(config.mqtt_topic_prefix, "prepay/meter");
    assert!(!config.ingest_enabled);
    assert_eq!(config.wal_dir, PathBuf::from("data/wal"));
    assert_eq!(config.wal_segment_max_bytes, 67_108_864);
    assert_eq!(config.file_store_dir, PathBuf::from("data/store"));
    assert_eq!(config.file_store_retention_days, 90);
    assert_eq!(config.default_rate_id, None);
    assert_eq!(config.low_balance_threshold, Decimal::TEN);
    assert_eq!(config.tx_timeout_ms, 10_000);
    assert!(config.recovery_on_startup);
}
