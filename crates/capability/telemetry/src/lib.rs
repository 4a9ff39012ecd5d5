//! 追踪初始化、请求 ID 生成与计费指标。
//!
//! 指标为进程级原子计数器，只增不减；HTTP 层通过 [`metrics`] 读取快照。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

/// 请求级追踪标识。
#[derive(Debug, Clone)]
pub struct RequestIds {
    pub request_id: String,
    pub trace_id: String,
}

/// 计费指标快照。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub decode_failures: u64,
    pub meters_not_found: u64,
    pub readings_rejected: u64,
    pub readings_persisted: u64,
    pub first_readings: u64,
    pub zero_consumptions: u64,
    pub consumptions_negative: u64,
    pub consumptions_unbilled: u64,
    pub deductions_success: u64,
    pub deductions_partial: u64,
    pub deductions_failed: u64,
    pub balance_alerts: u64,
    pub wal_write_failures: u64,
    pub file_store_write_failures: u64,
    pub transaction_failures: u64,
    pub transaction_timeouts: u64,
    pub transaction_latency_ms_total: u64,
    pub transaction_latency_ms_count: u64,
}

/// 计费指标。
pub struct TelemetryMetrics {
    frames_received: AtomicU64,
    decode_failures: AtomicU64,
    meters_not_found: AtomicU64,
    readings_rejected: AtomicU64,
    readings_persisted: AtomicU64,
    first_readings: AtomicU64,
    zero_consumptions: AtomicU64,
    consumptions_negative: AtomicU64,
    consumptions_unbilled: AtomicU64,
    deductions_success: AtomicU64,
    deductions_partial: AtomicU64,
    deductions_failed: AtomicU64,
    balance_alerts: AtomicU64,
    wal_write_failures: AtomicU64,
    file_store_write_failures: AtomicU64,
    transaction_failures: AtomicU64,
    transaction_timeouts: AtomicU64,
    transaction_latency_ms_total: AtomicU64,
    transaction_latency_ms_count: AtomicU64,
}

impl Default for TelemetryMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryMetrics {
    pub fn new() -> Self {
        Self {
            frames_received: AtomicU64::new(0),
            decode_failures: AtomicU64::new(0),
            meters_not_found: AtomicU64::new(0),
            readings_rejected: AtomicU64::new(0),
            readings_persisted: AtomicU64::new(0),
            first_readings: AtomicU64::new(0),
            zero_consumptions: AtomicU64::new(0),
            consumptions_negative: AtomicU64::new(0),
            consumptions_unbilled: AtomicU64::new(0),
            deductions_success: AtomicU64::new(0),
            deductions_partial: AtomicU64::new(0),
            deductions_failed: AtomicU64::new(0),
            balance_alerts: AtomicU64::new(0),
            wal_write_failures: AtomicU64::new(0),
            file_store_write_failures: AtomicU64::new(0),
            transaction_failures: AtomicU64::new(0),
            transaction_timeouts: AtomicU64::new(0),
            transaction_latency_ms_total: AtomicU64::new(0),
            transaction_latency_ms_count: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            meters_not_found: self.meters_not_found.load(Ordering::Relaxed),
            readings_rejected: self.readings_rejected.load(Ordering::Relaxed),
            readings_persisted: self.readings_persisted.load(Ordering::Relaxed),
            first_readings: self.first_readings.load(Ordering::Relaxed),
            zero_consumptions: self.zero_consumptions.load(Ordering::Relaxed),
            consumptions_negative: self.consumptions_negative.load(Ordering::Relaxed),
            consumptions_unbilled: self.consumptions_unbilled.load(Ordering::Relaxed),
            deductions_success: self.deductions_success.load(Ordering::Relaxed),
            deductions_partial: self.deductions_partial.load(Ordering::Relaxed),
            deductions_failed: self.deductions_failed.load(Ordering::Relaxed),
            balance_alerts: self.balance_alerts.load(Ordering::Relaxed),
            wal_write_failures: self.wal_write_failures.load(Ordering::Relaxed),
            file_store_write_failures: self.file_store_write_failures.load(Ordering::Relaxed),
            transaction_failures: self.transaction_failures.load(Ordering::Relaxed),
            transaction_timeouts: self.transaction_timeouts.load(Ordering::Relaxed),
            transaction_latency_ms_total: self
                .transaction_latency_ms_total
                .load(Ordering::Relaxed),
            transaction_latency_ms_count: self
                .transaction_latency_ms_count
                .load(Ordering::Relaxed),
        }
    }
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局指标实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的 request_id 与 trace_id。
pub fn new_request_ids() -> RequestIds {
    RequestIds {
        request_id: uuid::Uuid::new_v4().to_string(),
        trace_id: uuid::Uuid::new_v4().to_string(),
    }
}

/// 记录收到的帧。
pub fn record_frame_received() {
    metrics().frames_received.fetch_add(1, Ordering::Relaxed);
}

/// 记录解码失败。
pub fn record_decode_failure() {
    metrics().decode_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录通信地址无法匹配电表。
pub fn record_meter_not_found() {
    metrics().meters_not_found.fetch_add(1, Ordering::Relaxed);
}

/// 记录读数不高于当前读数而被拒绝。
pub fn record_reading_rejected() {
    metrics().readings_rejected.fetch_add(1, Ordering::Relaxed);
}

/// 记录读数落库（事务已提交）。
pub fn record_reading_persisted() {
    metrics().readings_persisted.fetch_add(1, Ordering::Relaxed);
}

pub fn record_first_reading() {
    metrics().first_readings.fetch_add(1, Ordering::Relaxed);
}

pub fn record_zero_consumption() {
    metrics().zero_consumptions.fetch_add(1, Ordering::Relaxed);
}

pub fn record_consumption_negative() {
    metrics()
        .consumptions_negative
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录未计费的用电量（无费率或无账户）。
pub fn record_consumption_unbilled() {
    metrics()
        .consumptions_unbilled
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_deduction_success() {
    metrics().deductions_success.fetch_add(1, Ordering::Relaxed);
}

pub fn record_deduction_partial() {
    metrics().deductions_partial.fetch_add(1, Ordering::Relaxed);
}

pub fn record_deduction_failed() {
    metrics().deductions_failed.fetch_add(1, Ordering::Relaxed);
}

pub fn record_balance_alert() {
    metrics().balance_alerts.fetch_add(1, Ordering::Relaxed);
}

/// 记录 WAL 写入失败（不阻断计费）。
pub fn record_wal_write_failure() {
    metrics().wal_write_failures.fetch_add(1, Ordering::Relaxed);
}

/// 记录文件备份失败（不阻断计费）。
pub fn record_file_store_write_failure() {
    metrics()
        .file_store_write_failures
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录事务中止（回滚）。
pub fn record_transaction_failure() {
    metrics()
        .transaction_failures
        .fetch_add(1, Ordering::Relaxed);
}

pub fn record_transaction_timeout() {
    metrics()
        .transaction_timeouts
        .fetch_add(1, Ordering::Relaxed);
}

/// 记录事务耗时（毫秒）。
pub fn record_transaction_latency_ms(latency_ms: u64) {
    let metrics = metrics();
    metrics
        .transaction_latency_ms_total
        .fetch_add(latency_ms, Ordering::Relaxed);
    metrics
        .transaction_latency_ms_count
        .fetch_add(1, Ordering::Relaxed);
}
