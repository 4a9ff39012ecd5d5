//! 稳定的 DTO 与 API 响应契约。

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// 标准 API 响应封装。
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<ApiError>,
}

/// 失败响应的错误体。
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub code: String,
    pub message: String,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.into(),
                message: message.into(),
            }),
        }
    }
}

/// 健康检查返回结构。
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub ok: bool,
}

/// 文件库统计。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStoreStatsDto {
    pub reading_files: usize,
    pub deduction_files: usize,
    pub total_bytes: u64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

/// 恢复状态返回结构。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStatusDto {
    pub wal_pending_count: usize,
    pub file_store_stats: FileStoreStatsDto,
    pub database_connected: bool,
}

/// 文件库对账请求体（ISO 日期，闭区间）。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileRequest {
    #[serde(alias = "start_date")]
    pub start_date: NaiveDate,
    #[serde(alias = "end_date")]
    pub end_date: NaiveDate,
}

/// 人工终结 WAL 条目的请求体。
///
/// `status` 取 `completed`（核对后确认已生效）或 `failed`（确认未生效或作废）。
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveWalEntryRequest {
    pub status: String,
    #[serde(default)]
    pub note: String,
}

/// WAL 条目视图。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntryDto {
    pub id: String,
    pub entry_type: String,
    pub status: String,
    pub meter_id: i64,
    pub error: Option<String>,
}

/// 对账结果。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReportDto {
    pub read: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// 计费指标快照。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshotDto {
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
