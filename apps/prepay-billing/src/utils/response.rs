//! HTTP 响应辅助函数和 DTO 转换

use api_contract::{
    ApiResponse, FileStoreStatsDto, MetricsSnapshotDto, ReconcileReportDto, RecoveryStatusDto,
    WalEntryDto,
};
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use prepay_recovery::{ReconcileReport, RecoveryError, RecoveryStatus};
use prepay_telemetry::MetricsSnapshot;
use prepay_wal::WalEntry;

/// 错误请求响应
pub fn bad_request_error(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ApiResponse::<()>::error("INVALID.REQUEST", message.into())),
    )
        .into_response()
}

/// 恢复流程错误响应
pub fn recovery_error(err: RecoveryError) -> Response {
    let (status, code) = match &err {
        RecoveryError::EntryNotFound(_) => (StatusCode::NOT_FOUND, "WAL.ENTRY_NOT_FOUND"),
        RecoveryError::EntryNotPending(..) => (StatusCode::CONFLICT, "WAL.ENTRY_NOT_PENDING"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "RECOVERY.FAILED"),
    };
    (status, Json(ApiResponse::<()>::error(code, err.to_string()))).into_response()
}

pub fn recovery_status_to_dto(status: RecoveryStatus) -> RecoveryStatusDto {
    let stats = status.file_store_stats;
    RecoveryStatusDto {
        wal_pending_count: status.wal_pending_count,
        file_store_stats: FileStoreStatsDto {
            reading_files: stats.reading_files,
            deduction_files: stats.deduction_files,
            total_bytes: stats.total_bytes,
            oldest_date: stats.oldest_date,
            newest_date: stats.newest_date,
        },
        database_connected: status.database_connected,
    }
}

pub fn reconcile_report_to_dto(report: ReconcileReport) -> ReconcileReportDto {
    ReconcileReportDto {
        read: report.read,
        inserted: report.inserted,
        already_present: report.already_present,
        failed: report.failed,
    }
}

pub fn wal_entry_to_dto(entry: WalEntry) -> WalEntryDto {
    WalEntryDto {
        id: entry.id.to_string(),
        entry_type: entry.entry_type.as_str().to_string(),
        status: entry.status.as_str().to_string(),
        meter_id: entry.meter_id,
        error: entry.error,
    }
}

pub fn metrics_to_dto(snapshot: MetricsSnapshot) -> MetricsSnapshotDto {
    MetricsSnapshotDto {
        frames_received: snapshot.frames_received,
        decode_failures: snapshot.decode_failures,
        meters_not_found: snapshot.meters_not_found,
        readings_rejected: snapshot.readings_rejected,
        readings_persisted: snapshot.readings_persisted,
        first_readings: snapshot.first_readings,
        zero_consumptions: snapshot.zero_consumptions,
        consumptions_negative: snapshot.consumptions_negative,
        consumptions_unbilled: snapshot.consumptions_unbilled,
        deductions_success: snapshot.deductions_success,
        deductions_partial: snapshot.deductions_partial,
        deductions_failed: snapshot.deductions_failed,
        balance_alerts: snapshot.balance_alerts,
        wal_write_failures: snapshot.wal_write_failures,
        file_store_write_failures: snapshot.file_store_write_failures,
        transaction_failures: snapshot.transaction_failures,
        transaction_timeouts: snapshot.transaction_timeouts,
        transaction_latency_ms_total: snapshot.transaction_latency_ms_total,
        transaction_latency_ms_count: snapshot.transaction_latency_ms_count,
    }
}
