//! 恢复状态与文件库对账。
//!
//! - GET /api/recovery/status
//! - POST /api/recovery/reconcile
//! - POST /api/recovery/wal/:id/resolve

use crate::AppState;
use crate::utils::response::{
    bad_request_error, reconcile_report_to_dto, recovery_error, recovery_status_to_dto,
    wal_entry_to_dto,
};
use api_contract::{ApiResponse, ReconcileRequest, ResolveWalEntryRequest};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use prepay_recovery::WalResolution;
use uuid::Uuid;

pub async fn get_recovery_status(State(state): State<AppState>) -> Response {
    match state.recovery.status().await {
        Ok(status) => (
            StatusCode::OK,
            Json(ApiResponse::success(recovery_status_to_dto(status))),
        )
            .into_response(),
        Err(err) => recovery_error(err),
    }
}

pub async fn reconcile_deductions(
    State(state): State<AppState>,
    Json(req): Json<ReconcileRequest>,
) -> Response {
    if req.start_date > req.end_date {
        return bad_request_error("startDate must not be after endDate");
    }
    match state
        .recovery
        .reconcile_deductions(req.start_date, req.end_date)
        .await
    {
        Ok(report) => (
            StatusCode::OK,
            Json(ApiResponse::success(reconcile_report_to_dto(report))),
        )
            .into_response(),
        Err(err) => recovery_error(err),
    }
}

pub async fn resolve_wal_entry(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ResolveWalEntryRequest>,
) -> Response {
    let Ok(id) = Uuid::parse_str(&id) else {
        return bad_request_error("invalid wal entry id");
    };
    let resolution = match req.status.as_str() {
        "completed" => WalResolution::Completed,
        "failed" => WalResolution::Failed,
        _ => return bad_request_error("status must be completed or failed"),
    };
    match state
        .recovery
        .resolve_wal_entry(id, resolution, req.note)
        .await
    {
        Ok(entry) => (
            StatusCode::OK,
            Json(ApiResponse::success(wal_entry_to_dto(entry))),
        )
            .into_response(),
        Err(err) => recovery_error(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::NaiveDate;
    use prepay_filestore::FileStore;
    use prepay_recovery::RecoveryService;
    use prepay_storage::InMemoryBillingStore;
    use prepay_wal::{WalConfig, WriteAheadLog};
    use serde_json::Value;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn state(dir: &TempDir, store: InMemoryBillingStore) -> AppState {
        state_with_wal(dir, store).0
    }

    fn state_with_wal(dir: &TempDir, store: InMemoryBillingStore) -> (AppState, Arc<WriteAheadLog>) {
        let wal = Arc::new(WriteAheadLog::open(WalConfig::new(dir.path().join("wal"))).expect("wal"));
        let files = Arc::new(FileStore::open(dir.path().join("store")).expect("store"));
        let state = AppState {
            recovery: Arc::new(RecoveryService::new(Arc::new(store), wal.clone(), files)),
        };
        (state, wal)
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json")
    }

    #[tokio::test]
    async fn status_reports_database_state() {
        let dir = TempDir::new().expect("tempdir");
        let store = InMemoryBillingStore::new();
        store.set_available(false);
        let response = get_recovery_status(State(state(&dir, store))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["success"], Value::Bool(true));
        assert_eq!(body["data"]["databaseConnected"], Value::Bool(false));
        assert_eq!(body["data"]["walPendingCount"], Value::from(0));
    }

    #[tokio::test]
    async fn inverted_range_is_bad_request() {
        let dir = TempDir::new().expect("tempdir");
        let req = ReconcileRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 3).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
        };
        let response =
            reconcile_deductions(State(state(&dir, InMemoryBillingStore::new())), Json(req)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], Value::from("INVALID.REQUEST"));
    }

    #[tokio::test]
    async fn empty_range_reconciles_nothing() {
        let dir = TempDir::new().expect("tempdir");
        let req = ReconcileRequest {
            start_date: NaiveDate::from_ymd_opt(2024, 5, 1).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2024, 5, 2).expect("date"),
        };
        let response =
            reconcile_deductions(State(state(&dir, InMemoryBillingStore::new())), Json(req)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["read"], Value::from(0));
        assert_eq!(body["data"]["alreadyPresent"], Value::from(0));
    }

    #[tokio::test]
    async fn resolve_closes_pending_entry_once() {
        let dir = TempDir::new().expect("tempdir");
        let (state, wal) = state_with_wal(&dir, InMemoryBillingStore::new());
        let entry = wal
            .write_deduction(1, rust_decimal::Decimal::ONE, rust_decimal::Decimal::ONE)
            .expect("write");

        let req = || ResolveWalEntryRequest {
            status: "failed".to_string(),
            note: "not applied".to_string(),
        };
        let response = resolve_wal_entry(
            State(state.clone()),
            Path(entry.id.to_string()),
            Json(req()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["status"], Value::from("failed"));
        assert_eq!(body["data"]["entryType"], Value::from("deduction"));
        assert!(wal.pending_entries().expect("pending").is_empty());

        let response =
            resolve_wal_entry(State(state), Path(entry.id.to_string()), Json(req())).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn resolve_rejects_bad_input() {
        let dir = TempDir::new().expect("tempdir");
        let state = state(&dir, InMemoryBillingStore::new());

        let bad_id = resolve_wal_entry(
            State(state.clone()),
            Path("not-a-uuid".to_string()),
            Json(ResolveWalEntryRequest {
                status: "failed".to_string(),
                note: String::new(),
            }),
        )
        .await;
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);

        let bad_status = resolve_wal_entry(
            State(state.clone()),
            Path(Uuid::now_v7().to_string()),
            Json(ResolveWalEntryRequest {
                status: "pending".to_string(),
                note: String::new(),
            }),
        )
        .await;
        assert_eq!(bad_status.status(), StatusCode::BAD_REQUEST);

        let unknown = resolve_wal_entry(
            State(state),
            Path(Uuid::now_v7().to_string()),
            Json(ResolveWalEntryRequest {
                status: "completed".to_string(),
                note: String::new(),
            }),
        )
        .await;
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);
    }
}
