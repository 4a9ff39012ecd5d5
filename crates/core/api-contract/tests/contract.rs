use api_contract::{
    FileStoreStatsDto, ReconcileReportDto, ReconcileRequest, RecoveryStatusDto,
    ResolveWalEntryRequest,
};
use chrono::NaiveDate;
use serde_json::Value;

#[test]
fn reconcile_request_accepts_camel_case() {
    let payload = r#"{"startDate":"2024-05-01","endDate":"2024-05-03"}"#;
    let req: ReconcileRequest = serde_json::from_str(payload).expect("parse");
    assert_eq!(req.start_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    assert_eq!(req.end_date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
}

#[test]
fn reconcile_request_accepts_snake_case() {
    let payload = r#"{"start_date":"2024-05-01","end_date":"2024-05-01"}"#;
    let req: ReconcileRequest = serde_json::from_str(payload).expect("parse");
    assert_eq!(req.start_date, req.end_date);
}

#[test]
fn reconcile_request_rejects_bad_dates() {
    let payload = r#"{"startDate":"2024-13-01","endDate":"2024-05-03"}"#;
    assert!(serde_json::from_str::<ReconcileRequest>(payload).is_err());
}

#[test]
fn recovery_status_is_camel_case() {
    let status = RecoveryStatusDto {
        wal_pending_count: 2,
        file_store_stats: FileStoreStatsDto {
            reading_files: 3,
            deduction_files: 1,
            total_bytes: 4096,
            oldest_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            newest_date: None,
        },
        database_connected: false,
    };
    let value = serde_json::to_value(status).expect("serialize");
    assert_eq!(value["walPendingCount"], Value::from(2));
    assert_eq!(value["databaseConnected"], Value::Bool(false));
    assert_eq!(value["fileStoreStats"]["oldestDate"], Value::from("2024-05-01"));
    assert!(value["fileStoreStats"]["newestDate"].is_null());
    assert!(value.get("wal_pending_count").is_none());
}

#[test]
fn reconcile_report_is_camel_case() {
    let report = ReconcileReportDto {
        read: 5,
        inserted: 2,
        already_present: 3,
        failed: 0,
    };
    let value = serde_json::to_value(report).expect("serialize");
    assert_eq!(value["alreadyPresent"], Value::from(3));
    assert!(value.get("already_present").is_none());
}

#[test]
fn resolve_request_note_is_optional() {
    let req: ResolveWalEntryRequest =
        serde_json::from_str(r#"{"status":"completed"}"#).expect("parse");
    assert_eq!(req.status, "completed");
    assert!(req.note.is_empty());
}
