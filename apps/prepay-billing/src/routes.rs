//! 路由定义
//!
//! - 健康检查：/health
//! - 恢复状态：/api/recovery/status
//! - 文件库对账：/api/recovery/reconcile
//! - WAL 条目人工终结：/api/recovery/wal/:id/resolve
//! - 计费指标：/api/metrics

use super::AppState;
use super::handlers::*;
use axum::{
    Router,
    routing::{get, post},
};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/recovery/status", get(get_recovery_status))
        .route("/api/recovery/reconcile", post(reconcile_deductions))
        .route("/api/recovery/wal/:id/resolve", post(resolve_wal_entry))
        .route("/api/metrics", get(get_metrics))
        .with_state(state)
}
