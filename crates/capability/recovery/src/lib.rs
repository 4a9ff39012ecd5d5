//! # 启动恢复与对账
//!
//! - `recover_wal`：扫描 WAL 中仍为 pending 的条目，读数已落库的补标 completed，
//!   其余读数与全部扣费条目转人工处理（扣费永不自动重放）
//! - `reconcile_deductions`：数据库故障恢复后，把文件库中数据库缺失的扣费快照原样补录
//! - `resolve_wal_entry`：运维核对后人工终结一个 pending 条目
//! - `status`：运维健康快照（WAL 待处理数、文件库统计、数据库连通性）

mod error;
mod service;

pub use error::RecoveryError;
pub use service::{
    ReconcileReport, RecoveryService, RecoveryStatus, WalRecoveryReport, WalResolution,
};
