use crate::error::RecoveryError;
use chrono::NaiveDate;
use prepay_filestore::{FileDeductionRecord, FileStore, FileStoreStats};
use prepay_storage::{BillingStore, DeductionRecord};
use prepay_wal::{WalEntry, WalEntryType, WalStatus, WriteAheadLog};
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// WAL 恢复结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalRecoveryReport {
    /// 扫描到的 pending 条目数
    pub scanned: usize,
    /// 读数已落库、补标 completed 的条目数
    pub completed: usize,
    /// 需人工核对的读数条目
    pub manual_readings: usize,
    /// 需人工核对的扣费条目
    pub manual_deductions: usize,
}

/// 文件库对账结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub read: usize,
    pub inserted: usize,
    pub already_present: usize,
    pub failed: usize,
}

/// 人工核对后的处理结论
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalResolution {
    /// 数据库中已确认生效
    Completed,
    /// 确认未生效或作废
    Failed,
}

/// 运维健康快照
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryStatus {
    pub wal_pending_count: usize,
    pub file_store_stats: FileStoreStats,
    pub database_connected: bool,
}

/// 恢复服务
///
/// 只读取 WAL 与文件库并向关系库做幂等检查；从不重放扣费。
pub struct RecoveryService {
    store: Arc<dyn BillingStore>,
    wal: Arc<WriteAheadLog>,
    file_store: Arc<FileStore>,
}

impl RecoveryService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        wal: Arc<WriteAheadLog>,
        file_store: Arc<FileStore>,
    ) -> Self {
        Self {
            store,
            wal,
            file_store,
        }
    }

    /// 处理所有 pending 条目
    ///
    /// 读数条目按 `(meter_id, value, timestamp)` 检查是否已落库：已落库说明事务提交后
    /// 终态标记丢失，补标 completed；未落库的只记录日志，不盲目重放（缺少费率、账户上下文）。
    pub async fn recover_wal(&self) -> Result<WalRecoveryReport, RecoveryError> {
        let wal = self.wal.clone();
        let pending = tokio::task::spawn_blocking(move || wal.pending_entries()).await??;

        let mut report = WalRecoveryReport {
            scanned: pending.len(),
            ..WalRecoveryReport::default()
        };
        for entry in &pending {
            match entry.entry_type {
                WalEntryType::Reading => {
                    if self.reading_persisted(entry).await? {
                        self.mark_completed(entry).await?;
                        report.completed += 1;
                    } else {
                        report.manual_readings += 1;
                        warn!(
                            target: "prepay.recovery",
                            wal_id = %entry.id,
                            meter_id = entry.meter_id,
                            payload = %entry.payload,
                            "wal_reading_needs_manual_review"
                        );
                    }
                }
                WalEntryType::Deduction => {
                    report.manual_deductions += 1;
                    warn!(
                        target: "prepay.recovery",
                        wal_id = %entry.id,
                        meter_id = entry.meter_id,
                        payload = %entry.payload,
                        "wal_deduction_needs_manual_review"
                    );
                }
            }
        }

        info!(
            target: "prepay.recovery",
            scanned = report.scanned,
            completed = report.completed,
            manual_readings = report.manual_readings,
            manual_deductions = report.manual_deductions,
            "wal_recovery_finished"
        );
        Ok(report)
    }

    /// 人工处理一个 pending 条目，追加对应的终态标记
    ///
    /// 恢复流程不自动终结的条目（未落库的读数、全部扣费）由运维核对后经此关闭。
    pub async fn resolve_wal_entry(
        &self,
        id: Uuid,
        resolution: WalResolution,
        note: String,
    ) -> Result<WalEntry, RecoveryError> {
        let wal = self.wal.clone();
        let logged_note = note.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            let entry = find_entry(&wal, id)?;
            if entry.status != WalStatus::Pending {
                return Err(RecoveryError::EntryNotPending(id, entry.status.as_str()));
            }
            match resolution {
                WalResolution::Completed => wal.mark_completed(id)?,
                WalResolution::Failed => wal.mark_failed(id, format!("manually resolved: {note}"))?,
            }
            find_entry(&wal, id)
        })
        .await??;

        info!(
            target: "prepay.recovery",
            wal_id = %resolved.id,
            meter_id = resolved.meter_id,
            entry_type = resolved.entry_type.as_str(),
            status = resolved.status.as_str(),
            note = %logged_note,
            "wal_entry_resolved"
        );
        Ok(resolved)
    }

    async fn reading_persisted(&self, entry: &WalEntry) -> Result<bool, RecoveryError> {
        let Some(payload) = entry.reading_payload() else {
            warn!(
                target: "prepay.recovery",
                wal_id = %entry.id,
                "wal_reading_payload_invalid"
            );
            return Ok(false);
        };
        let exists = self
            .store
            .reading_exists(entry.meter_id, payload.value, payload.timestamp)
            .await?;
        Ok(exists)
    }

    async fn mark_completed(&self, entry: &WalEntry) -> Result<(), RecoveryError> {
        let wal = self.wal.clone();
        let id = entry.id;
        tokio::task::spawn_blocking(move || wal.mark_completed(id)).await??;
        info!(
            target: "prepay.recovery",
            wal_id = %id,
            meter_id = entry.meter_id,
            "wal_entry_recovered"
        );
        Ok(())
    }

    /// 把文件库中数据库缺失的扣费快照补录入库
    ///
    /// 以文件库为数据库故障期间的最后可信状态，余额字段原样写入，不重新计算。
    /// 单条失败只计数并继续。
    pub async fn reconcile_deductions(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ReconcileReport, RecoveryError> {
        let file_store = self.file_store.clone();
        let records =
            tokio::task::spawn_blocking(move || file_store.read_deductions(start, end)).await??;

        let mut report = ReconcileReport {
            read: records.len(),
            ..ReconcileReport::default()
        };
        for record in &records {
            match self.reconcile_one(record).await {
                Ok(true) => report.inserted += 1,
                Ok(false) => report.already_present += 1,
                Err(err) => {
                    report.failed += 1;
                    error!(
                        target: "prepay.recovery",
                        deduction_no = %record.deduction_no,
                        error = %err,
                        "deduction_reconcile_failed"
                    );
                }
            }
        }

        info!(
            target: "prepay.recovery",
            start = %start,
            end = %end,
            read = report.read,
            inserted = report.inserted,
            already_present = report.already_present,
            failed = report.failed,
            "deduction_reconcile_finished"
        );
        Ok(report)
    }

    async fn reconcile_one(&self, record: &FileDeductionRecord) -> Result<bool, RecoveryError> {
        if self.store.deduction_exists(&record.deduction_no).await? {
            return Ok(false);
        }
        let deduction_id = self
            .store
            .insert_deduction_direct(&to_deduction(record))
            .await?;
        info!(
            target: "prepay.recovery",
            deduction_id = deduction_id,
            deduction_no = %record.deduction_no,
            "deduction_reconciled"
        );
        Ok(true)
    }

    /// 运维健康快照
    pub async fn status(&self) -> Result<RecoveryStatus, RecoveryError> {
        let wal = self.wal.clone();
        let file_store = self.file_store.clone();
        let (pending, stats) = tokio::task::spawn_blocking(move || {
            let pending = wal.pending_entries()?.len();
            let stats = file_store.stats()?;
            Ok::<_, RecoveryError>((pending, stats))
        })
        .await??;

        let database_connected = match self.store.ping().await {
            Ok(()) => true,
            Err(err) => {
                warn!(target: "prepay.recovery", error = %err, "database_unreachable");
                false
            }
        };

        Ok(RecoveryStatus {
            wal_pending_count: pending,
            file_store_stats: stats,
            database_connected,
        })
    }
}

fn find_entry(wal: &WriteAheadLog, id: Uuid) -> Result<WalEntry, RecoveryError> {
    wal.entries()?
        .into_iter()
        .find(|entry| entry.id == id)
        .ok_or(RecoveryError::EntryNotFound(id))
}

fn to_deduction(record: &FileDeductionRecord) -> DeductionRecord {
    DeductionRecord {
        deduction_no: record.deduction_no.clone(),
        consumption_id: record.consumption_id,
        meter_id: record.meter_id,
        meter_no: record.meter_no.clone(),
        account_id: record.account_id,
        account_name: record.account_name.clone(),
        merchant_id: record.merchant_id,
        merchant_name: record.merchant_name.clone(),
        shop_id: record.shop_id,
        shop_name: record.shop_name.clone(),
        rate_id: record.rate_id,
        rate_name: record.rate_name.clone(),
        consumption: record.consumption,
        unit_price: record.unit_price,
        base_amount: record.base_amount,
        service_amount: record.service_amount,
        amount: record.amount,
        balance_before: record.balance_before,
        balance_after: record.balance_after,
        status: record.status,
        deduction_time: record.deduction_time,
        remark: None,
    }
}
