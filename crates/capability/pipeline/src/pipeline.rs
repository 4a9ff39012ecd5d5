//! 单条读数的计费状态机

use crate::alert::emit_balance_alert;
use crate::deduction::{classify, deduction_no, next_account_status};
use crate::error::BillingError;
use crate::rate::{RateResolver, calculate_fee};
use chrono::{DateTime, Utc};
use domain::{AccountStatus, CollectType, CommAddress, ConsumptionStatus, DeductionStatus};
use prepay_filestore::{FileDeductionRecord, FileReadingRecord, FileStore};
use prepay_protocol::{DEFAULT_DECODERS, RegisterEncoding, decode_frame, decode_reading_with};
use prepay_storage::{
    BillingStore, DeductionRecord, MeterRecord, NewConsumption, NewReading, RateRecord,
    ReadingRecord,
};
use prepay_telemetry as telemetry;
use prepay_wal::{WalEntry, WalError, WriteAheadLog};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// 管线参数
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// 低余额告警阈值（info 级）
    pub low_balance_threshold: Decimal,
    /// 单条读数事务的超时上限
    pub tx_timeout: Duration,
    /// 寄存器还原顺序
    pub decoders: Vec<RegisterEncoding>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            low_balance_threshold: Decimal::TEN,
            tx_timeout: Duration::from_secs(10),
            decoders: DEFAULT_DECODERS.to_vec(),
        }
    }
}

/// 未计费原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnbilledReason {
    /// 电表与默认配置都没有可用费率
    NoRate,
    /// 电表未绑定账户，或账户不存在
    NoAccount,
}

impl UnbilledReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnbilledReason::NoRate => "no_rate",
            UnbilledReason::NoAccount => "no_account",
        }
    }
}

/// 扣费结果摘要
#[derive(Debug, Clone, PartialEq)]
pub struct DeductionSummary {
    pub meter_id: i64,
    pub reading_id: i64,
    pub consumption_id: i64,
    pub account_id: i64,
    pub deduction_no: String,
    pub consumption: Decimal,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: DeductionStatus,
    pub account_status: AccountStatus,
}

/// 单条读数的处理结果（事务均已提交）
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// 电表首条读数：只保存读数
    FirstReading { meter_id: i64, reading_id: i64 },
    /// 用电量为零：不生成用电量与扣费
    ZeroConsumption { meter_id: i64, reading_id: i64 },
    /// 用电量已保存为 pending，未动账
    Unbilled {
        meter_id: i64,
        reading_id: i64,
        consumption_id: i64,
        reason: UnbilledReason,
    },
    Deducted(DeductionSummary),
}

/// 事务提交后需要做的后续工作
struct Committed {
    outcome: ProcessOutcome,
    reading: ReadingRecord,
    deduction: Option<DeductionRecord>,
}

impl Committed {
    fn without_deduction(outcome: ProcessOutcome, reading: ReadingRecord) -> Self {
        Self {
            outcome,
            reading,
            deduction: None,
        }
    }
}

/// 扣费 WAL 写入的进行状态
///
/// 事务超时被取消时阻塞写入可能仍在执行并最终落盘；保留句柄，事后取回条目 id 补写终态。
#[derive(Default)]
struct DeductionWal {
    in_flight: Option<JoinHandle<Result<WalEntry, WalError>>>,
    id: Option<Uuid>,
}

impl DeductionWal {
    /// 写入并等待 fsync；在等待期间被取消时句柄留在槽中
    async fn write(
        &mut self,
        task: impl FnOnce() -> Result<WalEntry, WalError> + Send + 'static,
    ) -> Result<Uuid, String> {
        let handle = self.in_flight.insert(tokio::task::spawn_blocking(task));
        let joined = handle.await;
        self.in_flight = None;
        let result = flatten_join(joined).map(|entry| entry.id);
        self.id = result.as_ref().ok().copied();
        result
    }

    /// 等待仍在进行的写入完成，返回最终的条目 id
    async fn settle(self) -> Result<Option<Uuid>, String> {
        match self.in_flight {
            Some(handle) => flatten_join(handle.await).map(|entry| Some(entry.id)),
            None => Ok(self.id),
        }
    }
}

/// 计费管线
///
/// 每条入站消息调用一次 [`BillingPipeline::process_reading`]；不同电表的读数可并发处理，
/// 同一电表的读数在电表行锁上串行化。
pub struct BillingPipeline {
    store: Arc<dyn BillingStore>,
    rates: Arc<dyn RateResolver>,
    wal: Arc<WriteAheadLog>,
    file_store: Arc<FileStore>,
    config: PipelineConfig,
}

impl BillingPipeline {
    pub fn new(
        store: Arc<dyn BillingStore>,
        rates: Arc<dyn RateResolver>,
        wal: Arc<WriteAheadLog>,
        file_store: Arc<FileStore>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            rates,
            wal,
            file_store,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// 处理一帧读数
    pub async fn process_reading(
        &self,
        device_id: &str,
        sub_address: u8,
        raw_frame: &[u8],
        at: DateTime<Utc>,
    ) -> Result<ProcessOutcome, BillingError> {
        telemetry::record_frame_received();

        let value = self.decode(device_id, sub_address, raw_frame)?;
        let address = CommAddress::new(device_id, sub_address);
        let meter = self.resolve_meter(&address).await?;

        // 预检：基于可能过期的读数快速拒绝重复或陈旧报文，不写 WAL
        if value <= meter.current_reading {
            return Err(reject_too_low(&meter, value, meter.current_reading));
        }

        let rate = self.rates.resolve(&meter).await?;
        let reading_wal = self.wal_write_reading(&meter, value, at).await;
        let mut deduction_wal = DeductionWal::default();

        let started = Instant::now();
        let result = match tokio::time::timeout(
            self.config.tx_timeout,
            self.run_transaction(&meter, value, at, rate.as_ref(), &mut deduction_wal),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                telemetry::record_transaction_timeout();
                Err(BillingError::TransactionTimeout(self.config.tx_timeout))
            }
        };
        telemetry::record_transaction_latency_ms(started.elapsed().as_millis() as u64);

        let deduction_wal = match deduction_wal.settle().await {
            Ok(id) => id,
            Err(err) => {
                self.log_wal_write_failure(meter.meter_id, "deduction", &err);
                None
            }
        };
        let wal_ids: Vec<Uuid> = [reading_wal, deduction_wal].into_iter().flatten().collect();
        match result {
            Ok(committed) => {
                self.after_commit(&meter, &committed).await;
                self.mark_wal(wal_ids, None).await;
                Ok(committed.outcome)
            }
            Err(err) => {
                match &err {
                    BillingError::ReadingTooLow { .. } | BillingError::ConsumptionNegative { .. } => {}
                    _ => {
                        telemetry::record_transaction_failure();
                        error!(
                            target: "prepay.billing",
                            meter_id = meter.meter_id,
                            value = %value,
                            code = err.code(),
                            error = %err,
                            "transaction_failed"
                        );
                    }
                }
                self.mark_wal(wal_ids, Some(err.to_string())).await;
                Err(err)
            }
        }
    }

    fn decode(
        &self,
        device_id: &str,
        sub_address: u8,
        raw_frame: &[u8],
    ) -> Result<Decimal, BillingError> {
        let decoded = decode_frame(raw_frame).and_then(|frame| {
            if frame.address != sub_address {
                warn!(
                    target: "prepay.billing",
                    device_id = device_id,
                    sub_address = sub_address,
                    frame_address = frame.address,
                    "frame_address_mismatch"
                );
            }
            decode_reading_with(&frame, &self.config.decoders)
        });
        decoded.map_err(|err| {
            telemetry::record_decode_failure();
            warn!(
                target: "prepay.billing",
                device_id = device_id,
                sub_address = sub_address,
                error = %err,
                "frame_decode_failed"
            );
            BillingError::Decode(err)
        })
    }

    async fn resolve_meter(&self, address: &CommAddress) -> Result<MeterRecord, BillingError> {
        for candidate in address.candidates() {
            if let Some(meter) = self.store.find_meter_by_comm_addr(&candidate).await? {
                return Ok(meter);
            }
        }
        telemetry::record_meter_not_found();
        warn!(
            target: "prepay.billing",
            comm_addr = %address.composite(),
            "meter_not_found"
        );
        Err(BillingError::MeterNotFound(address.composite()))
    }

    async fn run_transaction(
        &self,
        candidate: &MeterRecord,
        value: Decimal,
        at: DateTime<Utc>,
        rate: Option<&RateRecord>,
        deduction_wal: &mut DeductionWal,
    ) -> Result<Committed, BillingError> {
        let mut tx = self.store.begin().await?;

        let meter = tx
            .lock_meter_for_update(candidate.meter_id)
            .await?
            .ok_or_else(|| BillingError::MeterNotFound(candidate.comm_addr.clone()))?;
        if value <= meter.current_reading {
            return Err(reject_too_low(&meter, value, meter.current_reading));
        }

        // 须在写入本条读数之前查询：同一时刻的上一条读数也是区间起点
        let previous = tx.find_last_reading_before(meter.meter_id, at).await?;
        if let Some(previous) = &previous {
            if value < previous.value {
                telemetry::record_consumption_negative();
                warn!(
                    target: "prepay.billing",
                    meter_id = meter.meter_id,
                    value = %value,
                    previous = %previous.value,
                    previous_at = %previous.collect_time,
                    at = %at,
                    "consumption_negative"
                );
                return Err(BillingError::ConsumptionNegative {
                    meter_id: meter.meter_id,
                    value,
                    previous: previous.value,
                });
            }
        }

        let reading = tx
            .create_reading(&NewReading {
                meter_id: meter.meter_id,
                value,
                collect_time: at,
                collect_type: CollectType::Auto,
            })
            .await?;
        tx.update_meter_reading(meter.meter_id, value, at).await?;

        let Some(previous) = previous else {
            tx.commit().await?;
            return Ok(Committed::without_deduction(
                ProcessOutcome::FirstReading {
                    meter_id: meter.meter_id,
                    reading_id: reading.reading_id,
                },
                reading,
            ));
        };

        let amount = (value - previous.value) * meter.multiplier;
        if amount.is_zero() {
            tx.commit().await?;
            return Ok(Committed::without_deduction(
                ProcessOutcome::ZeroConsumption {
                    meter_id: meter.meter_id,
                    reading_id: reading.reading_id,
                },
                reading,
            ));
        }

        let consumption = tx
            .create_consumption(&NewConsumption {
                meter_id: meter.meter_id,
                start_reading_id: previous.reading_id,
                end_reading_id: reading.reading_id,
                start_value: previous.value,
                end_value: value,
                consumption: amount,
                period_start: previous.collect_time,
                period_end: at,
            })
            .await?;

        let unbilled = |reason: UnbilledReason| ProcessOutcome::Unbilled {
            meter_id: meter.meter_id,
            reading_id: reading.reading_id,
            consumption_id: consumption.consumption_id,
            reason,
        };

        let Some(rate) = rate else {
            tx.commit().await?;
            let outcome = unbilled(UnbilledReason::NoRate);
            return Ok(Committed::without_deduction(outcome, reading));
        };
        let fee = calculate_fee(rate, amount, false);

        let Some(account_id) = meter.account_id else {
            tx.commit().await?;
            let outcome = unbilled(UnbilledReason::NoAccount);
            return Ok(Committed::without_deduction(outcome, reading));
        };

        self.wal_write_deduction(deduction_wal, meter.meter_id, amount, fee.total)
            .await;

        let Some(account) = tx.lock_account_for_update(account_id).await? else {
            tx.commit().await?;
            let outcome = unbilled(UnbilledReason::NoAccount);
            return Ok(Committed::without_deduction(outcome, reading));
        };

        let status = classify(account.balance, fee.total);
        let balance_after = account.balance - fee.total;
        let account_status = next_account_status(account.status, status);
        tx.update_account_balance(
            account.account_id,
            balance_after,
            account.total_consumption + amount,
            account_status,
        )
        .await?;

        let deduction_time = Utc::now();
        let snapshot = DeductionRecord {
            deduction_no: deduction_no(deduction_time),
            consumption_id: consumption.consumption_id,
            meter_id: meter.meter_id,
            meter_no: meter.meter_no.clone(),
            account_id: account.account_id,
            account_name: account.account_name.clone(),
            merchant_id: meter.merchant_id,
            merchant_name: meter.merchant_name.clone(),
            shop_id: meter.shop_id,
            shop_name: meter.shop_name.clone(),
            rate_id: rate.rate_id,
            rate_name: rate.rate_name.clone(),
            consumption: amount,
            unit_price: fee.unit_price,
            base_amount: fee.base_amount,
            service_amount: fee.service_amount,
            amount: fee.total,
            balance_before: account.balance,
            balance_after,
            status,
            deduction_time,
            remark: None,
        };
        tx.create_deduction(&snapshot).await?;
        tx.update_consumption_status(consumption.consumption_id, ConsumptionStatus::Deducted)
            .await?;
        tx.commit().await?;

        let summary = DeductionSummary {
            meter_id: meter.meter_id,
            reading_id: reading.reading_id,
            consumption_id: consumption.consumption_id,
            account_id: account.account_id,
            deduction_no: snapshot.deduction_no.clone(),
            consumption: amount,
            amount: fee.total,
            balance_before: account.balance,
            balance_after,
            status,
            account_status,
        };
        Ok(Committed {
            outcome: ProcessOutcome::Deducted(summary),
            reading,
            deduction: Some(snapshot),
        })
    }

    /// 提交后：指标、日志、文件备份、余额告警
    async fn after_commit(&self, meter: &MeterRecord, committed: &Committed) {
        telemetry::record_reading_persisted();
        match &committed.outcome {
            ProcessOutcome::FirstReading { reading_id, .. } => {
                telemetry::record_first_reading();
                info!(
                    target: "prepay.billing",
                    meter_id = meter.meter_id,
                    reading_id = *reading_id,
                    "first_reading_saved"
                );
            }
            ProcessOutcome::ZeroConsumption { reading_id, .. } => {
                telemetry::record_zero_consumption();
                debug!(
                    target: "prepay.billing",
                    meter_id = meter.meter_id,
                    reading_id = *reading_id,
                    "zero_consumption"
                );
            }
            ProcessOutcome::Unbilled {
                consumption_id,
                reason,
                ..
            } => {
                telemetry::record_consumption_unbilled();
                warn!(
                    target: "prepay.billing",
                    meter_id = meter.meter_id,
                    consumption_id = *consumption_id,
                    reason = reason.as_str(),
                    "consumption_unbilled"
                );
            }
            ProcessOutcome::Deducted(summary) => {
                match summary.status {
                    DeductionStatus::Success => telemetry::record_deduction_success(),
                    DeductionStatus::Partial => telemetry::record_deduction_partial(),
                    DeductionStatus::Failed => telemetry::record_deduction_failed(),
                }
                info!(
                    target: "prepay.billing",
                    meter_id = summary.meter_id,
                    account_id = summary.account_id,
                    deduction_no = %summary.deduction_no,
                    consumption = %summary.consumption,
                    amount = %summary.amount,
                    balance_after = %summary.balance_after,
                    status = summary.status.as_str(),
                    "deduction_applied"
                );
            }
        }

        self.backup(meter, committed).await;

        if let ProcessOutcome::Deducted(summary) = &committed.outcome {
            emit_balance_alert(
                summary.account_id,
                summary.meter_id,
                summary.balance_after,
                self.config.low_balance_threshold,
            );
        }
    }

    async fn backup(&self, meter: &MeterRecord, committed: &Committed) {
        let saved_at = Utc::now();
        let reading = FileReadingRecord {
            reading_id: committed.reading.reading_id,
            meter_id: meter.meter_id,
            meter_no: meter.meter_no.clone(),
            comm_addr: meter.comm_addr.clone(),
            value: committed.reading.value,
            collect_time: committed.reading.collect_time,
            collect_type: committed.reading.collect_type,
            saved_at,
        };
        let deduction = committed
            .deduction
            .as_ref()
            .map(|record| to_file_deduction(record, saved_at));

        let file_store = self.file_store.clone();
        let result = run_blocking(move || {
            file_store.save_reading(&reading)?;
            if let Some(deduction) = &deduction {
                file_store.save_deduction(deduction)?;
            }
            Ok::<_, prepay_filestore::FileStoreError>(())
        })
        .await;
        if let Err(err) = result {
            telemetry::record_file_store_write_failure();
            error!(
                target: "prepay.billing",
                meter_id = meter.meter_id,
                error = %err,
                "file_store_write_failed"
            );
        }
    }

    async fn wal_write_reading(
        &self,
        meter: &MeterRecord,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Option<Uuid> {
        let wal = self.wal.clone();
        let meter_id = meter.meter_id;
        let comm_addr = meter.comm_addr.clone();
        let result =
            run_blocking(move || wal.write_reading(meter_id, &comm_addr, value, at)).await;
        match result {
            Ok(entry) => Some(entry.id),
            Err(err) => {
                self.log_wal_write_failure(meter_id, "reading", &err);
                None
            }
        }
    }

    async fn wal_write_deduction(
        &self,
        slot: &mut DeductionWal,
        meter_id: i64,
        consumption: Decimal,
        amount: Decimal,
    ) {
        let wal = self.wal.clone();
        let result = slot
            .write(move || wal.write_deduction(meter_id, consumption, amount))
            .await;
        if let Err(err) = result {
            self.log_wal_write_failure(meter_id, "deduction", &err);
        }
    }

    /// WAL 是安全网，写入失败不阻断计费
    fn log_wal_write_failure(&self, meter_id: i64, kind: &'static str, err: &str) {
        telemetry::record_wal_write_failure();
        error!(
            target: "prepay.billing",
            meter_id = meter_id,
            kind = kind,
            error = %err,
            "wal_write_failed"
        );
    }

    /// 事务结果确定后追加 WAL 终态标记
    async fn mark_wal(&self, ids: Vec<Uuid>, failure: Option<String>) {
        if ids.is_empty() {
            return;
        }
        let wal = self.wal.clone();
        let result = run_blocking(move || {
            for id in ids {
                match &failure {
                    None => wal.mark_completed(id)?,
                    Some(reason) => wal.mark_failed(id, reason.clone())?,
                }
            }
            Ok::<_, WalError>(())
        })
        .await;
        if let Err(err) = result {
            telemetry::record_wal_write_failure();
            error!(target: "prepay.billing", error = %err, "wal_mark_failed");
        }
    }
}

fn reject_too_low(meter: &MeterRecord, value: Decimal, current: Decimal) -> BillingError {
    telemetry::record_reading_rejected();
    info!(
        target: "prepay.billing",
        meter_id = meter.meter_id,
        value = %value,
        current = %current,
        "reading_rejected"
    );
    BillingError::ReadingTooLow {
        meter_id: meter.meter_id,
        value,
        current,
    }
}

fn to_file_deduction(record: &DeductionRecord, saved_at: DateTime<Utc>) -> FileDeductionRecord {
    FileDeductionRecord {
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
        saved_at,
    }
}

/// 在阻塞线程池执行同步 I/O（WAL fsync、文件追加）
async fn run_blocking<T, E>(task: impl FnOnce() -> Result<T, E> + Send + 'static) -> Result<T, String>
where
    T: Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    flatten_join(tokio::task::spawn_blocking(task).await)
}

fn flatten_join<T, E: std::fmt::Display>(
    joined: Result<Result<T, E>, JoinError>,
) -> Result<T, String> {
    match joined {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(err.to_string()),
        Err(err) => Err(err.to_string()),
    }
}
