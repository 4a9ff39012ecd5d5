//! 存储接口 Trait 定义
//!
//! - BillingStore：连接池级别的查询与事务入口
//! - BillingTx：显式事务句柄，管线的所有写操作都经由它完成
//!
//! 设计约束：
//! - 不存在隐式的全局连接；需要行锁的操作只出现在 BillingTx 上
//! - 加锁顺序固定为先电表后账户
//! - 句柄未提交即被丢弃时，事务回滚

use crate::error::StorageError;
use crate::models::{
    AccountRecord, ConsumptionRecord, DeductionRecord, MeterRecord, NewConsumption, NewReading,
    RateRecord, ReadingRecord,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{AccountStatus, ConsumptionStatus};
use rust_decimal::Decimal;

/// 计费存储接口
#[async_trait]
pub trait BillingStore: Send + Sync {
    /// 按通信地址精确查找电表（不加锁）
    async fn find_meter_by_comm_addr(
        &self,
        comm_addr: &str,
    ) -> Result<Option<MeterRecord>, StorageError>;

    /// 适用费率：电表自身费率优先，否则使用默认费率
    async fn get_applicable_rate(
        &self,
        meter_id: i64,
        default_rate_id: Option<i64>,
    ) -> Result<Option<RateRecord>, StorageError>;

    /// 全部费率（供缓存加载）
    async fn list_rates(&self) -> Result<Vec<RateRecord>, StorageError>;

    /// 开启事务
    async fn begin(&self) -> Result<Box<dyn BillingTx>, StorageError>;

    /// 是否已存在 (meter_id, value, collect_time) 完全一致的读数
    async fn reading_exists(
        &self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<bool, StorageError>;

    async fn deduction_exists(&self, deduction_no: &str) -> Result<bool, StorageError>;

    /// 绕过管线直接写入扣费快照（对账补录用）
    async fn insert_deduction_direct(&self, record: &DeductionRecord) -> Result<i64, StorageError>;

    /// 连通性检查
    async fn ping(&self) -> Result<(), StorageError>;
}

/// 事务句柄
#[async_trait]
pub trait BillingTx: Send {
    /// 锁定电表行（SELECT ... FOR UPDATE）
    async fn lock_meter_for_update(
        &mut self,
        meter_id: i64,
    ) -> Result<Option<MeterRecord>, StorageError>;

    /// 更新当前读数、最近采集时间，并置为在线
    async fn update_meter_reading(
        &mut self,
        meter_id: i64,
        value: Decimal,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;

    async fn create_reading(&mut self, reading: &NewReading) -> Result<ReadingRecord, StorageError>;

    /// 同一电表采集时间不晚于 `at` 的最近一条读数
    ///
    /// 同一时刻已有读数时取其中最后写入的一条，使同一时间戳的连续读数首尾相接。
    async fn find_last_reading_before(
        &mut self,
        meter_id: i64,
        at: DateTime<Utc>,
    ) -> Result<Option<ReadingRecord>, StorageError>;

    async fn create_consumption(
        &mut self,
        consumption: &NewConsumption,
    ) -> Result<ConsumptionRecord, StorageError>;

    async fn update_consumption_status(
        &mut self,
        consumption_id: i64,
        status: ConsumptionStatus,
    ) -> Result<(), StorageError>;

    /// 锁定账户行（必须在电表之后）
    async fn lock_account_for_update(
        &mut self,
        account_id: i64,
    ) -> Result<Option<AccountRecord>, StorageError>;

    async fn update_account_balance(
        &mut self,
        account_id: i64,
        balance: Decimal,
        total_consumption: Decimal,
        status: AccountStatus,
    ) -> Result<(), StorageError>;

    async fn create_deduction(&mut self, record: &DeductionRecord) -> Result<i64, StorageError>;

    async fn commit(self: Box<Self>) -> Result<(), StorageError>;

    async fn rollback(self: Box<Self>) -> Result<(), StorageError>;
}
