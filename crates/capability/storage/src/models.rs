//! 数据模型
//!
//! 只包含计费管线读写到的字段：
//! - 电表：MeterRecord（含商户/店铺冗余名称）
//! - 读数与用电量：ReadingRecord / NewReading、ConsumptionRecord / NewConsumption
//! - 费率：RateRecord（固定单价或分时段单价，附加服务费）
//! - 账户：AccountRecord
//! - 扣费快照：DeductionRecord

use chrono::{DateTime, Utc};
use domain::{AccountStatus, CalcMode, CollectType, ConsumptionStatus, DeductionStatus, ServiceFeeKind};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 电表记录
#[derive(Debug, Clone, PartialEq)]
pub struct MeterRecord {
    pub meter_id: i64,
    pub meter_no: String,
    pub comm_addr: String,
    /// 当前读数；只增不减
    pub current_reading: Decimal,
    /// 倍率（互感器变比）
    pub multiplier: Decimal,
    pub rate_id: Option<i64>,
    pub account_id: Option<i64>,
    pub online_status: bool,
    pub last_collect_at: Option<DateTime<Utc>>,
    pub merchant_id: Option<i64>,
    pub merchant_name: Option<String>,
    pub shop_id: Option<i64>,
    pub shop_name: Option<String>,
}

/// 读数（只追加）
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingRecord {
    pub reading_id: i64,
    pub meter_id: i64,
    pub value: Decimal,
    pub collect_time: DateTime<Utc>,
    pub collect_type: CollectType,
}

/// 新读数
#[derive(Debug, Clone, PartialEq)]
pub struct NewReading {
    pub meter_id: i64,
    pub value: Decimal,
    pub collect_time: DateTime<Utc>,
    pub collect_type: CollectType,
}

/// 用电量区间
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionRecord {
    pub consumption_id: i64,
    pub meter_id: i64,
    pub start_reading_id: i64,
    pub end_reading_id: i64,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub consumption: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub status: ConsumptionStatus,
}

/// 新用电量区间（初始状态 pending）
#[derive(Debug, Clone, PartialEq)]
pub struct NewConsumption {
    pub meter_id: i64,
    pub start_reading_id: i64,
    pub end_reading_id: i64,
    pub start_value: Decimal,
    pub end_value: Decimal,
    pub consumption: Decimal,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

/// 分时段单价
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TouBand {
    pub name: String,
    /// "HH:MM"
    pub start_time: String,
    pub end_time: String,
    pub unit_price: Decimal,
}

/// 附加服务费
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceFee {
    pub name: String,
    pub kind: ServiceFeeKind,
    /// flat：固定金额；percentage：基础电费的百分比（如 5 表示 5%）
    pub value: Decimal,
}

/// 费率
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRecord {
    pub rate_id: i64,
    pub rate_name: String,
    pub calc_mode: CalcMode,
    pub unit_price: Decimal,
    pub tou_bands: Vec<TouBand>,
    pub service_fees: Vec<ServiceFee>,
}

/// 预付费账户
#[derive(Debug, Clone, PartialEq)]
pub struct AccountRecord {
    pub account_id: i64,
    pub account_name: String,
    /// 余额，可为负（欠费）
    pub balance: Decimal,
    pub total_consumption: Decimal,
    pub status: AccountStatus,
}

/// 扣费快照
///
/// 写入时复制商户、店铺、账户、电表、费率的名称，后续源数据变更不影响历史账单。
#[derive(Debug, Clone, PartialEq)]
pub struct DeductionRecord {
    pub deduction_no: String,
    pub consumption_id: i64,
    pub meter_id: i64,
    pub meter_no: String,
    pub account_id: i64,
    pub account_name: String,
    pub merchant_id: Option<i64>,
    pub merchant_name: Option<String>,
    pub shop_id: Option<i64>,
    pub shop_name: Option<String>,
    pub rate_id: i64,
    pub rate_name: String,
    pub consumption: Decimal,
    pub unit_price: Decimal,
    pub base_amount: Decimal,
    pub service_amount: Decimal,
    pub amount: Decimal,
    pub balance_before: Decimal,
    pub balance_after: Decimal,
    pub status: DeductionStatus,
    pub deduction_time: DateTime<Utc>,
    pub remark: Option<String>,
}
