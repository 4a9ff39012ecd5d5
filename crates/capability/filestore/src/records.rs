//! 扁平化的备份记录

use chrono::{DateTime, Utc};
use domain::{CollectType, DeductionStatus};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 读数备份
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileReadingRecord {
    pub reading_id: i64,
    pub meter_id: i64,
    pub meter_no: String,
    pub comm_addr: String,
    pub value: Decimal,
    pub collect_time: DateTime<Utc>,
    pub collect_type: CollectType,
    pub saved_at: DateTime<Utc>,
}

/// 扣费快照备份
///
/// 字段与数据库扣费记录一一对应（含冗余名称），对账时原样回写。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileDeductionRecord {
    pub deduction_no: String,
    pub consumption_id: i64,
    pub meter_id: i64,
    pub meter_no: String,
    pub account_id: i64,
    pub account_name: String,
    #[serde(default)]
    pub merchant_id: Option<i64>,
    #[serde(default)]
    pub merchant_name: Option<String>,
    #[serde(default)]
    pub shop_id: Option<i64>,
    #[serde(default)]
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
    pub saved_at: DateTime<Utc>,
}
