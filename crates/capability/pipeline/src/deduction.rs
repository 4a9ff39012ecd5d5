//! 扣费结果分类与单号生成

use chrono::{DateTime, Utc};
use domain::{AccountStatus, DeductionStatus};
use rust_decimal::Decimal;

/// 按扣费前余额与费用分类
///
/// - 余额 ≥ 费用：success
/// - 0 < 余额 < 费用：partial
/// - 余额 ≤ 0：failed
///
/// 三种结果都扣除全额费用：`balance_after = balance - fee`。
pub fn classify(balance: Decimal, fee: Decimal) -> DeductionStatus {
    if balance >= fee {
        DeductionStatus::Success
    } else if balance > Decimal::ZERO {
        DeductionStatus::Partial
    } else {
        DeductionStatus::Failed
    }
}

/// 扣费后的账户状态
///
/// 扣费只会把账户推向欠费；冻结账户保持冻结，恢复正常由充值流程负责。
pub fn next_account_status(current: AccountStatus, outcome: DeductionStatus) -> AccountStatus {
    match (current, outcome) {
        (AccountStatus::Frozen, _) => AccountStatus::Frozen,
        (current, DeductionStatus::Success) => current,
        (_, DeductionStatus::Partial | DeductionStatus::Failed) => AccountStatus::Arrears,
    }
}

/// 扣费单号：`DED` + 时间（yyyyMMddHHmmss）+ 8 位十六进制随机串
pub fn deduction_no(at: DateTime<Utc>) -> String {
    let suffix = (uuid::Uuid::new_v4().as_u128() & 0xFFFF_FFFF) as u32;
    format!("DED{}{:08X}", at.format("%Y%m%d%H%M%S"), suffix)
}
