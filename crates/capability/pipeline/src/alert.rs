//! 余额告警

use rust_decimal::Decimal;
use tracing::warn;

/// 告警级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalanceAlertLevel {
    /// 余额为负
    Critical,
    /// 余额为零
    Warning,
    /// 低于低余额阈值
    Info,
}

impl BalanceAlertLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            BalanceAlertLevel::Critical => "critical",
            BalanceAlertLevel::Warning => "warning",
            BalanceAlertLevel::Info => "info",
        }
    }
}

pub fn balance_alert_level(balance: Decimal, low_threshold: Decimal) -> Option<BalanceAlertLevel> {
    if balance < Decimal::ZERO {
        Some(BalanceAlertLevel::Critical)
    } else if balance.is_zero() {
        Some(BalanceAlertLevel::Warning)
    } else if balance < low_threshold {
        Some(BalanceAlertLevel::Info)
    } else {
        None
    }
}

/// 提交后检查余额并输出结构化告警；不影响计费结果
pub(crate) fn emit_balance_alert(
    account_id: i64,
    meter_id: i64,
    balance: Decimal,
    low_threshold: Decimal,
) -> Option<BalanceAlertLevel> {
    let level = balance_alert_level(balance, low_threshold)?;
    prepay_telemetry::record_balance_alert();
    warn!(
        target: "prepay.billing",
        level = level.as_str(),
        account_id = account_id,
        meter_id = meter_id,
        balance = %balance,
        threshold = %low_threshold,
        "balance_alert"
    );
    Some(level)
}
