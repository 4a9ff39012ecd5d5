//! 计费相关的状态枚举。
//!
//! 数据库与 JSONL 文件中统一以小写蛇形字符串保存。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 未知状态字符串。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownStatus(pub String);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown status: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = UnknownStatus;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value {
                    $($text => Ok(Self::$variant),)+
                    other => Err(UnknownStatus(other.to_string())),
                }
            }
        }
    };
}

/// 账户状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    Normal,
    Frozen,
    /// 欠费：扣费后余额不足（≤ 0 或不足以覆盖本次费用）。
    Arrears,
}

string_enum!(AccountStatus {
    Normal => "normal",
    Frozen => "frozen",
    Arrears => "arrears",
});

/// 用电量区间状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumptionStatus {
    /// 尚未扣费（无费率、无账户时停留在此状态）。
    Pending,
    /// 已尝试扣费（无论成功、部分还是失败）。
    Deducted,
    /// 人工标记的异常区间。
    Abnormal,
}

string_enum!(ConsumptionStatus {
    Pending => "pending",
    Deducted => "deducted",
    Abnormal => "abnormal",
});

/// 扣费结果。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeductionStatus {
    /// 余额 ≥ 费用。
    Success,
    /// 0 < 余额 < 费用。
    Partial,
    /// 余额 ≤ 0。
    Failed,
}

string_enum!(DeductionStatus {
    Success => "success",
    Partial => "partial",
    Failed => "failed",
});

/// 费率计算模式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalcMode {
    Fixed,
    TimeOfUse,
}

string_enum!(CalcMode {
    Fixed => "fixed",
    TimeOfUse => "time_of_use",
});

/// 服务费类型。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceFeeKind {
    /// 固定金额。
    Flat,
    /// 基础电费的百分比（value = 5 表示 5%）。
    Percentage,
}

string_enum!(ServiceFeeKind {
    Flat => "flat",
    Percentage => "percentage",
});

/// 读数采集方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectType {
    Auto,
    Manual,
}

string_enum!(CollectType {
    Auto => "auto",
    Manual => "manual",
});
