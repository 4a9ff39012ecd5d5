//! WAL 条目与行格式

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 条目类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryType {
    Reading,
    Deduction,
}

impl WalEntryType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Reading => "reading",
            Self::Deduction => "deduction",
        }
    }
}

/// 条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalStatus {
    Pending,
    Completed,
    Failed,
}

impl WalStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// WAL 条目（折叠终态标记后的视图）
///
/// `id` 由本地生成（UUID v7，时间有序），不依赖数据库自增主键：
/// 写 WAL 时数据库记录可能尚不存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalEntry {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub entry_type: WalEntryType,
    pub status: WalStatus,
    pub meter_id: i64,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WalEntry {
    /// 解析读数负载
    pub fn reading_payload(&self) -> Option<ReadingPayload> {
        match self.entry_type {
            WalEntryType::Reading => serde_json::from_value(self.payload.clone()).ok(),
            WalEntryType::Deduction => None,
        }
    }

    /// 解析扣费负载
    pub fn deduction_payload(&self) -> Option<DeductionPayload> {
        match self.entry_type {
            WalEntryType::Deduction => serde_json::from_value(self.payload.clone()).ok(),
            WalEntryType::Reading => None,
        }
    }
}

/// 读数条目负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    pub comm_addr: String,
    pub value: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// 扣费条目负载
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeductionPayload {
    pub consumption: Decimal,
    pub amount: Decimal,
}

/// 终态标记行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct WalMarker {
    pub id: Uuid,
    pub status: WalStatus,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 日志中的一行：完整条目或终态标记
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum WalLine {
    Entry(WalEntry),
    Marker(WalMarker),
}
