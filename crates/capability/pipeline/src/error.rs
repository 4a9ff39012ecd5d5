use prepay_protocol::FrameError;
use prepay_storage::StorageError;
use rust_decimal::Decimal;
use std::time::Duration;

/// 计费处理错误。
///
/// 无费率、无账户不属于错误：读数与用电量照常提交，结果为 `ProcessOutcome::Unbilled`。
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("frame decode failed: {0}")]
    Decode(#[from] FrameError),
    #[error("meter not found for address {0}")]
    MeterNotFound(String),
    #[error("reading too low for meter {meter_id}: {value} <= current {current}")]
    ReadingTooLow {
        meter_id: i64,
        value: Decimal,
        current: Decimal,
    },
    #[error("negative consumption for meter {meter_id}: {value} after {previous}")]
    ConsumptionNegative {
        meter_id: i64,
        value: Decimal,
        previous: Decimal,
    },
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("transaction timed out after {0:?}")]
    TransactionTimeout(Duration),
}

impl BillingError {
    /// 稳定的错误代码（日志与 WAL 失败原因使用）
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::Decode(_) => "DECODE_FAILED",
            BillingError::MeterNotFound(_) => "METER_NOT_FOUND",
            BillingError::ReadingTooLow { .. } => "READING_TOO_LOW",
            BillingError::ConsumptionNegative { .. } => "CONSUMPTION_NEGATIVE",
            BillingError::Storage(_) => "STORAGE",
            BillingError::TransactionTimeout(_) => "TRANSACTION_TIMEOUT",
        }
    }
}
