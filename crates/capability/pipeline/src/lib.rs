//! # 计费管线
//!
//! 每条读数的处理流程：
//!
//! ```text
//! 解码 → 匹配电表 → 单调性预检 → WAL(reading) → 事务 {
//!     锁电表 → 单调性复核 → 上一条读数 → 保存读数/更新电表
//!     → 用电量 → 费率 → 电费 → WAL(deduction) → 锁账户 → 扣费 → 扣费快照
//! } → 文件备份 → WAL 终态 → 余额告警
//! ```
//!
//! - 解码失败、电表不存在、预检不通过时不产生任何持久化副作用
//! - 事务中止（含超时）时整笔回滚，WAL 条目标记为 failed
//! - WAL 与文件备份写入失败只记录日志和指标，不阻断计费
//! - 扣费永不自动重试

mod alert;
mod deduction;
mod error;
mod pipeline;
mod rate;

pub use alert::{BalanceAlertLevel, balance_alert_level};
pub use deduction::{classify, deduction_no, next_account_status};
pub use error::BillingError;
pub use pipeline::{
    BillingPipeline, DeductionSummary, PipelineConfig, ProcessOutcome, UnbilledReason,
};
pub use rate::{
    CachedRateResolver, FeeBreakdown, Generation, RateResolver, StoreRateResolver, calculate_fee,
};
