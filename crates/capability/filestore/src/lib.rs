//! # 本地文件备份库
//!
//! 数据库事务成功后，把读数与扣费快照追加到按日期分区的 JSONL 文件：
//!
//! ```text
//! <base>/readings/YYYY/MM/DD/readings_YYYYMMDD.jsonl
//! <base>/deductions/YYYY/MM/DD/deductions_YYYYMMDD.jsonl
//! ```
//!
//! 仅用于灾备与审计，不是权威数据源：与数据库不一致时以数据库为准；
//! 数据库不可用期间，依据本库把“应当存在”的扣费记录补回数据库。
//!
//! 分区日期取记录自身时间（采集时间 / 扣费时间）的 UTC 日期。

mod error;
mod records;
mod store;

pub use error::FileStoreError;
pub use records::{FileDeductionRecord, FileReadingRecord};
pub use store::{FileStore, FileStoreStats};
