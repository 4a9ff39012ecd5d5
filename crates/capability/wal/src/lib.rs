//! # 预写日志（WAL）
//!
//! 在任何数据库写入之前，先把“即将处理的读数”“即将执行的扣费”落盘。
//!
//! ## 生命周期
//!
//! ```text
//! pending ──► completed
//!    │
//!    └──────► failed
//! ```
//!
//! - 新条目以 `pending` 行追加并 fsync 后才返回
//! - 终态以独立的标记行追加（同样 fsync），原始行从不改写
//! - 读取时按 `id` 折叠所有标记，剩下的 `pending` 即为待恢复条目
//!
//! ## 分段
//!
//! 日志由若干 `wal-<seq>.log` 分段组成，每段有字节上限，写满后开新段。
//! 回收时删除活动分段之前的全部分段，其中仍为 pending 的条目先转写到活动分段。
//! 打开时截掉活动分段中崩溃留下的未完成末行。
//! 写入由单个互斥锁串行化；读取各自打开文件句柄，不占用写锁。
//!
//! ## 行格式（JSONL）
//!
//! ```json
//! {"id":"…","type":"reading","status":"pending","meter_id":7,"payload":{…},"timestamp":"…","created_at":"…"}
//! {"id":"…","status":"completed","completed_at":"…"}
//! {"id":"…","status":"failed","completed_at":"…","error":"reading too low"}
//! ```

mod entry;
mod error;
mod segment;
mod writer;

pub use entry::{DeductionPayload, ReadingPayload, WalEntry, WalEntryType, WalStatus};
pub use error::WalError;
pub use writer::{WalConfig, WalStats, WriteAheadLog};
