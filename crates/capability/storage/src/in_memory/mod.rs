//! # 内存存储实现模块
//!
//! 用于单元测试、集成测试与本地演示。
//!
//! - 每个电表、账户各有一把 `tokio::sync::Mutex` 作为行锁，事务结束时释放
//! - 事务内的写入先暂存，提交时一次性落到共享表；未提交即丢弃则全部作废
//! - 事务内读取能看到本事务暂存的写入

mod billing;

pub use billing::{InMemoryBillingStore, InMemoryBillingTx};
