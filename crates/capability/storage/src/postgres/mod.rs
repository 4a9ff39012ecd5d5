//! # PostgreSQL 存储实现模块
//!
//! 生产环境使用的计费存储，依赖 `migrations/0001_billing.sql` 中的表结构。
//!
//! ## 设计原则
//!
//! 1. **参数化查询**：所有 SQL 使用参数绑定
//! 2. **显式事务**：行锁只在 [`PgBillingTx`] 内获取，随事务提交或回滚释放
//! 3. **加锁顺序**：`meters` 先于 `accounts`，所有调用方一致
//! 4. **数值精度**：金额、读数均为 `numeric`，经 sqlx 映射为 `Decimal`

mod billing;

pub use billing::{PgBillingStore, PgBillingTx};
