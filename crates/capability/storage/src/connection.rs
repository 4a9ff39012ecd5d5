//! 数据库连接管理
//!
//! - connect_pool：建立 Postgres 连接池
//! - apply_schema：执行随仓库发布的建表脚本（幂等）

use crate::error::StorageError;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// 计费表结构
pub const BILLING_SCHEMA: &str = include_str!("../migrations/0001_billing.sql");

/// 建立 Postgres 连接池
///
/// 最大连接数限制为 8：每条入站消息持有一个事务，连接池即入站并发上限。
pub async fn connect_pool(database_url: &str) -> Result<PgPool, StorageError> {
    let pool = PgPoolOptions::new()
        .max_connections(8)
        .connect(database_url)
        .await?;
    Ok(pool)
}

/// 执行建表脚本
pub async fn apply_schema(pool: &PgPool) -> Result<(), StorageError> {
    sqlx::raw_sql(BILLING_SCHEMA).execute(pool).await?;
    Ok(())
}
