//! 后台维护任务：文件库保留清理、WAL 分段回收、费率缓存刷新。

use prepay_filestore::FileStore;
use prepay_pipeline::CachedRateResolver;
use prepay_wal::WriteAheadLog;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);
const RATE_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// 每日执行一次：清理过期文件分区，回收已全部终结的 WAL 分段
pub fn spawn_retention(file_store: Arc<FileStore>, wal: Arc<WriteAheadLog>, retention_days: u32) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RETENTION_INTERVAL);
        loop {
            ticker.tick().await;
            run_retention(file_store.clone(), wal.clone(), retention_days).await;
        }
    });
}

async fn run_retention(file_store: Arc<FileStore>, wal: Arc<WriteAheadLog>, retention_days: u32) {
    let result = tokio::task::spawn_blocking(move || {
        let files = file_store.cleanup(retention_days).map_err(|err| err.to_string())?;
        let segments = wal.prune_resolved_segments().map_err(|err| err.to_string())?;
        Ok::<_, String>((files, segments))
    })
    .await;
    match result {
        Ok(Ok((files, segments))) => info!(
            target: "prepay.billing",
            removed_files = files,
            pruned_segments = segments,
            retention_days = retention_days,
            "retention_finished"
        ),
        Ok(Err(err)) => warn!(target: "prepay.billing", error = %err, "retention_failed"),
        Err(err) => warn!(target: "prepay.billing", error = %err, "retention_failed"),
    }
}

/// 定期重新加载费率缓存；加载失败时保留当前代次
pub fn spawn_rate_reload(rates: Arc<CachedRateResolver>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(RATE_RELOAD_INTERVAL);
        // 首次加载已在启动时完成
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(err) = rates.reload().await {
                warn!(target: "prepay.billing", error = %err, "rate_cache_reload_failed");
            }
        }
    });
}
