//! 预付费计费服务：MQTT 读数接入、启动恢复、文件库保留清理与运维状态接口。

mod handlers;
mod ingest;
mod maintenance;
mod routes;
mod utils;

use axum::{
    body::Body,
    http::{HeaderValue, Request},
    middleware::{self, Next},
    response::Response,
};
use prepay_config::AppConfig;
use prepay_filestore::FileStore;
use prepay_pipeline::{BillingPipeline, CachedRateResolver, PipelineConfig};
use prepay_recovery::RecoveryService;
use prepay_storage::{BillingStore, PgBillingStore, apply_schema};
use prepay_telemetry::{init_tracing, new_request_ids};
use prepay_wal::{WalConfig, WriteAheadLog};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{Instrument, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub recovery: Arc<RecoveryService>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 初始化结构化日志
    init_tracing();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;

    // 关系库（建表脚本幂等）
    let pg = PgBillingStore::connect(&config.database_url).await?;
    apply_schema(&pg.pool).await?;
    let store: Arc<dyn BillingStore> = Arc::new(pg);

    // 本地持久化：WAL 与文件库
    let wal = Arc::new(WriteAheadLog::open(
        WalConfig::new(&config.wal_dir).with_segment_max_bytes(config.wal_segment_max_bytes),
    )?);
    let file_store = Arc::new(FileStore::open(&config.file_store_dir)?);

    let recovery = Arc::new(RecoveryService::new(
        store.clone(),
        wal.clone(),
        file_store.clone(),
    ));
    if config.recovery_on_startup {
        // 恢复失败不阻止启动：待处理条目保留在 WAL 中，可通过状态接口观察
        match recovery.recover_wal().await {
            Ok(report) => info!(
                target: "prepay.recovery",
                scanned = report.scanned,
                completed = report.completed,
                manual = report.manual_readings + report.manual_deductions,
                "startup_recovery_done"
            ),
            Err(err) => warn!(target: "prepay.recovery", error = %err, "startup_recovery_failed"),
        }
    }

    let rates = Arc::new(CachedRateResolver::load(store.clone(), config.default_rate_id).await?);
    let pipeline = Arc::new(BillingPipeline::new(
        store,
        rates.clone(),
        wal.clone(),
        file_store.clone(),
        PipelineConfig {
            low_balance_threshold: config.low_balance_threshold,
            tx_timeout: Duration::from_millis(config.tx_timeout_ms),
            ..PipelineConfig::default()
        },
    ));

    ingest::spawn_ingest(&config, pipeline);
    maintenance::spawn_rate_reload(rates);
    maintenance::spawn_retention(file_store, wal, config.file_store_retention_days);

    let state = AppState { recovery };
    let app = routes::create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            // 注入 request_id/trace_id
            .layer(middleware::from_fn(request_context)),
    );

    let listener = tokio::net::TcpListener::bind(&config.http_addr).await?;
    info!(target: "prepay.billing", addr = %config.http_addr, "http_listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn request_context(mut req: Request<Body>, next: Next) -> Response {
    // 生成 request_id 与 trace_id，并注入请求扩展与日志
    let ids = new_request_ids();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    req.extensions_mut().insert(ids.clone());

    let span = tracing::info_span!(
        "request",
        request_id = %ids.request_id,
        trace_id = %ids.trace_id,
        method = %method,
        path = %path
    );

    let mut response = next.run(req).instrument(span).await;
    response.headers_mut().insert(
        "x-request-id",
        HeaderValue::from_str(&ids.request_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response.headers_mut().insert(
        "x-trace-id",
        HeaderValue::from_str(&ids.trace_id).unwrap_or_else(|_| HeaderValue::from_static("")),
    );
    response
}
