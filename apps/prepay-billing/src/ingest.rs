//! 接入链路装配：MQTT 报文 → 计费管线。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::FrameEvent;
use prepay_config::AppConfig;
use prepay_ingest::{
    FrameEventHandler, IngestError, MqttSource, MqttSourceConfig, NoopSource, Source,
};
use prepay_pipeline::{BillingError, BillingPipeline, ProcessOutcome};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// 管线处理器
///
/// 处理结果已由管线记录日志与指标；这里只区分“业务拒绝”和“需要关注的失败”。
struct PipelineHandler {
    pipeline: Arc<BillingPipeline>,
}

#[async_trait]
impl FrameEventHandler for PipelineHandler {
    async fn handle(&self, event: FrameEvent) -> Result<(), IngestError> {
        let at = received_at(event.received_at_ms);
        let result = self
            .pipeline
            .process_reading(&event.device_id, event.sub_address, &event.payload, at)
            .await;
        match result {
            Ok(ProcessOutcome::Deducted(summary)) => {
                debug!(
                    target: "prepay.ingest",
                    device_id = %event.device_id,
                    deduction_no = %summary.deduction_no,
                    "frame_billed"
                );
                Ok(())
            }
            Ok(_) => Ok(()),
            // 解码失败、电表未登记、读数回退属于预期的拒绝，不向接入层报错
            Err(
                BillingError::Decode(_)
                | BillingError::MeterNotFound(_)
                | BillingError::ReadingTooLow { .. },
            ) => Ok(()),
            Err(err) => Err(IngestError::Handler(format!("{}: {err}", err.code()))),
        }
    }
}

fn received_at(received_at_ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(received_at_ms).unwrap_or_else(Utc::now)
}

/// 按配置启动接入任务；未开启时使用空源
pub fn spawn_ingest(config: &AppConfig, pipeline: Arc<BillingPipeline>) {
    let source: Arc<dyn Source> = if config.ingest_enabled {
        Arc::new(MqttSource::new(MqttSourceConfig {
            host: config.mqtt_host.clone(),
            port: config.mqtt_port,
            username: config.mqtt_username.clone(),
            password: config.mqtt_password.clone(),
            topic_prefix: config.mqtt_topic_prefix.clone(),
        }))
    } else {
        info!(target: "prepay.ingest", "ingest_disabled");
        Arc::new(NoopSource)
    };
    let handler: Arc<dyn FrameEventHandler> = Arc::new(PipelineHandler { pipeline });
    tokio::spawn(async move {
        if let Err(err) = source.run(handler).await {
            warn!(target: "prepay.ingest", error = %err, "ingest_stopped");
        }
    });
}
