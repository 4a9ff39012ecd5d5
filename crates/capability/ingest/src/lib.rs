//! MQTT 接入：把 `<prefix>/<device_id>` 主题上的报文转成 [`FrameEvent`] 交给处理器。
//!
//! 负载即原始报文，首字节为从站地址。每条消息在独立任务中处理，
//! 同一电表的并发读数由计费事务的行锁串行化。

use async_trait::async_trait;
use domain::FrameEvent;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// 接入错误。
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("handler error: {0}")]
    Handler(String),
    #[error("source error: {0}")]
    Source(String),
}

/// FrameEvent 处理器。
#[async_trait]
pub trait FrameEventHandler: Send + Sync {
    async fn handle(&self, event: FrameEvent) -> Result<(), IngestError>;
}

/// 接入源抽象。
#[async_trait]
pub trait Source: Send + Sync {
    async fn run(&self, handler: Arc<dyn FrameEventHandler>) -> Result<(), IngestError>;
}

/// 空接入源（关闭 MQTT 时使用）。
#[derive(Debug, Default)]
pub struct NoopSource;

#[async_trait]
impl Source for NoopSource {
    async fn run(&self, _handler: Arc<dyn FrameEventHandler>) -> Result<(), IngestError> {
        Ok(())
    }
}

/// MQTT 接入源配置。
#[derive(Debug, Clone)]
pub struct MqttSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub topic_prefix: String,
}

/// MQTT 接入源。
#[derive(Debug, Clone)]
pub struct MqttSource {
    config: MqttSourceConfig,
}

impl MqttSource {
    pub fn new(config: MqttSourceConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MqttSourceConfig {
        &self.config
    }
}

#[async_trait]
impl Source for MqttSource {
    async fn run(&self, handler: Arc<dyn FrameEventHandler>) -> Result<(), IngestError> {
        let client_id = format!("prepay-ingest-{}", now_epoch_ms());
        let mut options =
            rumqttc::MqttOptions::new(client_id, self.config.host.clone(), self.config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) =
            (self.config.username.as_ref(), self.config.password.as_ref())
        {
            options.set_credentials(username, password);
        }

        let (client, mut eventloop) = rumqttc::AsyncClient::new(options, 64);
        let topic = format!("{}/+", self.config.topic_prefix.trim_end_matches('/'));
        client
            .subscribe(topic.clone(), rumqttc::QoS::AtLeastOnce)
            .await
            .map_err(|err| IngestError::Source(err.to_string()))?;
        info!(target: "prepay.ingest", topic = %topic, "mqtt_subscribed");

        loop {
            match eventloop.poll().await {
                Ok(rumqttc::Event::Incoming(rumqttc::Packet::Publish(publish))) => {
                    let Some(event) = frame_event(
                        &self.config.topic_prefix,
                        &publish.topic,
                        &publish.payload,
                        now_epoch_ms(),
                    ) else {
                        warn!(
                            target: "prepay.ingest",
                            topic = %publish.topic,
                            payload_size = publish.payload.len(),
                            "mqtt_message_skipped"
                        );
                        continue;
                    };
                    debug!(
                        target: "prepay.ingest",
                        device_id = %event.device_id,
                        sub_address = event.sub_address,
                        payload_size = event.payload.len(),
                        "frame_received"
                    );
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        if let Err(err) = handler.handle(event).await {
                            warn!(target: "prepay.ingest", error = %err, "frame_handler_failed");
                        }
                    });
                }
                Ok(_) => {}
                Err(err) => return Err(IngestError::Source(err.to_string())),
            }
        }
    }
}

/// 从主题中取出设备标识：`<prefix>/<device_id>`
pub fn parse_device_id<'a>(prefix: &str, topic: &'a str) -> Option<&'a str> {
    let prefix = prefix.trim_matches('/');
    let topic = topic.trim_matches('/');
    let rest = if prefix.is_empty() {
        topic
    } else {
        topic.strip_prefix(prefix)?.strip_prefix('/')?
    };
    if rest.is_empty() || rest.contains('/') {
        return None;
    }
    Some(rest)
}

/// 组装 FrameEvent；空负载或主题不匹配时返回 `None`
pub fn frame_event(
    prefix: &str,
    topic: &str,
    payload: &[u8],
    received_at_ms: i64,
) -> Option<FrameEvent> {
    let device_id = parse_device_id(prefix, topic)?;
    let sub_address = *payload.first()?;
    Some(FrameEvent {
        device_id: device_id.to_string(),
        sub_address,
        payload: payload.to_vec(),
        received_at_ms,
    })
}

fn now_epoch_ms() -> i64 {
    let now = std::time::SystemTime::now();
    let duration = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    duration.as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_id_from_topic() {
        assert_eq!(
            parse_device_id("prepay/meter", "prepay/meter/collector-01"),
            Some("collector-01")
        );
        assert_eq!(
            parse_device_id("prepay/meter/", "/prepay/meter/collector-01/"),
            Some("collector-01")
        );
        assert_eq!(parse_device_id("", "collector-01"), Some("collector-01"));
    }

    #[test]
    fn foreign_or_nested_topics_are_rejected() {
        assert_eq!(parse_device_id("prepay/meter", "other/collector-01"), None);
        assert_eq!(parse_device_id("prepay/meter", "prepay/meter"), None);
        assert_eq!(parse_device_id("prepay/meter", "prepay/meterx/c1"), None);
        assert_eq!(parse_device_id("prepay/meter", "prepay/meter/c1/extra"), None);
    }

    #[test]
    fn sub_address_is_first_payload_byte() {
        let event = frame_event("prepay/meter", "prepay/meter/c1", &[0x03, 0x03, 0x00], 42)
            .expect("event");
        assert_eq!(event.device_id, "c1");
        assert_eq!(event.sub_address, 3);
        assert_eq!(event.payload, vec![0x03, 0x03, 0x00]);
        assert_eq!(event.received_at_ms, 42);
    }

    #[test]
    fn empty_payload_is_skipped() {
        assert!(frame_event("prepay/meter", "prepay/meter/c1", &[], 0).is_none());
    }

    #[tokio::test]
    async fn noop_source_returns_immediately() {
        struct Rejecting;

        #[async_trait]
        impl FrameEventHandler for Rejecting {
            async fn handle(&self, _event: FrameEvent) -> Result<(), IngestError> {
                Err(IngestError::Handler("unexpected".to_string()))
            }
        }

        NoopSource.run(Arc::new(Rejecting)).await.expect("noop");
    }
}
