//! 通知投递渠道
//!
//! - **queue**: 持久化队列（Kafka），按固定分区键分组
//! - **topic**: 发布订阅通道（Redis），经由连接管理器发送

use std::sync::Arc;

use async_trait::async_trait;
use badge_shared::kafka::KafkaProducer;
use badge_shared::pubsub::ConnectionManager;
use tracing::debug;

use crate::error::Result;

/// 只发送的通知渠道
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// 渠道名称（用于日志和指标）
    fn name(&self) -> &'static str;

    /// 发送一条 JSON 字符串消息
    async fn send(&self, payload: &str) -> Result<()>;
}

/// Kafka 持久化队列
pub struct KafkaQueueSink {
    producer: KafkaProducer,
    topic: String,
    partition_key: String,
}

impl KafkaQueueSink {
    pub fn new(
        producer: KafkaProducer,
        topic: impl Into<String>,
        partition_key: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
            partition_key: partition_key.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for KafkaQueueSink {
    fn name(&self) -> &'static str {
        "queue"
    }

    async fn send(&self, payload: &str) -> Result<()> {
        let (partition, offset) = self
            .producer
            .send(&self.topic, &self.partition_key, payload.as_bytes())
            .await?;
        debug!(topic = %self.topic, partition, offset, "通知已写入队列");
        Ok(())
    }
}

/// 发布订阅通道
pub struct TopicSink {
    connection: Arc<ConnectionManager>,
    channel: String,
}

impl TopicSink {
    pub fn new(connection: Arc<ConnectionManager>, channel: impl Into<String>) -> Self {
        Self {
            connection,
            channel: channel.into(),
        }
    }
}

#[async_trait]
impl NotificationSink for TopicSink {
    fn name(&self) -> &'static str {
        "topic"
    }

    async fn send(&self, payload: &str) -> Result<()> {
        self.connection.publish(&self.channel, payload).await?;
        Ok(())
    }
}
