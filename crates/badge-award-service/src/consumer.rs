//! 生命周期事件消费者
//!
//! 从 Kafka 拉取生命周期事件交给处理器，坏消息记录日志后跳过。

use badge_shared::config::AppConfig;
use badge_shared::kafka::{ConsumerMessage, KafkaConsumer};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::Result;
use crate::processor::{LifecycleEventMessage, LifecycleEventProcessor};
use crate::repository::{AwardRepositoryTrait, BadgeRepositoryTrait};

/// 生命周期事件消费者
pub struct LifecycleEventConsumer<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    consumer: KafkaConsumer,
    topic: String,
    processor: LifecycleEventProcessor<BR, AR>,
}

impl<BR, AR> LifecycleEventConsumer<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    pub fn new(config: &AppConfig, processor: LifecycleEventProcessor<BR, AR>) -> Result<Self> {
        let consumer = KafkaConsumer::new(&config.kafka, Some("lifecycle"))?;
        Ok(Self {
            consumer,
            topic: config.award.lifecycle_topic.clone(),
            processor,
        })
    }

    /// 启动消费循环，直到收到 shutdown 信号
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.consumer.subscribe(&[self.topic.as_str()])?;
        info!(topic = %self.topic, "生命周期事件消费者已启动");

        let processor = self.processor;
        self.consumer
            .start(shutdown, |msg| {
                let processor = &processor;
                async move {
                    handle_message(processor, &msg).await;
                    Ok(())
                }
            })
            .await;

        info!("生命周期事件消费者已停止");
        Ok(())
    }
}

/// 处理单条消息，返回是否成功解析
pub async fn handle_message<BR, AR>(
    processor: &LifecycleEventProcessor<BR, AR>,
    msg: &ConsumerMessage,
) -> bool
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    let message: LifecycleEventMessage = match msg.deserialize_payload() {
        Ok(message) => message,
        Err(e) => {
            warn!(
                error = %e,
                topic = %msg.topic,
                partition = msg.partition,
                offset = msg.offset,
                "生命周期事件格式错误，已跳过"
            );
            return false;
        }
    };

    let outcome = processor.process(&message).await;
    if outcome.is_inconsistent() {
        error!(
            offset = msg.offset,
            wallet_id = %message.wallet_id,
            "生命周期事件处理产生不一致状态"
        );
    }
    true
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::models::badge_types;
    use crate::notification::NotificationRelay;
    use crate::service::{AwardService, AwardSettings};
    use crate::test_utils::{InMemoryAwardRepository, InMemoryBadgeRepository, RecordingSink};
    use badge_shared::retry::RetryPolicy;

    fn message(payload: &str) -> ConsumerMessage {
        ConsumerMessage {
            topic: "badge.lifecycle.events".to_string(),
            partition: 0,
            offset: 42,
            key: None,
            payload: payload.as_bytes().to_vec(),
            timestamp: None,
        }
    }

    fn processor() -> LifecycleEventProcessor<InMemoryBadgeRepository, InMemoryAwardRepository> {
        let badges = Arc::new(
            InMemoryBadgeRepository::new().with_badge(badge_types::WALLET_CREATED, None),
        );
        let service = AwardService::new(
            badges.clone(),
            Arc::new(InMemoryAwardRepository::new()),
            None,
            AwardSettings::default(),
        )
        .unwrap();
        let relay = NotificationRelay::new(
            badges,
            Arc::new(RecordingSink::new("queue")),
            Arc::new(RecordingSink::new("topic")),
            RetryPolicy::none(),
        );
        LifecycleEventProcessor::new(Arc::new(service), Arc::new(relay))
    }

    #[tokio::test]
    async fn test_malformed_message_is_skipped() {
        let processor = processor();
        assert!(!handle_message(&processor, &message("not json")).await);
        assert!(!handle_message(&processor, &message(r#"{"trigger":"userRegistered"}"#)).await);
    }

    #[tokio::test]
    async fn test_valid_message_is_processed() {
        let processor = processor();
        let handled = handle_message(
            &processor,
            &message(r#"{"trigger":"userRegistered","walletId":"w1","userId":"u1"}"#),
        )
        .await;
        assert!(handled);
    }
}
