//! 通知中继
//!
//! 仅对已确认的发放构建通知事件，并同时投递到两个相互独立的渠道：
//! 队列失败后重试一次，发布订阅通道只尝试一次。任一渠道失败都不影响另一个。
//! 没有发件箱，重试耗尽后事件被丢弃并记录错误日志。

use std::sync::Arc;

use badge_shared::observability::metrics;
use badge_shared::retry::{RetryPolicy, retry_with_policy};
use tracing::{debug, error, info, instrument, warn};

use super::event::NotificationEvent;
use super::sinks::NotificationSink;
use crate::models::{AwardIdentity, AwardRecord, AwardStatus, BadgeType};
use crate::repository::BadgeRepositoryTrait;
use crate::service::AwardOutcome;

/// 单个渠道的投递结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered { attempts: u32 },
    Failed { attempts: u32, reason: String },
}

impl DeliveryStatus {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts } | Self::Failed { attempts, .. } => *attempts,
        }
    }

    fn label(&self) -> &'static str {
        if self.is_delivered() {
            "delivered"
        } else {
            "failed"
        }
    }
}

/// 一次通知的投递报告
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub event: NotificationEvent,
    pub queue: DeliveryStatus,
    pub topic: DeliveryStatus,
}

/// 通知中继
pub struct NotificationRelay<BR>
where
    BR: BadgeRepositoryTrait,
{
    badge_repo: Arc<BR>,
    queue: Arc<dyn NotificationSink>,
    topic: Arc<dyn NotificationSink>,
    queue_retry: RetryPolicy,
}

impl<BR> NotificationRelay<BR>
where
    BR: BadgeRepositoryTrait,
{
    pub fn new(
        badge_repo: Arc<BR>,
        queue: Arc<dyn NotificationSink>,
        topic: Arc<dyn NotificationSink>,
        queue_retry: RetryPolicy,
    ) -> Self {
        Self {
            badge_repo,
            queue,
            topic,
            queue_retry,
        }
    }

    /// 根据发放结果发送通知
    ///
    /// 只有 `Confirmed` 会触发通知；链上发放在对账确认后由 [`Self::notify_record`] 通知。
    #[instrument(skip(self, identity, outcome), fields(wallet_id = %identity.wallet_id, badge_type = %badge_type))]
    pub async fn notify(
        &self,
        identity: &AwardIdentity,
        badge_type: &BadgeType,
        outcome: &AwardOutcome,
    ) -> Option<DeliveryReport> {
        let AwardOutcome::Confirmed(record) = outcome else {
            debug!(outcome = outcome.label(), "非确认结果，不发送通知");
            return None;
        };
        self.notify_record(record).await
    }

    /// 为已确认的发放记录发送通知
    pub async fn notify_record(&self, record: &AwardRecord) -> Option<DeliveryReport> {
        if record.status != AwardStatus::Confirmed {
            return None;
        }

        let badge = match self.badge_repo.find_badge_by_type(&record.badge_type).await {
            Ok(Some(badge)) => badge,
            Ok(None) => {
                warn!(badge_type = %record.badge_type, "徽章定义不存在，跳过通知");
                return None;
            }
            Err(e) => {
                error!(badge_type = %record.badge_type, error = %e, "查询徽章定义失败，通知已丢弃");
                return None;
            }
        };

        let event = NotificationEvent::badge_award_confirmation(record, &badge);
        self.deliver(event).await
    }

    /// 并发投递到两个渠道
    pub async fn deliver(&self, event: NotificationEvent) -> Option<DeliveryReport> {
        let payload = match event.to_json() {
            Ok(payload) => payload,
            Err(e) => {
                error!(error = %e, "通知事件序列化失败");
                return None;
            }
        };

        let (queue, topic) = tokio::join!(
            self.send_to_queue(&payload),
            self.send_to_topic(&payload)
        );

        info!(
            event_id = %event.meta.event_id,
            queue = queue.label(),
            topic = topic.label(),
            "通知投递完成"
        );
        Some(DeliveryReport {
            event,
            queue,
            topic,
        })
    }

    async fn send_to_queue(&self, payload: &str) -> DeliveryStatus {
        let mut attempts = 0u32;
        let result = retry_with_policy(
            &self.queue_retry,
            "notification_queue",
            |_| true,
            || {
                attempts += 1;
                self.queue.send(payload)
            },
        )
        .await;

        self.finish(self.queue.name(), attempts, result)
    }

    async fn send_to_topic(&self, payload: &str) -> DeliveryStatus {
        let result = self.topic.send(payload).await;
        self.finish(self.topic.name(), 1, result)
    }

    fn finish(
        &self,
        sink: &'static str,
        attempts: u32,
        result: crate::error::Result<()>,
    ) -> DeliveryStatus {
        let status = match result {
            Ok(()) => DeliveryStatus::Delivered { attempts },
            Err(e) => {
                error!(sink, attempts, error = %e, "通知投递失败，事件已丢弃");
                DeliveryStatus::Failed {
                    attempts,
                    reason: e.to_string(),
                }
            }
        };
        metrics::record_notification_delivery(sink, status.label());
        status
    }
}
