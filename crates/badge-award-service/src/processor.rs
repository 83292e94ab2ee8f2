//! 生命周期事件处理
//!
//! 将生命周期事件映射为徽章类型并发放，发放确认后发送通知。

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::models::{AwardIdentity, LifecycleTrigger};
use crate::notification::NotificationRelay;
use crate::repository::{AwardRepositoryTrait, BadgeRepositoryTrait};
use crate::service::{AwardOutcome, AwardService};

/// 生命周期事件消息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleEventMessage {
    pub trigger: LifecycleTrigger,
    pub wallet_id: String,
    pub user_id: String,
    #[serde(default)]
    pub chain_address: Option<String>,
}

impl LifecycleEventMessage {
    pub fn identity(&self) -> AwardIdentity {
        AwardIdentity::new(&self.wallet_id, &self.user_id)
    }
}

/// 生命周期事件处理器
pub struct LifecycleEventProcessor<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    service: Arc<AwardService<BR, AR>>,
    relay: Arc<NotificationRelay<BR>>,
}

impl<BR, AR> LifecycleEventProcessor<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    pub fn new(service: Arc<AwardService<BR, AR>>, relay: Arc<NotificationRelay<BR>>) -> Self {
        Self { service, relay }
    }

    pub async fn process(&self, message: &LifecycleEventMessage) -> AwardOutcome {
        let identity = message.identity();
        let outcome = self
            .service
            .on_trigger(message.trigger, &identity, message.chain_address.as_deref())
            .await;

        let report = self
            .relay
            .notify(&identity, &message.trigger.badge_type(), &outcome)
            .await;

        info!(
            trigger = ?message.trigger,
            wallet_id = %identity.wallet_id,
            outcome = outcome.label(),
            notified = report.is_some(),
            "生命周期事件处理完成"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::badge_types;
    use crate::service::AwardSettings;
    use crate::test_utils::{InMemoryAwardRepository, InMemoryBadgeRepository, RecordingSink};
    use badge_shared::retry::RetryPolicy;

    fn processor() -> (
        LifecycleEventProcessor<InMemoryBadgeRepository, InMemoryAwardRepository>,
        Arc<RecordingSink>,
    ) {
        let badges = Arc::new(
            InMemoryBadgeRepository::new().with_badge(badge_types::WALLET_IMPORTED, None),
        );
        let service = AwardService::new(
            badges.clone(),
            Arc::new(InMemoryAwardRepository::new()),
            None,
            AwardSettings {
                read_retry: RetryPolicy::none(),
                ..Default::default()
            },
        )
        .unwrap();
        let queue = Arc::new(RecordingSink::new("queue"));
        let relay = NotificationRelay::new(
            badges,
            queue.clone(),
            Arc::new(RecordingSink::new("topic")),
            RetryPolicy::none(),
        );
        (
            LifecycleEventProcessor::new(Arc::new(service), Arc::new(relay)),
            queue,
        )
    }

    #[test]
    fn test_message_deserialize() {
        let message: LifecycleEventMessage = serde_json::from_str(
            r#"{"trigger":"walletImported","walletId":"w1","userId":"u1","chainAddress":"0xabc"}"#,
        )
        .unwrap();
        assert_eq!(message.trigger, LifecycleTrigger::WalletImported);
        assert_eq!(message.identity(), AwardIdentity::new("w1", "u1"));
        assert_eq!(message.chain_address.as_deref(), Some("0xabc"));

        let without_address: LifecycleEventMessage = serde_json::from_str(
            r#"{"trigger":"userRegistered","walletId":"w2","userId":"u2"}"#,
        )
        .unwrap();
        assert!(without_address.chain_address.is_none());
    }

    #[test]
    fn test_unknown_trigger_rejected() {
        let result = serde_json::from_str::<LifecycleEventMessage>(
            r#"{"trigger":"somethingElse","walletId":"w1","userId":"u1"}"#,
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_process_awards_and_notifies_once() {
        let (processor, queue) = processor();
        let message = LifecycleEventMessage {
            trigger: LifecycleTrigger::WalletImported,
            wallet_id: "w1".to_string(),
            user_id: "u1".to_string(),
            chain_address: None,
        };

        let first = processor.process(&message).await;
        let second = processor.process(&message).await;

        assert!(matches!(first, AwardOutcome::Confirmed(_)));
        assert!(matches!(second, AwardOutcome::AlreadyAwarded(_)));
        assert_eq!(queue.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_undefined_badge_is_skipped_silently() {
        let (processor, queue) = processor();
        let message = LifecycleEventMessage {
            trigger: LifecycleTrigger::FirstAaveDeposit,
            wallet_id: "w1".to_string(),
            user_id: "u1".to_string(),
            chain_address: None,
        };

        assert_eq!(processor.process(&message).await, AwardOutcome::NoSuchBadge);
        assert!(queue.messages().is_empty());
    }
}
