//! 通知投递集成测试
//!
//! 覆盖两个渠道的独立性、u1 / wallet-created 场景，
//! 以及经由连接管理器的发布订阅投递与心跳。

use std::sync::Arc;
use std::time::Duration;

use badge_award::models::{AwardIdentity, BadgeType, badge_types};
use badge_award::notification::{
    DeliveryStatus, NotificationRelay, NotificationSink, TopicSink,
};
use badge_award::scheduler::HeartbeatScheduler;
use badge_award::service::{AwardOutcome, AwardService, AwardSettings};
use badge_award::test_utils::{
    FailingSink, InMemoryAwardRepository, InMemoryBadgeRepository, InMemoryConnector,
    RecordingSink,
};
use badge_shared::config::AwardMode;
use badge_shared::pubsub::{
    ConnectionEvent, ConnectionManager, ConnectionSettings, ConnectionState,
};
use badge_shared::retry::RetryPolicy;
use serde_json::Value;

// ==================== 辅助函数 ====================

fn badges() -> Arc<InMemoryBadgeRepository> {
    Arc::new(InMemoryBadgeRepository::new().with_badge(badge_types::WALLET_CREATED, None))
}

fn award_service(
    badges: Arc<InMemoryBadgeRepository>,
) -> AwardService<InMemoryBadgeRepository, InMemoryAwardRepository> {
    AwardService::new(
        badges,
        Arc::new(InMemoryAwardRepository::new()),
        None,
        AwardSettings {
            mode: AwardMode::OffChain,
            retry_failed: false,
            read_retry: RetryPolicy::none(),
            ..Default::default()
        },
    )
    .unwrap()
}

fn relay(
    badges: Arc<InMemoryBadgeRepository>,
    queue: Arc<dyn NotificationSink>,
    topic: Arc<dyn NotificationSink>,
) -> NotificationRelay<InMemoryBadgeRepository> {
    NotificationRelay::new(
        badges,
        queue,
        topic,
        RetryPolicy::once(Duration::from_millis(1)),
    )
}

fn connection_settings(name: &str) -> ConnectionSettings {
    ConnectionSettings {
        name: name.to_string(),
        reconnect_delay: Duration::from_millis(10),
        publish_timeout: Duration::from_secs(1),
    }
}

// ==================== 场景 ====================

#[tokio::test]
async fn test_u1_wallet_created_scenario() {
    let badges = badges();
    let service = award_service(badges.clone());
    let queue = Arc::new(RecordingSink::new("queue"));
    let topic = Arc::new(RecordingSink::new("topic"));
    let relay = relay(badges, queue.clone(), topic.clone());

    let identity = AwardIdentity::new("u1", "u1");
    let badge_type = BadgeType::from(badge_types::WALLET_CREATED);

    let first = service.award_once(&identity, &badge_type, None).await;
    assert!(matches!(first, AwardOutcome::Confirmed(_)));

    let second = service.award_once(&identity, &badge_type, None).await;
    assert!(matches!(second, AwardOutcome::AlreadyAwarded(_)));

    let report = relay.notify(&identity, &badge_type, &first).await.unwrap();
    assert_eq!(report.event.kind, "badgeAwardConfirmationEvent");
    assert_eq!(report.event.payload.badge_type.as_str(), "wallet-created");

    // 重复发放不会产生通知
    assert!(relay.notify(&identity, &badge_type, &second).await.is_none());

    let queued: Value = serde_json::from_str(&queue.messages()[0]).unwrap();
    assert_eq!(queued["type"], "badgeAwardConfirmationEvent");
    assert_eq!(queued["payload"]["badgeType"], "wallet-created");
    assert_eq!(topic.messages().len(), 1);
}

#[tokio::test]
async fn test_queue_failing_twice_still_delivers_topic() {
    let badges = badges();
    let service = award_service(badges.clone());
    let queue = Arc::new(FailingSink::always("queue"));
    let topic = Arc::new(RecordingSink::new("topic"));
    let relay = relay(badges, queue.clone(), topic.clone());

    let identity = AwardIdentity::new("w1", "u1");
    let badge_type = BadgeType::from(badge_types::WALLET_CREATED);
    let outcome = service.award_once(&identity, &badge_type, None).await;

    let report = relay.notify(&identity, &badge_type, &outcome).await.unwrap();

    assert!(matches!(report.queue, DeliveryStatus::Failed { attempts: 2, .. }));
    assert_eq!(queue.attempts(), 2);
    assert_eq!(report.topic, DeliveryStatus::Delivered { attempts: 1 });
    assert_eq!(topic.messages().len(), 1);
}

#[tokio::test]
async fn test_topic_failure_still_delivers_queue() {
    let badges = badges();
    let service = award_service(badges.clone());
    let queue = Arc::new(RecordingSink::new("queue"));
    let topic = Arc::new(FailingSink::always("topic"));
    let relay = relay(badges, queue.clone(), topic.clone());

    let identity = AwardIdentity::new("w1", "u1");
    let badge_type = BadgeType::from(badge_types::WALLET_CREATED);
    let outcome = service.award_once(&identity, &badge_type, None).await;

    let report = relay.notify(&identity, &badge_type, &outcome).await.unwrap();

    assert!(report.queue.is_delivered());
    assert_eq!(queue.messages().len(), 1);
    assert!(!report.topic.is_delivered());
    assert_eq!(topic.attempts(), 1);
}

// ==================== 发布订阅 ====================

#[tokio::test]
async fn test_topic_sink_survives_reconnect() {
    let connector = Arc::new(InMemoryConnector::failing_first(2));
    let manager = ConnectionManager::open(connector.clone(), connection_settings("topic"));
    let sink = TopicSink::new(manager.clone(), "badge.notifications.topic");

    // 前两次连接失败，发布方等待重连完成
    sink.send(r#"{"n":1}"#).await.unwrap();
    assert_eq!(manager.state(), ConnectionState::Connected);

    // 连接中断后发送失败，监督任务随后重连
    let mut events = manager.subscribe();
    connector.break_next_publish();
    assert!(sink.send(r#"{"n":2}"#).await.is_err());

    tokio::time::timeout(Duration::from_secs(1), async {
        let mut lost = false;
        loop {
            match events.recv().await.unwrap() {
                ConnectionEvent::Lost { .. } => lost = true,
                ConnectionEvent::Connected if lost => break,
                _ => {}
            }
        }
    })
    .await
    .unwrap();

    sink.send(r#"{"n":3}"#).await.unwrap();

    let channels: Vec<_> = connector.published().into_iter().map(|(c, _)| c).collect();
    assert_eq!(channels, vec!["badge.notifications.topic"; 2]);
    assert_eq!(connector.connects(), 4);

    manager.close().await;
    assert_eq!(manager.state(), ConnectionState::Closed);
    assert!(sink.send("{}").await.is_err());
}

#[tokio::test]
async fn test_heartbeat_publishes_ping() {
    let connector = Arc::new(InMemoryConnector::new());
    let manager = ConnectionManager::open(connector.clone(), connection_settings("ping"));
    let sink = Arc::new(TopicSink::new(manager.clone(), "ping"));

    let heartbeat = HeartbeatScheduler::new(sink, "0 * * * * *").unwrap();
    assert!(heartbeat.tick().await);

    let published = connector.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "ping");
    let message: Value = serde_json::from_str(&published[0].1).unwrap();
    assert_eq!(message["type"], "ping");
    assert_eq!(message["meta"], serde_json::json!({}));
    assert_eq!(message["payload"], serde_json::json!({}));

    manager.close().await;
}
