//! 徽章发放服务入口
//!
//! 启动顺序：配置 -> 可观测性 -> 数据库与迁移 -> Redis / Kafka -> 服务组装 -> 后台任务。

use std::sync::Arc;

use anyhow::{Context, Result};
use badge_shared::config::{AppConfig, AwardMode};
use badge_shared::database::Database;
use badge_shared::kafka::KafkaProducer;
use badge_shared::observability;
use badge_shared::pubsub::{ConnectionManager, ConnectionSettings, Connector, RedisConnector};
use badge_shared::retry::RetryPolicy;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info};

use badge_award::chain::{JsonRpcBadgeContract, TransactionGateway};
use badge_award::consumer::LifecycleEventConsumer;
use badge_award::notification::{KafkaQueueSink, NotificationRelay, NotificationSink, TopicSink};
use badge_award::processor::LifecycleEventProcessor;
use badge_award::repository::{AwardRepository, BadgeRepository};
use badge_award::scheduler::{HeartbeatScheduler, ReconcileWorker};
use badge_award::service::{AwardService, AwardSettings};

const SERVICE_NAME: &str = "badge-award-service";

#[tokio::main]
async fn main() -> Result<()> {
    // 1. 加载并校验配置，校验失败直接终止启动
    let config = AppConfig::load(SERVICE_NAME).context("加载配置失败")?;
    config.validate().context("配置校验失败")?;

    // 2. 可观测性
    let obs_config = config
        .observability
        .clone()
        .with_service_name(&config.service_name);
    let _guard = observability::init(&obs_config).await?;

    info!(
        environment = %config.environment,
        mode = ?config.award.mode,
        "Starting badge-award-service..."
    );

    // 3. 数据库
    let db = Database::connect(&config.database).await?;
    db.run_migrations().await?;
    let pool = db.pool().clone();
    info!("Database connection established");

    // 4. Redis 连通性检查
    let redis_connector = Arc::new(RedisConnector::new(&config.redis)?);
    redis_connector.connect().await.context("Redis 连接失败")?;
    info!("Redis connection established");

    // 5. 仓储与链上网关
    let badge_repo = Arc::new(BadgeRepository::new(pool.clone()));
    let award_repo = Arc::new(AwardRepository::new(pool.clone()));

    let gateway = match config.award.mode {
        AwardMode::OnChain => {
            let contract = JsonRpcBadgeContract::new(&config.chain)?;
            info!(network = %config.chain.network, "Transaction gateway initialized");
            Some(Arc::new(TransactionGateway::new(Arc::new(contract))))
        }
        AwardMode::OffChain => None,
    };

    // 6. 通知渠道
    let producer = KafkaProducer::new(&config.kafka)?;
    let queue_sink: Arc<dyn NotificationSink> = Arc::new(KafkaQueueSink::new(
        producer,
        &config.notification.queue_topic,
        &config.notification.partition_key,
    ));

    let notify_conn = ConnectionManager::open(
        redis_connector.clone(),
        ConnectionSettings {
            name: "notification-topic".to_string(),
            reconnect_delay: config.notification.reconnect_delay(),
            publish_timeout: config.notification.publish_timeout(),
        },
    );
    let topic_sink: Arc<dyn NotificationSink> = Arc::new(TopicSink::new(
        notify_conn.clone(),
        &config.notification.topic_channel,
    ));

    // 7. 服务组装
    let relay = Arc::new(NotificationRelay::new(
        badge_repo.clone(),
        queue_sink,
        topic_sink,
        RetryPolicy::once(config.notification.queue_retry_delay()),
    ));
    let award_service = Arc::new(AwardService::new(
        badge_repo.clone(),
        award_repo.clone(),
        gateway.clone(),
        AwardSettings::from(&config.award),
    )?);
    info!("Services initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    // 8. 后台任务
    if gateway.is_some() {
        let worker = ReconcileWorker::new(
            award_service.clone(),
            relay.clone(),
            config.award.reconcile_interval_secs,
            config.award.reconcile_batch_size,
        );
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { worker.run(rx).await }));
    }

    let ping_conn = if config.notification.ping_enabled {
        let conn = ConnectionManager::open(
            redis_connector.clone(),
            ConnectionSettings {
                name: "ping".to_string(),
                reconnect_delay: config.notification.reconnect_delay(),
                publish_timeout: config.notification.publish_timeout(),
            },
        );
        let sink = Arc::new(TopicSink::new(conn.clone(), &config.notification.ping_channel));
        let heartbeat = HeartbeatScheduler::new(sink, &config.notification.ping_cron)?;
        let rx = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move { heartbeat.run(rx).await }));
        Some(conn)
    } else {
        None
    };

    let processor = LifecycleEventProcessor::new(award_service, relay);
    let consumer = LifecycleEventConsumer::new(&config, processor)?;
    let rx = shutdown_rx.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = consumer.run(rx).await {
            error!(error = %e, "生命周期事件消费者异常退出");
        }
    }));

    info!("badge-award-service started");

    // 9. 等待关闭信号
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "后台任务异常退出");
        }
    }

    notify_conn.close().await;
    if let Some(conn) = ping_conn {
        conn.close().await;
    }
    db.close().await;

    info!("Service shutdown complete");
    Ok(())
}

/// 优雅关闭信号处理
///
/// 监听 Ctrl+C 和 SIGTERM 信号，用于 Kubernetes 优雅关闭
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, starting graceful shutdown...");
        }
    }
}
