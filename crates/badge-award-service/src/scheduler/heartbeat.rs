//! 心跳调度
//!
//! 按 cron 表达式（UTC）向发布订阅通道发送 ping 消息，与发放流程无关。
//! 连接断开由连接管理器负责重连，单次发送失败只记录日志，循环不会停止。

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use badge_shared::observability::metrics;
use chrono::{DateTime, Utc};
use cron::Schedule;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{AwardError, Result};
use crate::notification::{NotificationSink, ping_message};

/// 心跳调度器
pub struct HeartbeatScheduler {
    sink: Arc<dyn NotificationSink>,
    schedule: Schedule,
    run_on_init: bool,
}

impl HeartbeatScheduler {
    /// `cron_expr` 为六段式（含秒）表达式
    pub fn new(sink: Arc<dyn NotificationSink>, cron_expr: &str) -> Result<Self> {
        let schedule = Schedule::from_str(cron_expr)
            .map_err(|e| AwardError::Config(format!("无效的 cron 表达式 {cron_expr}: {e}")))?;

        Ok(Self {
            sink,
            schedule,
            run_on_init: true,
        })
    }

    /// 启动时是否立即发送一次
    pub fn with_run_on_init(mut self, run_on_init: bool) -> Self {
        self.run_on_init = run_on_init;
        self
    }

    /// 下一次触发时间
    pub fn next_fire(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// 主循环，直到关闭信号为 `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(run_on_init = self.run_on_init, "心跳调度已启动");

        if self.run_on_init {
            self.tick().await;
        }

        loop {
            let now = Utc::now();
            let Some(next) = self.next_fire(now) else {
                warn!("cron 表达式没有后续触发时间，心跳调度退出");
                break;
            };
            let wait = (next - now).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = tokio::time::sleep(wait) => {
                    self.tick().await;
                }
            }
        }

        info!("心跳调度已停止");
    }

    /// 发送一次心跳，返回是否成功
    pub async fn tick(&self) -> bool {
        let payload = ping_message().to_string();
        let success = match self.sink.send(&payload).await {
            Ok(()) => {
                debug!(sink = self.sink.name(), "心跳已发送");
                true
            }
            Err(e) => {
                warn!(sink = self.sink.name(), error = %e, "心跳发送失败");
                false
            }
        };
        metrics::record_heartbeat(success);
        success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::MockNotificationSink;
    use chrono::TimeZone;

    #[test]
    fn test_default_schedule_fires_every_minute() {
        let scheduler = HeartbeatScheduler::new(
            Arc::new(MockNotificationSink::new()),
            "0 * * * * *",
        )
        .unwrap();

        let after = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 30).unwrap();
        let next = scheduler.next_fire(after).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2024, 5, 1, 12, 1, 0).unwrap());
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let result = HeartbeatScheduler::new(Arc::new(MockNotificationSink::new()), "every minute");
        assert!(matches!(result, Err(AwardError::Config(_))));
    }

    #[tokio::test]
    async fn test_failed_tick_is_reported() {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("topic");
        sink.expect_send()
            .returning(|_| Err(AwardError::Internal("connection lost".to_string())));

        let scheduler = HeartbeatScheduler::new(Arc::new(sink), "0 * * * * *").unwrap();
        assert!(!scheduler.tick().await);
    }

    #[tokio::test]
    async fn test_run_sends_on_init_and_stops_on_shutdown() {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const("topic");
        sink.expect_send()
            .withf(|payload| payload.contains("\"ping\""))
            .times(1)
            .returning(|_| Ok(()));

        // 每年一次，测试期间只会有启动时的那一次
        let scheduler = Arc::new(
            HeartbeatScheduler::new(Arc::new(sink), "0 0 0 1 1 *").unwrap(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run(shutdown_rx).await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
