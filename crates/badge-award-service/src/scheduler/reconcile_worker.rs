//! pending 记录对账 Worker
//!
//! 定期查询 pending 记录的链上状态，确认后补发通知。

use std::sync::Arc;
use std::time::Duration;

use badge_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{error, info};

use crate::error::Result;
use crate::notification::NotificationRelay;
use crate::repository::{AwardRepositoryTrait, BadgeRepositoryTrait};
use crate::service::{AwardService, ReconcileReport};

/// 对账 Worker
pub struct ReconcileWorker<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    service: Arc<AwardService<BR, AR>>,
    relay: Arc<NotificationRelay<BR>>,
    poll_interval: Duration,
    batch_size: i64,
}

impl<BR, AR> ReconcileWorker<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    pub fn new(
        service: Arc<AwardService<BR, AR>>,
        relay: Arc<NotificationRelay<BR>>,
        poll_interval_secs: u64,
        batch_size: i64,
    ) -> Self {
        Self {
            service,
            relay,
            poll_interval: Duration::from_secs(poll_interval_secs),
            batch_size,
        }
    }

    /// 主循环，直到关闭信号为 `true`
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            batch_size = self.batch_size,
            "ReconcileWorker 已启动"
        );

        loop {
            if let Err(e) = self.run_once().await {
                error!(error = %e, "对账出错");
            }
            metrics::set_worker_last_run("reconcile_worker");

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    // 发送端被丢弃同样视为关闭
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }

                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!("ReconcileWorker 已停止");
    }

    /// 执行一轮对账，并为新确认的记录发送通知
    pub async fn run_once(&self) -> Result<ReconcileReport> {
        let report = self.service.reconcile_pending(self.batch_size).await?;

        for record in &report.confirmed {
            self.relay.notify_record(record).await;
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockBadgeContract, TransactionGateway, TxReceipt};
    use crate::models::{AwardRecord, AwardStatus, BadgeDefinition, BadgeType};
    use crate::notification::MockNotificationSink;
    use crate::repository::{MockAwardRepositoryTrait, MockBadgeRepositoryTrait};
    use crate::service::AwardSettings;
    use badge_shared::config::AwardMode;
    use badge_shared::retry::RetryPolicy;
    use chrono::Utc;

    fn badge_repo() -> Arc<MockBadgeRepositoryTrait> {
        let mut repo = MockBadgeRepositoryTrait::new();
        repo.expect_find_badge_by_type().returning(|t| {
            Ok(Some(BadgeDefinition {
                badge_type: t.clone(),
                on_chain_id: Some(2),
                name: "First Transaction".to_string(),
                image_url: "https://img.example/tx.png".to_string(),
                created_at: Utc::now(),
            }))
        });
        Arc::new(repo)
    }

    fn sink(name: &'static str) -> MockNotificationSink {
        let mut sink = MockNotificationSink::new();
        sink.expect_name().return_const(name);
        sink.expect_send()
            .withf(|payload| payload.contains("\"status\":\"confirmed\""))
            .times(1)
            .returning(|_| Ok(()));
        sink
    }

    #[tokio::test]
    async fn test_confirmed_records_are_notified() {
        let mut contract = MockBadgeContract::new();
        contract.expect_transaction_receipt().returning(|hash| {
            Ok(Some(TxReceipt {
                hash: hash.to_string(),
                status: Some(true),
            }))
        });

        let mut award_repo = MockAwardRepositoryTrait::new();
        award_repo.expect_claim_pending_batch().returning(|_| {
            Ok(vec![AwardRecord {
                id: 7,
                wallet_id: "w7".to_string(),
                user_id: "u7".to_string(),
                badge_type: BadgeType::from("first-transaction-made"),
                status: AwardStatus::Pending,
                tx_hash: Some("0xconfirmed-hash".to_string()),
                to_address: Some("0xrecipient".to_string()),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            }])
        });
        award_repo
            .expect_update_award_status()
            .returning(|_, _, _| Ok(true));
        award_repo
            .expect_count_stale_reservations()
            .returning(|_| Ok(0));

        let badges = badge_repo();
        let service = AwardService::new(
            badges.clone(),
            Arc::new(award_repo),
            Some(Arc::new(TransactionGateway::new(Arc::new(contract)))),
            AwardSettings {
                mode: AwardMode::OnChain,
                retry_failed: false,
                read_retry: RetryPolicy::none(),
                ..Default::default()
            },
        )
        .unwrap();
        let relay = NotificationRelay::new(
            badges,
            Arc::new(sink("queue")),
            Arc::new(sink("topic")),
            RetryPolicy::none(),
        );

        let worker = ReconcileWorker::new(Arc::new(service), Arc::new(relay), 30, 10);
        let report = worker.run_once().await.unwrap();

        assert_eq!(report.checked, 1);
        assert_eq!(report.confirmed.len(), 1);
    }
}
