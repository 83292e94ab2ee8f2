//! 徽章发放引擎
//!
//! 保证每个 (钱包, 徽章类型) 至多一条非 failed 记录：
//! 读检查只是快速路径，唯一性的最终裁决点是仓储的 `insert_award`。
//!
//! ## 发放流程
//!
//! 1. 查询徽章定义（不存在则静默跳过）
//! 2. 查询已有记录（pending / confirmed / failed 分别处理）
//! 3. 链上模式：先写入无哈希的 pending 预留记录，写入成功者才提交 `awardToken`，
//!    提交成功后补写哈希；提交失败则释放预留，允许再次调用
//! 4. 链下模式：直接写入 confirmed 记录
//!
//! 链上提交成功而补写哈希失败属于不一致状态，只记录告警，不自动修复；
//! 预留记录会继续阻止重复发放。

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use badge_shared::config::AwardMode;
use badge_shared::observability::metrics;
use badge_shared::retry::retry_with_policy;
use tracing::{debug, error, info, instrument, warn};

use crate::chain::TransactionGateway;
use crate::error::{AwardError, Result};
use crate::models::{
    AwardIdentity, AwardRecord, AwardStatus, BadgeDefinition, BadgeType, LifecycleTrigger,
    NewAwardRecord,
};
use crate::repository::{AwardRepositoryTrait, BadgeRepositoryTrait};
use crate::service::dto::{AwardOutcome, AwardSettings, ReconcileReport};

/// 单次发放的链上数量
const AWARD_AMOUNT: u64 = 1;

/// 徽章发放服务
///
/// 自身不持有任何跨调用状态，所有状态都在仓储中，可被多个实例并发调用。
pub struct AwardService<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    badge_repo: Arc<BR>,
    award_repo: Arc<AR>,
    gateway: Option<Arc<TransactionGateway>>,
    settings: AwardSettings,
}

impl<BR, AR> AwardService<BR, AR>
where
    BR: BadgeRepositoryTrait,
    AR: AwardRepositoryTrait,
{
    /// 链上模式必须提供网关
    pub fn new(
        badge_repo: Arc<BR>,
        award_repo: Arc<AR>,
        gateway: Option<Arc<TransactionGateway>>,
        settings: AwardSettings,
    ) -> Result<Self> {
        if settings.mode == AwardMode::OnChain && gateway.is_none() {
            return Err(AwardError::Config(
                "链上发放模式需要配置交易网关".to_string(),
            ));
        }

        Ok(Self {
            badge_repo,
            award_repo,
            gateway,
            settings,
        })
    }

    pub fn mode(&self) -> AwardMode {
        self.settings.mode
    }

    /// 发放徽章（每个钱包每种徽章至多一次）
    #[instrument(
        skip(self, identity),
        fields(wallet_id = %identity.wallet_id, user_id = %identity.user_id, badge_type = %badge_type)
    )]
    pub async fn award_once(
        &self,
        identity: &AwardIdentity,
        badge_type: &BadgeType,
        chain_address: Option<&str>,
    ) -> AwardOutcome {
        let started = Instant::now();
        let outcome = self.try_award(identity, badge_type, chain_address).await;

        metrics::record_award(
            badge_type.as_str(),
            outcome.label(),
            started.elapsed().as_secs_f64(),
        );
        if outcome.is_new_award() {
            info!(outcome = outcome.label(), "徽章发放成功");
        } else {
            debug!(outcome = outcome.label(), "徽章未新发放");
        }
        outcome
    }

    /// 由生命周期事件触发发放
    pub async fn on_trigger(
        &self,
        trigger: LifecycleTrigger,
        identity: &AwardIdentity,
        chain_address: Option<&str>,
    ) -> AwardOutcome {
        let badge_type = trigger.badge_type();
        debug!(?trigger, badge_type = %badge_type, "生命周期事件映射到徽章类型");
        self.award_once(identity, &badge_type, chain_address).await
    }

    /// 用户自行领取指定类型的徽章
    pub async fn self_award(
        &self,
        badge_type: &BadgeType,
        identity: &AwardIdentity,
        chain_address: Option<&str>,
    ) -> AwardOutcome {
        self.award_once(identity, badge_type, chain_address).await
    }

    async fn try_award(
        &self,
        identity: &AwardIdentity,
        badge_type: &BadgeType,
        chain_address: Option<&str>,
    ) -> AwardOutcome {
        let badge = match self.find_badge(badge_type).await {
            Ok(Some(badge)) => badge,
            Ok(None) => {
                debug!("徽章类型尚未定义，跳过发放");
                return AwardOutcome::NoSuchBadge;
            }
            Err(e) => return persistence_failed(&e),
        };

        match self.find_existing(identity, badge_type).await {
            Ok(Some(existing)) => {
                if let Some(outcome) = self.classify_existing(existing) {
                    return outcome;
                }
                info!("上一次发放失败，允许重新发放");
            }
            Ok(None) => {}
            Err(e) => return persistence_failed(&e),
        }

        match self.settings.mode {
            AwardMode::OnChain => self.award_on_chain(identity, &badge, chain_address).await,
            AwardMode::OffChain => {
                let record = NewAwardRecord::confirmed(identity, badge_type, chain_address);
                match self.claim(identity, record).await {
                    Ok(saved) => AwardOutcome::Confirmed(saved),
                    Err(outcome) => outcome,
                }
            }
        }
    }

    /// 已有记录时的结果；可被取代时返回 `None`
    ///
    /// 没有交易哈希的 failed 记录从未上链，总是可以取代。
    fn classify_existing(&self, existing: AwardRecord) -> Option<AwardOutcome> {
        match existing.status {
            AwardStatus::Pending => Some(AwardOutcome::AlreadyPending(existing)),
            AwardStatus::Confirmed => Some(AwardOutcome::AlreadyAwarded(existing)),
            AwardStatus::Failed if self.settings.retry_failed || existing.tx_hash.is_none() => {
                None
            }
            AwardStatus::Failed => Some(AwardOutcome::PreviouslyFailed(existing)),
        }
    }

    async fn award_on_chain(
        &self,
        identity: &AwardIdentity,
        badge: &BadgeDefinition,
        chain_address: Option<&str>,
    ) -> AwardOutcome {
        let Some(gateway) = &self.gateway else {
            return AwardOutcome::SubmissionFailed {
                reason: "未配置交易网关".to_string(),
            };
        };
        let Some(to) = chain_address.map(str::trim).filter(|a| !a.is_empty()) else {
            warn!("缺少链上地址，无法提交发放交易");
            return AwardOutcome::SubmissionFailed {
                reason: "缺少链上地址".to_string(),
            };
        };
        let Some(token_id) = badge.on_chain_id else {
            warn!("徽章尚未铸造上链");
            return AwardOutcome::SubmissionFailed {
                reason: format!("徽章 {} 没有链上 ID", badge.badge_type),
            };
        };

        // 只有写入预留记录成功的调用方才能提交交易
        let reservation = NewAwardRecord::reserved(identity, &badge.badge_type, to);
        let reserved = match self.claim(identity, reservation).await {
            Ok(reserved) => reserved,
            Err(outcome) => return outcome,
        };

        let handle = match gateway.award_token(token_id, to, AWARD_AMOUNT).await {
            Ok(handle) => handle,
            Err(e) => {
                self.release(&reserved).await;
                return AwardOutcome::SubmissionFailed {
                    reason: e.to_string(),
                };
            }
        };

        match self.award_repo.attach_tx_hash(reserved.id, &handle.hash).await {
            Ok(true) => AwardOutcome::Pending(AwardRecord {
                tx_hash: Some(handle.hash),
                ..reserved
            }),
            Ok(false) => inconsistent(
                &badge.badge_type,
                handle.hash,
                "预留记录已不存在或已有交易哈希".to_string(),
            ),
            Err(e) => inconsistent(&badge.badge_type, handle.hash, e.to_string()),
        }
    }

    /// 写入新记录
    ///
    /// 唯一约束冲突时回读已有记录，以存储中的记录为准；失败时返回对应的结果。
    async fn claim(
        &self,
        identity: &AwardIdentity,
        record: NewAwardRecord,
    ) -> std::result::Result<AwardRecord, AwardOutcome> {
        let err = match self.award_repo.insert_award(&record).await {
            Ok(saved) => return Ok(saved),
            Err(e) => e,
        };
        if !err.is_duplicate() {
            return Err(persistence_failed(&err));
        }

        debug!("写入冲突，回读已有记录");
        let outcome = match self.find_existing(identity, &record.badge_type).await {
            Ok(Some(existing)) => self
                .classify_existing(existing)
                .unwrap_or_else(|| persistence_failed(&err)),
            Ok(None) => persistence_failed(&err),
            Err(e) => persistence_failed(&e),
        };
        Err(outcome)
    }

    /// 提交失败后释放预留记录
    async fn release(&self, reserved: &AwardRecord) {
        match self.award_repo.release_reservation(reserved.id).await {
            Ok(true) => debug!(award_id = reserved.id, "已释放预留记录"),
            Ok(false) => warn!(award_id = reserved.id, "预留记录已被更新，无需释放"),
            Err(e) => error!(
                alert = true,
                award_id = reserved.id,
                error = %e,
                "释放预留记录失败，该钱包的发放将被阻止直到人工处理"
            ),
        }
    }

    async fn find_badge(&self, badge_type: &BadgeType) -> Result<Option<BadgeDefinition>> {
        retry_with_policy(
            &self.settings.read_retry,
            "find_badge_by_type",
            AwardError::is_retryable,
            || self.badge_repo.find_badge_by_type(badge_type),
        )
        .await
    }

    async fn find_existing(
        &self,
        identity: &AwardIdentity,
        badge_type: &BadgeType,
    ) -> Result<Option<AwardRecord>> {
        retry_with_policy(
            &self.settings.read_retry,
            "find_award",
            AwardError::is_retryable,
            || self.award_repo.find_award(&identity.wallet_id, badge_type),
        )
        .await
    }

    // ------------------------------------------------------------------
    // 状态对账
    // ------------------------------------------------------------------

    /// 查询 pending 记录的链上状态并尝试更新
    ///
    /// 仅当本次调用完成了 pending -> 终态 的条件更新时返回新状态；
    /// 仍为 pending，或记录已被其他实例更新时返回 `None`。
    #[instrument(skip(self, record), fields(award_id = record.id))]
    pub async fn refresh_status(&self, record: &AwardRecord) -> Result<Option<AwardStatus>> {
        if record.status != AwardStatus::Pending {
            return Ok(None);
        }
        let Some(tx_hash) = record.tx_hash.as_deref() else {
            return Ok(None);
        };
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| AwardError::Config("未配置交易网关，无法查询交易状态".to_string()))?;

        let status = gateway.check_status(tx_hash).await;
        if status == AwardStatus::Pending {
            return Ok(None);
        }

        let updated = self
            .award_repo
            .update_award_status(record.id, AwardStatus::Pending, status)
            .await?;
        if !updated {
            debug!("记录已被其他实例更新");
            return Ok(None);
        }

        info!(tx_hash, status = %status, "发放记录状态已更新");
        Ok(Some(status))
    }

    /// 批量对账 pending 记录
    ///
    /// 每轮领取最久未检查的一批，长期无回执的记录会轮转到队尾。
    #[instrument(skip(self))]
    pub async fn reconcile_pending(&self, limit: i64) -> Result<ReconcileReport> {
        let pending = self.award_repo.claim_pending_batch(limit).await?;
        let mut report = ReconcileReport {
            checked: pending.len(),
            ..Default::default()
        };

        for record in pending {
            match self.refresh_status(&record).await {
                Ok(Some(AwardStatus::Confirmed)) => {
                    metrics::record_reconciliation("confirmed");
                    report.confirmed.push(AwardRecord {
                        status: AwardStatus::Confirmed,
                        ..record
                    });
                }
                Ok(Some(AwardStatus::Failed)) => {
                    metrics::record_reconciliation("failed");
                    warn!(award_id = record.id, tx_hash = ?record.tx_hash, "链上发放交易失败");
                    report.failed += 1;
                }
                Ok(_) => {
                    metrics::record_reconciliation("pending");
                    report.still_pending += 1;
                }
                Err(e) => {
                    metrics::record_reconciliation("error");
                    warn!(award_id = record.id, error = %e, "对账单条记录失败");
                    report.errors += 1;
                }
            }
        }

        report.stale_reservations = self.check_stale_reservations().await;

        if report.checked > 0 {
            info!(
                checked = report.checked,
                confirmed = report.confirmed.len(),
                failed = report.failed,
                still_pending = report.still_pending,
                errors = report.errors,
                "pending 记录对账完成"
            );
        }
        Ok(report)
    }

    /// 超时仍未补写哈希的预留记录
    ///
    /// 提交过程中进程退出会留下这类记录，链上是否已发放需要人工确认。
    async fn check_stale_reservations(&self) -> i64 {
        let Ok(timeout) = chrono::Duration::from_std(self.settings.reservation_timeout) else {
            return 0;
        };
        match self
            .award_repo
            .count_stale_reservations(Utc::now() - timeout)
            .await
        {
            Ok(0) => 0,
            Ok(count) => {
                error!(
                    alert = true,
                    count,
                    "存在超时未补写交易哈希的预留记录，需要人工对账"
                );
                count
            }
            Err(e) => {
                warn!(error = %e, "统计超时预留记录失败");
                0
            }
        }
    }
}

fn inconsistent(badge_type: &BadgeType, tx_hash: String, reason: String) -> AwardOutcome {
    error!(
        alert = true,
        tx_hash = %tx_hash,
        error = %reason,
        "链上交易已提交但发放记录写入失败，需要人工对账"
    );
    metrics::record_award_inconsistency(badge_type.as_str());
    AwardOutcome::PersistenceFailed {
        reason,
        tx_hash: Some(tx_hash),
    }
}

fn persistence_failed(err: &AwardError) -> AwardOutcome {
    warn!(error = %err, code = err.error_code(), "发放记录读写失败");
    AwardOutcome::PersistenceFailed {
        reason: err.to_string(),
        tx_hash: None,
    }
}
