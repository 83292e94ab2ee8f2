//! 仓储 Trait 定义
//!
//! 服务层依赖抽象而非具体实现，便于 mock 测试和替换存储

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{
    AwardRecord, AwardStatus, BadgeDefinition, BadgeType, NewAwardRecord, NewBadgeDefinition,
};

/// 徽章定义仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeRepositoryTrait: Send + Sync {
    async fn find_badge_by_type(&self, badge_type: &BadgeType) -> Result<Option<BadgeDefinition>>;

    /// 写入新徽章定义，类型已存在时返回 `BadgeAlreadyExists`
    async fn insert_badge(&self, badge: &NewBadgeDefinition) -> Result<BadgeDefinition>;
}

/// 发放记录仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AwardRepositoryTrait: Send + Sync {
    /// 查询 (wallet_id, badge_type) 的记录
    ///
    /// 存在非 failed 记录时优先返回它，否则返回最近一条 failed 记录。
    async fn find_award(
        &self,
        wallet_id: &str,
        badge_type: &BadgeType,
    ) -> Result<Option<AwardRecord>>;

    /// 写入发放记录
    ///
    /// 唯一性的最终裁决点：已有非 failed 记录时返回 `DuplicateKey`。
    /// 链上模式写入的是尚无交易哈希的 pending 预留记录，只有写入成功的调用方才能提交交易。
    async fn insert_award(&self, record: &NewAwardRecord) -> Result<AwardRecord>;

    /// 为预留记录补写交易哈希
    ///
    /// 仅当记录仍为 pending 且哈希为空时生效，返回是否更新。
    async fn attach_tx_hash(&self, id: i64, tx_hash: &str) -> Result<bool>;

    /// 释放未提交交易的预留记录，使后续调用可以重新发放
    ///
    /// 仅删除 pending 且哈希为空的记录，返回是否删除。
    async fn release_reservation(&self, id: i64) -> Result<bool>;

    /// 条件更新状态，仅当当前状态等于 `from` 时生效，返回是否更新
    async fn update_award_status(&self, id: i64, from: AwardStatus, to: AwardStatus)
    -> Result<bool>;

    /// 领取一批待对账的 pending 记录
    ///
    /// 只包含带交易哈希的记录，按上次检查时间升序（从未检查的优先），
    /// 并把领取到的记录标记为刚检查过，使长期无回执的记录不会独占批次。
    async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<AwardRecord>>;

    /// 统计早于 `before` 创建、仍未补写交易哈希的预留记录数
    async fn count_stale_reservations(&self, before: DateTime<Utc>) -> Result<i64>;
}
