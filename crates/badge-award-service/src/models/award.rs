//! 发放记录实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{AwardStatus, BadgeType};

/// 发放对象
///
/// 唯一性以钱包为准，用户 ID 仅用于审计。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardIdentity {
    pub wallet_id: String,
    pub user_id: String,
}

impl AwardIdentity {
    pub fn new(wallet_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            wallet_id: wallet_id.into(),
            user_id: user_id.into(),
        }
    }
}

/// 发放记录
///
/// 每个 (wallet_id, badge_type) 至多一条非 failed 记录，由存储层唯一约束保证。
/// 除未提交交易即被释放的链上预留记录外，记录只会更新状态，从不删除。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct AwardRecord {
    pub id: i64,
    pub wallet_id: String,
    pub user_id: String,
    pub badge_type: BadgeType,
    pub status: AwardStatus,
    /// 链下发放，或链上预留尚未提交时为空
    pub tx_hash: Option<String>,
    /// 接收徽章的链上地址
    pub to_address: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AwardRecord {
    pub fn identity(&self) -> AwardIdentity {
        AwardIdentity::new(&self.wallet_id, &self.user_id)
    }
}

/// 待写入的发放记录
#[derive(Debug, Clone, PartialEq)]
pub struct NewAwardRecord {
    pub wallet_id: String,
    pub user_id: String,
    pub badge_type: BadgeType,
    pub status: AwardStatus,
    pub tx_hash: Option<String>,
    pub to_address: Option<String>,
}

impl NewAwardRecord {
    /// 链下直接确认的记录
    pub fn confirmed(
        identity: &AwardIdentity,
        badge_type: &BadgeType,
        to_address: Option<&str>,
    ) -> Self {
        Self {
            wallet_id: identity.wallet_id.clone(),
            user_id: identity.user_id.clone(),
            badge_type: badge_type.clone(),
            status: AwardStatus::Confirmed,
            tx_hash: None,
            to_address: to_address.map(str::to_string),
        }
    }

    /// 链上发放的预留记录
    ///
    /// 写入成功即取得提交交易的资格，交易哈希在提交成功后补写。
    pub fn reserved(identity: &AwardIdentity, badge_type: &BadgeType, to_address: &str) -> Self {
        Self {
            wallet_id: identity.wallet_id.clone(),
            user_id: identity.user_id.clone(),
            badge_type: badge_type.clone(),
            status: AwardStatus::Pending,
            tx_hash: None,
            to_address: Some(to_address.to_string()),
        }
    }
}
