//! 徽章定义实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::BadgeType;

/// 徽章定义
///
/// 由铸造流程创建，铸造后不再修改。`on_chain_id` 为链上代币 ID，链下部署时可能为空。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct BadgeDefinition {
    pub badge_type: BadgeType,
    pub on_chain_id: Option<i64>,
    pub name: String,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

/// 新徽章定义（铸造完成后写入）
#[derive(Debug, Clone, PartialEq)]
pub struct NewBadgeDefinition {
    pub badge_type: BadgeType,
    pub on_chain_id: Option<i64>,
    pub name: String,
    pub image_url: String,
}
