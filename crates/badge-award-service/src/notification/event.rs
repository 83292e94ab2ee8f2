//! 通知事件

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::models::{AwardRecord, AwardStatus, BadgeDefinition, BadgeType};

/// 徽章发放确认事件类型
pub const BADGE_AWARD_CONFIRMATION: &str = "badgeAwardConfirmationEvent";
/// 心跳消息类型
pub const PING: &str = "ping";

/// 通知事件
///
/// 不落库，仅在一次投递期间存在。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub meta: EventMeta,
    pub payload: AwardPayload,
}

/// 接收方信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMeta {
    pub event_id: Uuid,
    pub recipient_wallet_id: String,
    pub recipient_user_id: String,
    pub recipient_address: Option<String>,
}

/// 徽章元数据与发放状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwardPayload {
    /// 链上代币 ID，链下徽章为空
    pub id: Option<i64>,
    pub to_address: Option<String>,
    pub status: AwardStatus,
    pub badge_type: BadgeType,
    pub name: String,
    pub image_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tx_hash: Option<String>,
}

impl NotificationEvent {
    pub fn badge_award_confirmation(record: &AwardRecord, badge: &BadgeDefinition) -> Self {
        Self {
            kind: BADGE_AWARD_CONFIRMATION.to_string(),
            meta: EventMeta {
                event_id: Uuid::now_v7(),
                recipient_wallet_id: record.wallet_id.clone(),
                recipient_user_id: record.user_id.clone(),
                recipient_address: record.to_address.clone(),
            },
            payload: AwardPayload {
                id: badge.on_chain_id,
                to_address: record.to_address.clone(),
                status: record.status,
                badge_type: badge.badge_type.clone(),
                name: badge.name.clone(),
                image_url: badge.image_url.clone(),
                tx_hash: record.tx_hash.clone(),
            },
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// 心跳消息：`{"type":"ping","meta":{},"payload":{}}`
pub fn ping_message() -> Value {
    json!({
        "type": PING,
        "meta": {},
        "payload": {},
    })
}
