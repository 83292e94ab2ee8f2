//! 服务层数据传输对象

use std::time::Duration;

use badge_shared::config::{AwardConfig, AwardMode};
use badge_shared::retry::RetryPolicy;

use crate::models::{AwardRecord, BadgeType};

/// 发放结果
///
/// 调用方只会拿到结构化结果，不会拿到底层异常。
#[derive(Debug, Clone, PartialEq)]
pub enum AwardOutcome {
    /// 链下发放，记录已确认
    Confirmed(AwardRecord),
    /// 链上交易已提交，记录为 pending
    Pending(AwardRecord),
    /// 已持有该徽章
    AlreadyAwarded(AwardRecord),
    /// 上一次链上交易尚未确认
    AlreadyPending(AwardRecord),
    /// 上一次发放失败，且配置不允许再次发放
    PreviouslyFailed(AwardRecord),
    /// 徽章类型尚未定义，静默跳过
    NoSuchBadge,
    /// 链上提交失败，预留记录已释放，可整体重试
    SubmissionFailed { reason: String },
    /// 仓储读写失败
    ///
    /// `tx_hash` 非空表示链上已提交而本地记录没有哈希，需要人工对账。
    PersistenceFailed {
        reason: String,
        tx_hash: Option<String>,
    },
}

impl AwardOutcome {
    /// 指标与日志使用的标签
    pub fn label(&self) -> &'static str {
        match self {
            Self::Confirmed(_) => "confirmed",
            Self::Pending(_) => "pending",
            Self::AlreadyAwarded(_) => "already_awarded",
            Self::AlreadyPending(_) => "already_pending",
            Self::PreviouslyFailed(_) => "previously_failed",
            Self::NoSuchBadge => "no_such_badge",
            Self::SubmissionFailed { .. } => "submission_failed",
            Self::PersistenceFailed { .. } => "persistence_failed",
        }
    }

    pub fn record(&self) -> Option<&AwardRecord> {
        match self {
            Self::Confirmed(r)
            | Self::Pending(r)
            | Self::AlreadyAwarded(r)
            | Self::AlreadyPending(r)
            | Self::PreviouslyFailed(r) => Some(r),
            _ => None,
        }
    }

    /// 本次调用是否新建了记录
    pub fn is_new_award(&self) -> bool {
        matches!(self, Self::Confirmed(_) | Self::Pending(_))
    }

    /// 是否处于链上已提交、本地未落库的不一致状态
    pub fn is_inconsistent(&self) -> bool {
        matches!(
            self,
            Self::PersistenceFailed {
                tx_hash: Some(_),
                ..
            }
        )
    }
}

/// 发放引擎参数
#[derive(Debug, Clone)]
pub struct AwardSettings {
    pub mode: AwardMode,
    pub retry_failed: bool,
    /// 仓储读操作的重试策略
    pub read_retry: RetryPolicy,
    /// 预留记录超过该时长仍无交易哈希即告警
    pub reservation_timeout: Duration,
}

impl Default for AwardSettings {
    fn default() -> Self {
        Self {
            mode: AwardMode::OffChain,
            retry_failed: false,
            read_retry: RetryPolicy {
                max_retries: 2,
                initial_delay: Duration::from_millis(50),
                max_delay: Duration::from_millis(500),
                multiplier: 2.0,
            },
            reservation_timeout: Duration::from_secs(600),
        }
    }
}

impl From<&AwardConfig> for AwardSettings {
    fn from(config: &AwardConfig) -> Self {
        Self {
            mode: config.mode,
            retry_failed: config.retry_failed,
            reservation_timeout: Duration::from_secs(config.reservation_timeout_secs),
            ..Self::default()
        }
    }
}

/// 对账结果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    pub checked: usize,
    /// 本次由 pending 转为 confirmed 的记录（已更新为新状态）
    pub confirmed: Vec<AwardRecord>,
    pub failed: usize,
    pub still_pending: usize,
    pub errors: usize,
    /// 超时仍未补写交易哈希的预留记录数
    pub stale_reservations: i64,
}

/// 铸造请求
#[derive(Debug, Clone, PartialEq)]
pub struct MintRequest {
    pub badge_type: BadgeType,
    pub name: String,
    pub image_url: String,
    pub initial_supply: u64,
    pub transferable: bool,
}
