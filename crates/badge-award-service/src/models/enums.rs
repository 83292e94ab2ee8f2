//! 发放服务的枚举与值类型
//!
//! 所有类型都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;

use serde::{Deserialize, Serialize};

/// 发放记录状态
///
/// 同时也是链上交易解析后的状态：无回执为 pending，成功回执为 confirmed，失败回执为 failed。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum AwardStatus {
    /// 链上交易已提交，等待确认
    #[default]
    Pending,
    /// 已确认（链下模式直接确认）
    Confirmed,
    /// 链上交易失败
    Failed,
}

impl AwardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for AwardStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 已知的徽章类型
pub mod badge_types {
    pub const WALLET_CREATED: &str = "wallet-created";
    pub const WALLET_IMPORTED: &str = "wallet-imported";
    pub const FIRST_CONNECTION_ESTABLISHED: &str = "first-connection-established";
    pub const FIRST_TRANSACTION_MADE: &str = "first-transaction-made";
    pub const FIRST_TRANSACTION_RECEIVED: &str = "first-transaction-received";
    pub const EMAIL_VERIFIED: &str = "email-verified";
    pub const PHONE_VERIFIED: &str = "phone-verified";
    pub const REFERRAL_REWARD_RECEIVED: &str = "referral-reward-received";
    pub const FIRST_REFERRAL_SENT: &str = "first-referral-sent";
    pub const FIVE_REFERRALS_SENT: &str = "five-referrals-sent";
    pub const TEN_REFERRALS_SENT: &str = "ten-referrals-sent";
    pub const TWENTYFIVE_REFERRALS_SENT: &str = "twentyfive-referrals-sent";
    pub const HUNDRED_REFERRALS_SENT: &str = "hundred-referrals-sent";
    pub const FIRST_AAVE_DEPOSIT: &str = "first-aave-deposit";
}

/// 徽章类型
///
/// 徽章定义的唯一键。运营可以随时新增类型，因此不使用封闭枚举。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct BadgeType(String);

impl BadgeType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BadgeType {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for BadgeType {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for BadgeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 触发发放的生命周期事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleTrigger {
    /// 注册并创建钱包
    UserRegistered,
    WalletImported,
    ConnectionEstablished,
    TransactionMade,
    TransactionReceived,
    EmailVerified,
    PhoneVerified,
    ReferralRewardReceived,
    FirstReferralSent,
    FiveReferralsSent,
    TenReferralsSent,
    TwentyFiveReferralsSent,
    HundredReferralsSent,
    FirstAaveDeposit,
}

impl LifecycleTrigger {
    /// 事件对应的徽章类型
    pub fn badge_type(&self) -> BadgeType {
        use badge_types::*;

        let value = match self {
            Self::UserRegistered => WALLET_CREATED,
            Self::WalletImported => WALLET_IMPORTED,
            Self::ConnectionEstablished => FIRST_CONNECTION_ESTABLISHED,
            Self::TransactionMade => FIRST_TRANSACTION_MADE,
            Self::TransactionReceived => FIRST_TRANSACTION_RECEIVED,
            Self::EmailVerified => EMAIL_VERIFIED,
            Self::PhoneVerified => PHONE_VERIFIED,
            Self::ReferralRewardReceived => REFERRAL_REWARD_RECEIVED,
            Self::FirstReferralSent => FIRST_REFERRAL_SENT,
            Self::FiveReferralsSent => FIVE_REFERRALS_SENT,
            Self::TenReferralsSent => TEN_REFERRALS_SENT,
            Self::TwentyFiveReferralsSent => TWENTYFIVE_REFERRALS_SENT,
            Self::HundredReferralsSent => HUNDRED_REFERRALS_SENT,
            Self::FirstAaveDeposit => FIRST_AAVE_DEPOSIT,
        };
        BadgeType::from(value)
    }
}
