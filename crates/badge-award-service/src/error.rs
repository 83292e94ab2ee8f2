//! 发放服务错误类型
//!
//! 业务层面的结果（已发放、徽章不存在等）通过 `AwardOutcome` 返回，
//! 这里只描述仓储、链上网关和基础设施层面的失败。

use thiserror::Error;

/// 链上网关错误
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("缺少签名凭证，无法提交交易")]
    MissingSigner,

    #[error("链上网络错误: {0}")]
    Network(String),

    #[error("链上请求超时")]
    Timeout,

    #[error("RPC 错误: code={code}, message={message}")]
    Rpc { code: i64, message: String },

    #[error("RPC 响应无效: {0}")]
    InvalidResponse(String),

    #[error("铸造冲突: 当前供应量 {supply} 未超过上次分配的 ID {last_assigned}")]
    MintCollision { supply: i64, last_assigned: i64 },

    #[error("已有铸造操作在进行中")]
    MintInProgress,
}

impl GatewayError {
    /// 网络抖动类错误可重试；签名、RPC 拒绝与铸造冲突不可重试
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::MissingSigner => "MISSING_SIGNER",
            Self::Network(_) => "CHAIN_NETWORK_ERROR",
            Self::Timeout => "CHAIN_TIMEOUT",
            Self::Rpc { .. } => "CHAIN_RPC_ERROR",
            Self::InvalidResponse(_) => "CHAIN_INVALID_RESPONSE",
            Self::MintCollision { .. } => "MINT_COLLISION",
            Self::MintInProgress => "MINT_IN_PROGRESS",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// 发放服务错误类型
#[derive(Debug, Error)]
pub enum AwardError {
    // === 仓储错误 ===
    #[error("发放记录已存在: wallet_id={wallet_id}, badge_type={badge_type}")]
    DuplicateKey {
        wallet_id: String,
        badge_type: String,
    },

    #[error("徽章定义已存在: {0}")]
    BadgeAlreadyExists(String),

    #[error("发放记录不存在: {0}")]
    AwardNotFound(i64),

    // === 链上错误 ===
    #[error("链上网关错误: {0}")]
    Gateway(#[from] GatewayError),

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Shared(#[from] badge_shared::error::BadgeError),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 发放服务 Result 类型别名
pub type Result<T> = std::result::Result<T, AwardError>;

impl AwardError {
    /// 检查是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(_) => true,
            Self::Shared(e) => e.is_retryable(),
            Self::Gateway(e) => e.is_retryable(),
            _ => false,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. } | Self::BadgeAlreadyExists(_))
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::DuplicateKey { .. } => "DUPLICATE_AWARD",
            Self::BadgeAlreadyExists(_) => "BADGE_ALREADY_EXISTS",
            Self::AwardNotFound(_) => "AWARD_NOT_FOUND",
            Self::Gateway(e) => e.error_code(),
            Self::Database(_) => "DATABASE_ERROR",
            Self::Shared(e) => e.code(),
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use badge_shared::error::BadgeError;

    #[test]
    fn test_error_is_retryable() {
        assert!(AwardError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(AwardError::Gateway(GatewayError::Timeout).is_retryable());
        assert!(
            AwardError::Shared(BadgeError::Kafka("broker down".to_string())).is_retryable()
        );
        assert!(!AwardError::Gateway(GatewayError::MissingSigner).is_retryable());
        assert!(
            !AwardError::DuplicateKey {
                wallet_id: "w1".to_string(),
                badge_type: "wallet-created".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_code() {
        assert_eq!(
            AwardError::Gateway(GatewayError::MintCollision {
                supply: 3,
                last_assigned: 3
            })
            .error_code(),
            "MINT_COLLISION"
        );
        assert_eq!(
            AwardError::Shared(BadgeError::Validation("x".to_string())).error_code(),
            "VALIDATION_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = AwardError::DuplicateKey {
            wallet_id: "wallet-9".to_string(),
            badge_type: "wallet-imported".to_string(),
        };
        assert!(err.to_string().contains("wallet-9"));
        assert!(err.to_string().contains("wallet-imported"));
        assert!(err.is_duplicate());
    }
}
