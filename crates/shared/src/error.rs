//! 统一错误处理模块
//!
//! 定义基础设施层共享的错误类型，使用 thiserror 提供良好的错误信息。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum BadgeError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    // ==================== Redis / 发布订阅错误 ====================
    #[error("Redis 错误: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("连接不可用: {name} - {reason}")]
    ConnectionUnavailable { name: String, reason: String },

    #[error("连接已关闭: {name}")]
    ConnectionClosed { name: String },

    // ==================== Kafka 错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    // ==================== 序列化错误 ====================
    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 配置与验证错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("缺少必填配置: {section}.{field}")]
    MissingField { section: String, field: String },

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("外部服务超时: {service}")]
    ExternalServiceTimeout { service: String },

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, BadgeError>;

impl BadgeError {
    /// 构造缺少必填配置项的错误
    pub fn missing(section: &str, field: &str) -> Self {
        Self::MissingField {
            section: section.to_string(),
            field: field.to_string(),
        }
    }

    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::ConnectionUnavailable { .. } => "CONNECTION_UNAVAILABLE",
            Self::ConnectionClosed { .. } => "CONNECTION_CLOSED",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::MissingField { .. } => "MISSING_FIELD",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::ExternalServiceTimeout { .. } => "EXTERNAL_SERVICE_TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为可重试错误
    ///
    /// 连接关闭属于终态，重试没有意义。
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Redis(_)
                | Self::Kafka(_)
                | Self::ConnectionUnavailable { .. }
                | Self::ExternalServiceTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = BadgeError::missing("chain", "contract_address");
        assert_eq!(err.code(), "MISSING_FIELD");
        assert!(err.to_string().contains("chain.contract_address"));
    }

    #[test]
    fn test_is_retryable() {
        let db_err = BadgeError::Database(sqlx::Error::PoolTimedOut);
        assert!(db_err.is_retryable());

        let unavailable = BadgeError::ConnectionUnavailable {
            name: "topic".to_string(),
            reason: "reconnecting".to_string(),
        };
        assert!(unavailable.is_retryable());

        let closed = BadgeError::ConnectionClosed {
            name: "topic".to_string(),
        };
        assert!(!closed.is_retryable());
        assert!(!BadgeError::Validation("bad".to_string()).is_retryable());
    }
}
