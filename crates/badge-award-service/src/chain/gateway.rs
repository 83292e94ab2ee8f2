//! 链上交易网关
//!
//! 在合约客户端之上提供三类能力：
//! - `submit`：提交交易后立即返回哈希，不等待确认
//! - `check_status`：把回执映射为 pending / confirmed / failed，查询出错时按 pending 处理
//! - `mint`：读取当前总供应量作为新徽章 ID 后提交铸造，并拒绝并发或重复的 ID

use std::sync::Arc;

use badge_shared::observability::metrics;
use tracing::{info, instrument, warn};

use super::client::{BadgeContract, TxHandle};
use crate::error::GatewayError;
use crate::models::AwardStatus;

/// 发放类链上操作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainOperation {
    Award {
        token_id: i64,
        to: String,
        amount: u64,
    },
    BatchAward {
        token_id: i64,
        recipients: Vec<String>,
        amount: u64,
    },
}

impl ChainOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Award { .. } => "award_token",
            Self::BatchAward { .. } => "batch_award_token",
        }
    }
}

/// 铸造结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub tx_hash: String,
    pub assigned_id: i64,
}

/// 链上交易网关
pub struct TransactionGateway {
    contract: Arc<dyn BadgeContract>,
    mint_lock: tokio::sync::Mutex<()>,
    last_assigned: parking_lot::Mutex<Option<i64>>,
}

impl TransactionGateway {
    pub fn new(contract: Arc<dyn BadgeContract>) -> Self {
        Self {
            contract,
            mint_lock: tokio::sync::Mutex::new(()),
            last_assigned: parking_lot::Mutex::new(None),
        }
    }

    /// 提交链上操作
    #[instrument(skip(self), fields(operation = operation.name()))]
    pub async fn submit(&self, operation: ChainOperation) -> Result<TxHandle, GatewayError> {
        let result = match &operation {
            ChainOperation::Award {
                token_id,
                to,
                amount,
            } => self.contract.award_token(*token_id, to, *amount).await,
            ChainOperation::BatchAward {
                token_id,
                recipients,
                amount,
            } => {
                self.contract
                    .batch_award_token(*token_id, recipients, *amount)
                    .await
            }
        };

        metrics::record_chain_submission(operation.name(), result.is_ok());
        match &result {
            Ok(handle) => info!(tx_hash = %handle.hash, "链上交易已提交"),
            Err(e) => warn!(error = %e, "链上交易提交失败"),
        }
        result
    }

    /// 发放单个徽章
    pub async fn award_token(
        &self,
        token_id: i64,
        to: &str,
        amount: u64,
    ) -> Result<TxHandle, GatewayError> {
        self.submit(ChainOperation::Award {
            token_id,
            to: to.to_string(),
            amount,
        })
        .await
    }

    /// 查询交易状态
    ///
    /// 无回执为 pending；回执带成功标记为 confirmed，否则为 failed。
    /// 查询本身出错时返回 pending，由调用方稍后再查。
    pub async fn check_status(&self, tx_hash: &str) -> AwardStatus {
        let status = match self.contract.transaction_receipt(tx_hash).await {
            Ok(None) => AwardStatus::Pending,
            Ok(Some(receipt)) if receipt.status == Some(true) => AwardStatus::Confirmed,
            Ok(Some(_)) => AwardStatus::Failed,
            Err(e) => {
                warn!(tx_hash, error = %e, "查询交易回执失败，按 pending 处理");
                AwardStatus::Pending
            }
        };

        metrics::record_status_check(status.as_str());
        status
    }

    /// 铸造新徽章
    ///
    /// 以当前总供应量作为新 ID。同一时刻只允许一个铸造；
    /// 若读到的供应量没有超过上次分配的 ID，说明上一次铸造尚未生效，返回 `MintCollision`。
    #[instrument(skip(self))]
    pub async fn mint(
        &self,
        initial_supply: u64,
        transferable: bool,
    ) -> Result<MintReceipt, GatewayError> {
        let _guard = self
            .mint_lock
            .try_lock()
            .map_err(|_| GatewayError::MintInProgress)?;

        let supply = self.contract.total_supply().await?;
        if let Some(last_assigned) = *self.last_assigned.lock()
            && supply <= last_assigned
        {
            warn!(supply, last_assigned, "铸造冲突");
            return Err(GatewayError::MintCollision {
                supply,
                last_assigned,
            });
        }

        let handle = self.contract.mint_token(initial_supply, transferable).await;
        metrics::record_chain_submission("mint_token", handle.is_ok());
        let handle = handle?;

        *self.last_assigned.lock() = Some(supply);
        info!(assigned_id = supply, tx_hash = %handle.hash, "铸造交易已提交");

        Ok(MintReceipt {
            tx_hash: handle.hash,
            assigned_id: supply,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::client::{MockBadgeContract, TxReceipt};
    use mockall::predicate::eq;

    fn receipt(hash: &str, status: Option<bool>) -> TxReceipt {
        TxReceipt {
            hash: hash.to_string(),
            status,
        }
    }

    #[tokio::test]
    async fn test_check_status_mapping() {
        let mut contract = MockBadgeContract::new();
        contract
            .expect_transaction_receipt()
            .with(eq("0xpending"))
            .returning(|_| Ok(None));
        contract
            .expect_transaction_receipt()
            .with(eq("0xfailed"))
            .returning(|h| Ok(Some(receipt(h, None))));
        contract
            .expect_transaction_receipt()
            .with(eq("0xreverted"))
            .returning(|h| Ok(Some(receipt(h, Some(false)))));
        contract
            .expect_transaction_receipt()
            .with(eq("0xconfirmed-hash"))
            .returning(|h| Ok(Some(receipt(h, Some(true)))));
        contract
            .expect_transaction_receipt()
            .with(eq("0xflaky"))
            .returning(|_| Err(GatewayError::Network("connection reset".to_string())));

        let gateway = TransactionGateway::new(Arc::new(contract));

        assert_eq!(gateway.check_status("0xpending").await, AwardStatus::Pending);
        assert_eq!(gateway.check_status("0xfailed").await, AwardStatus::Failed);
        assert_eq!(gateway.check_status("0xreverted").await, AwardStatus::Failed);
        assert_eq!(
            gateway.check_status("0xconfirmed-hash").await,
            AwardStatus::Confirmed
        );
        assert_eq!(gateway.check_status("0xflaky").await, AwardStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_award_passes_arguments() {
        let mut contract = MockBadgeContract::new();
        contract
            .expect_award_token()
            .with(eq(7), eq("0xrecipient"), eq(1))
            .times(1)
            .returning(|_, _, _| {
                Ok(TxHandle {
                    hash: "0xaward".to_string(),
                })
            });

        let gateway = TransactionGateway::new(Arc::new(contract));
        let handle = gateway.award_token(7, "0xrecipient", 1).await.unwrap();
        assert_eq!(handle.hash, "0xaward");
    }

    #[tokio::test]
    async fn test_submit_surfaces_missing_signer() {
        let mut contract = MockBadgeContract::new();
        contract
            .expect_batch_award_token()
            .returning(|_, _, _| Err(GatewayError::MissingSigner));

        let gateway = TransactionGateway::new(Arc::new(contract));
        let err = gateway
            .submit(ChainOperation::BatchAward {
                token_id: 1,
                recipients: vec!["0xa".to_string(), "0xb".to_string()],
                amount: 1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::MissingSigner));
    }

    #[tokio::test]
    async fn test_mint_rejects_stale_supply() {
        let mut contract = MockBadgeContract::new();
        // 上一次铸造未生效，供应量没有变化
        contract.expect_total_supply().returning(|| Ok(4));
        contract
            .expect_mint_token()
            .times(1)
            .returning(|_, _| {
                Ok(TxHandle {
                    hash: "0xmint".to_string(),
                })
            });

        let gateway = TransactionGateway::new(Arc::new(contract));
        let first = gateway.mint(1000, false).await.unwrap();
        assert_eq!(first.assigned_id, 4);

        let err = gateway.mint(1000, false).await.unwrap_err();
        assert!(matches!(
            err,
            GatewayError::MintCollision {
                supply: 4,
                last_assigned: 4
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_mint_does_not_reserve_id() {
        let mut contract = MockBadgeContract::new();
        contract.expect_total_supply().returning(|| Ok(2));
        let mut calls = 0;
        contract.expect_mint_token().returning(move |_, _| {
            calls += 1;
            if calls == 1 {
                Err(GatewayError::Timeout)
            } else {
                Ok(TxHandle {
                    hash: "0xmint-2".to_string(),
                })
            }
        });

        let gateway = TransactionGateway::new(Arc::new(contract));
        assert!(gateway.mint(10, true).await.is_err());
        let receipt = gateway.mint(10, true).await.unwrap();
        assert_eq!(receipt.assigned_id, 2);
    }
}
