//! 徽章铸造服务
//!
//! 先在链上铸造新代币，再以链上分配的 ID 写入徽章定义。

use std::sync::Arc;

use tracing::{error, info, instrument};

use crate::chain::TransactionGateway;
use crate::error::{AwardError, Result};
use crate::models::{BadgeDefinition, NewBadgeDefinition};
use crate::repository::BadgeRepositoryTrait;
use crate::service::dto::MintRequest;

/// 徽章铸造服务
///
/// 同一进程内的铸造串行执行；网关另外拒绝重叠或供应量未推进的铸造。
pub struct MintService<BR>
where
    BR: BadgeRepositoryTrait,
{
    badge_repo: Arc<BR>,
    gateway: Arc<TransactionGateway>,
    lock: tokio::sync::Mutex<()>,
}

impl<BR> MintService<BR>
where
    BR: BadgeRepositoryTrait,
{
    pub fn new(badge_repo: Arc<BR>, gateway: Arc<TransactionGateway>) -> Self {
        Self {
            badge_repo,
            gateway,
            lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 铸造并登记新徽章
    #[instrument(skip(self, request), fields(badge_type = %request.badge_type))]
    pub async fn mint_badge(&self, request: MintRequest) -> Result<BadgeDefinition> {
        let _guard = self.lock.lock().await;

        if self
            .badge_repo
            .find_badge_by_type(&request.badge_type)
            .await?
            .is_some()
        {
            return Err(AwardError::BadgeAlreadyExists(
                request.badge_type.to_string(),
            ));
        }

        let receipt = self
            .gateway
            .mint(request.initial_supply, request.transferable)
            .await?;

        let definition = NewBadgeDefinition {
            badge_type: request.badge_type,
            on_chain_id: Some(receipt.assigned_id),
            name: request.name,
            image_url: request.image_url,
        };

        match self.badge_repo.insert_badge(&definition).await {
            Ok(badge) => {
                info!(
                    on_chain_id = receipt.assigned_id,
                    tx_hash = %receipt.tx_hash,
                    "徽章铸造完成"
                );
                Ok(badge)
            }
            Err(e) => {
                error!(
                    alert = true,
                    on_chain_id = receipt.assigned_id,
                    tx_hash = %receipt.tx_hash,
                    error = %e,
                    "链上铸造已提交但徽章定义写入失败"
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockBadgeContract, TxHandle};
    use crate::models::BadgeType;
    use crate::repository::MockBadgeRepositoryTrait;
    use chrono::Utc;

    fn request(badge_type: &str) -> MintRequest {
        MintRequest {
            badge_type: BadgeType::from(badge_type),
            name: "Email Verified".to_string(),
            image_url: "https://img.example/email.png".to_string(),
            initial_supply: 1_000_000,
            transferable: false,
        }
    }

    #[tokio::test]
    async fn test_mint_persists_assigned_id() {
        let mut contract = MockBadgeContract::new();
        contract.expect_total_supply().returning(|| Ok(12));
        contract
            .expect_mint_token()
            .times(1)
            .returning(|_, _| {
                Ok(TxHandle {
                    hash: "0xmint".to_string(),
                })
            });

        let mut repo = MockBadgeRepositoryTrait::new();
        repo.expect_find_badge_by_type().returning(|_| Ok(None));
        repo.expect_insert_badge()
            .withf(|b| b.on_chain_id == Some(12))
            .returning(|b| {
                Ok(BadgeDefinition {
                    badge_type: b.badge_type.clone(),
                    on_chain_id: b.on_chain_id,
                    name: b.name.clone(),
                    image_url: b.image_url.clone(),
                    created_at: Utc::now(),
                })
            });

        let service = MintService::new(
            Arc::new(repo),
            Arc::new(TransactionGateway::new(Arc::new(contract))),
        );
        let badge = tokio_test::assert_ok!(service.mint_badge(request("email-verified")).await);
        assert_eq!(badge.on_chain_id, Some(12));
    }

    #[tokio::test]
    async fn test_mint_rejects_existing_badge() {
        let mut contract = MockBadgeContract::new();
        contract.expect_total_supply().times(0);

        let mut repo = MockBadgeRepositoryTrait::new();
        repo.expect_find_badge_by_type().returning(|t| {
            Ok(Some(BadgeDefinition {
                badge_type: t.clone(),
                on_chain_id: Some(1),
                name: "Existing".to_string(),
                image_url: String::new(),
                created_at: Utc::now(),
            }))
        });

        let service = MintService::new(
            Arc::new(repo),
            Arc::new(TransactionGateway::new(Arc::new(contract))),
        );
        let err = tokio_test::assert_err!(service.mint_badge(request("wallet-created")).await);
        assert!(matches!(err, AwardError::BadgeAlreadyExists(_)));
    }
}
