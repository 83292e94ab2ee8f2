//! 徽章合约客户端
//!
//! `BadgeContract` 抽象出合约对外暴露的全部调用。生产实现通过 JSON-RPC 访问节点：
//! 只读调用（回执、totalSupply）直接发往节点，写入调用交给持有签名凭证的中继。

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use badge_shared::config::ChainConfig;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, instrument};

use crate::error::{AwardError, GatewayError};

/// `totalSupply()` 的函数选择器
const TOTAL_SUPPLY_SELECTOR: &str = "0x18160ddd";

/// 已提交交易的句柄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxHandle {
    pub hash: String,
}

/// 交易回执
///
/// `status` 为空表示节点未给出成功标记，按失败处理。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub hash: String,
    pub status: Option<bool>,
}

/// 徽章合约接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BadgeContract: Send + Sync {
    async fn award_token(
        &self,
        token_id: i64,
        to: &str,
        amount: u64,
    ) -> Result<TxHandle, GatewayError>;

    async fn batch_award_token(
        &self,
        token_id: i64,
        recipients: &[String],
        amount: u64,
    ) -> Result<TxHandle, GatewayError>;

    async fn mint_token(
        &self,
        initial_supply: u64,
        transferable: bool,
    ) -> Result<TxHandle, GatewayError>;

    async fn total_supply(&self) -> Result<i64, GatewayError>;

    /// 无回执（交易未上链）时返回 `None`
    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, GatewayError>;
}

// ---------------------------------------------------------------------------
// JSON-RPC 实现
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawReceipt {
    transaction_hash: String,
    status: Option<String>,
}

/// 基于 JSON-RPC 的合约客户端
pub struct JsonRpcBadgeContract {
    http: reqwest::Client,
    rpc_url: String,
    relayer_url: String,
    contract_address: String,
    signing_key: Option<String>,
    next_id: AtomicU64,
}

impl JsonRpcBadgeContract {
    pub fn new(config: &ChainConfig) -> Result<Self, AwardError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AwardError::Config(format!("创建 HTTP 客户端失败: {e}")))?;

        Ok(Self {
            http,
            rpc_url: config.endpoint()?,
            relayer_url: config.relayer_endpoint()?,
            contract_address: config.contract_address.clone(),
            signing_key: config.signing_key.clone().filter(|k| !k.trim().is_empty()),
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
        bearer: Option<&str>,
    ) -> Result<Option<T>, GatewayError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        let mut request = self.http.post(url).json(&body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response: RpcResponse<T> = request.send().await?.error_for_status()?.json().await?;

        if let Some(err) = response.error {
            return Err(GatewayError::Rpc {
                code: err.code,
                message: err.message,
            });
        }
        debug!(method, "RPC 调用完成");
        Ok(response.result)
    }

    /// 经签名中继提交一次合约写入
    async fn send_transaction(&self, function: &str, args: Value) -> Result<TxHandle, GatewayError> {
        let signer = self
            .signing_key
            .as_deref()
            .ok_or(GatewayError::MissingSigner)?;

        let params = json!([{
            "to": self.contract_address,
            "function": function,
            "args": args,
        }]);

        let hash: String = self
            .call(&self.relayer_url, "relay_sendTransaction", params, Some(signer))
            .await?
            .ok_or_else(|| GatewayError::InvalidResponse("中继未返回交易哈希".to_string()))?;

        Ok(TxHandle { hash })
    }
}

#[async_trait]
impl BadgeContract for JsonRpcBadgeContract {
    #[instrument(skip(self))]
    async fn award_token(
        &self,
        token_id: i64,
        to: &str,
        amount: u64,
    ) -> Result<TxHandle, GatewayError> {
        self.send_transaction("awardToken", json!([token_id, to, amount]))
            .await
    }

    #[instrument(skip(self, recipients), fields(recipients = recipients.len()))]
    async fn batch_award_token(
        &self,
        token_id: i64,
        recipients: &[String],
        amount: u64,
    ) -> Result<TxHandle, GatewayError> {
        self.send_transaction("batchAwardToken", json!([token_id, recipients, amount]))
            .await
    }

    #[instrument(skip(self))]
    async fn mint_token(
        &self,
        initial_supply: u64,
        transferable: bool,
    ) -> Result<TxHandle, GatewayError> {
        self.send_transaction("mintToken", json!([initial_supply, transferable]))
            .await
    }

    async fn total_supply(&self) -> Result<i64, GatewayError> {
        let params = json!([{ "to": self.contract_address, "data": TOTAL_SUPPLY_SELECTOR }, "latest"]);
        let raw: String = self
            .call(&self.rpc_url, "eth_call", params, None)
            .await?
            .ok_or_else(|| GatewayError::InvalidResponse("eth_call 返回空结果".to_string()))?;

        let supply = parse_quantity(&raw)?;
        i64::try_from(supply)
            .map_err(|_| GatewayError::InvalidResponse(format!("供应量超出范围: {raw}")))
    }

    async fn transaction_receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>, GatewayError> {
        let raw: Option<RawReceipt> = self
            .call(&self.rpc_url, "eth_getTransactionReceipt", json!([tx_hash]), None)
            .await?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let status = match raw.status.as_deref() {
            Some(value) => Some(parse_quantity(value)? == 1),
            None => None,
        };

        Ok(Some(TxReceipt {
            hash: raw.transaction_hash,
            status,
        }))
    }
}

/// 解析十六进制数量（如 `0x1a`），支持 32 字节的 ABI 返回值
pub(crate) fn parse_quantity(raw: &str) -> Result<u64, GatewayError> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| GatewayError::InvalidResponse(format!("缺少 0x 前缀: {raw}")))?;
    let significant = digits.trim_start_matches('0');

    if significant.is_empty() {
        return Ok(0);
    }
    if significant.len() > 16 {
        return Err(GatewayError::InvalidResponse(format!("数值溢出: {raw}")));
    }

    u64::from_str_radix(significant, 16)
        .map_err(|e| GatewayError::InvalidResponse(format!("非法十六进制 {raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_quantity() {
        assert_eq!(parse_quantity("0x0").unwrap(), 0);
        assert_eq!(parse_quantity("0x1").unwrap(), 1);
        assert_eq!(
            parse_quantity("0x000000000000000000000000000000000000000000000000000000000000002a")
                .unwrap(),
            42
        );
        assert!(parse_quantity("1a").is_err());
        assert!(parse_quantity("0xzz").is_err());
        assert!(parse_quantity("0x1ffffffffffffffffff").is_err());
    }

    #[test]
    fn test_new_requires_rpc_url_off_local() {
        let config = ChainConfig {
            network: "mainnet".to_string(),
            contract_address: "0xbadge".to_string(),
            ..Default::default()
        };
        assert!(JsonRpcBadgeContract::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_write_without_signer_fails_fast() {
        let config = ChainConfig {
            contract_address: "0xbadge".to_string(),
            signing_key: Some("  ".to_string()),
            ..Default::default()
        };
        let contract = JsonRpcBadgeContract::new(&config).unwrap();

        // 未配置签名凭证时不会发出网络请求
        let err = contract.award_token(1, "0xabc", 1).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingSigner));
    }

    #[test]
    fn test_rpc_response_shapes() {
        let ok: RpcResponse<RawReceipt> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":1,"result":{"transactionHash":"0xabc","status":"0x1"}}"#,
        )
        .unwrap();
        let receipt = ok.result.unwrap();
        assert_eq!(receipt.transaction_hash, "0xabc");
        assert_eq!(receipt.status.as_deref(), Some("0x1"));

        let pending: RpcResponse<RawReceipt> =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":2,"result":null}"#).unwrap();
        assert!(pending.result.is_none());

        let failed: RpcResponse<String> = serde_json::from_str(
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"nonce too low"}}"#,
        )
        .unwrap();
        assert_eq!(failed.error.unwrap().code, -32000);
    }
}
