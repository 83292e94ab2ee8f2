//! 测试工具模块
//!
//! 提供内存版仓储、脚本化合约和可观察的通知渠道，
//! 用于在没有 PostgreSQL / 链节点 / Kafka / Redis 的环境下测试完整流程。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use badge_shared::error::BadgeError;
use badge_shared::pubsub::{Connector, TopicConnection};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::chain::{BadgeContract, TxHandle, TxReceipt};
use crate::error::{AwardError, GatewayError, Result};
use crate::models::{
    AwardRecord, AwardStatus, BadgeDefinition, BadgeType, NewAwardRecord, NewBadgeDefinition,
};
use crate::notification::NotificationSink;
use crate::repository::{AwardRepositoryTrait, BadgeRepositoryTrait};

// ==================== 内存仓储 ====================

/// 内存版徽章定义仓储
#[derive(Default)]
pub struct InMemoryBadgeRepository {
    badges: Mutex<HashMap<BadgeType, BadgeDefinition>>,
}

impl InMemoryBadgeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 直接登记一个徽章定义
    pub fn with_badge(self, badge_type: &str, on_chain_id: Option<i64>) -> Self {
        let badge_type = BadgeType::from(badge_type);
        self.badges.lock().insert(
            badge_type.clone(),
            BadgeDefinition {
                name: format!("Badge {badge_type}"),
                image_url: format!("https://img.example/{badge_type}.png"),
                badge_type,
                on_chain_id,
                created_at: Utc::now(),
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.badges.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.badges.lock().is_empty()
    }
}

#[async_trait]
impl BadgeRepositoryTrait for InMemoryBadgeRepository {
    async fn find_badge_by_type(&self, badge_type: &BadgeType) -> Result<Option<BadgeDefinition>> {
        Ok(self.badges.lock().get(badge_type).cloned())
    }

    async fn insert_badge(&self, badge: &NewBadgeDefinition) -> Result<BadgeDefinition> {
        let mut badges = self.badges.lock();
        if badges.contains_key(&badge.badge_type) {
            return Err(AwardError::BadgeAlreadyExists(badge.badge_type.to_string()));
        }

        let definition = BadgeDefinition {
            badge_type: badge.badge_type.clone(),
            on_chain_id: badge.on_chain_id,
            name: badge.name.clone(),
            image_url: badge.image_url.clone(),
            created_at: Utc::now(),
        };
        badges.insert(badge.badge_type.clone(), definition.clone());
        Ok(definition)
    }
}

/// 内存版发放记录仓储
///
/// 与数据库的部分唯一索引语义一致：同一 (wallet_id, badge_type) 至多一条非 failed 记录，
/// 检查与写入在同一把锁内完成。对账领取顺序用递增序号代替 `last_checked_at`。
#[derive(Default)]
pub struct InMemoryAwardRepository {
    records: Mutex<Vec<AwardRecord>>,
    last_checked: Mutex<HashMap<i64, u64>>,
    next_id: AtomicI64,
    check_seq: AtomicU64,
    fail_inserts: AtomicBool,
    fail_hash_attach: AtomicBool,
}

impl InMemoryAwardRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让后续写入全部失败（模拟数据库不可用）
    pub fn set_fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// 让后续补写交易哈希失败
    pub fn set_fail_hash_attach(&self, fail: bool) {
        self.fail_hash_attach.store(fail, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AwardRecord> {
        self.records.lock().clone()
    }

    /// 指定钱包和徽章类型的非 failed 记录数
    pub fn active_count(&self, wallet_id: &str, badge_type: &str) -> usize {
        self.records
            .lock()
            .iter()
            .filter(|r| {
                r.wallet_id == wallet_id
                    && r.badge_type.as_str() == badge_type
                    && r.status != AwardStatus::Failed
            })
            .count()
    }
}

#[async_trait]
impl AwardRepositoryTrait for InMemoryAwardRepository {
    async fn find_award(
        &self,
        wallet_id: &str,
        badge_type: &BadgeType,
    ) -> Result<Option<AwardRecord>> {
        // 让出调度，使并发调用能在读检查与写入之间交错
        tokio::task::yield_now().await;

        let records = self.records.lock();
        let mut matching = records
            .iter()
            .filter(|r| r.wallet_id == wallet_id && &r.badge_type == badge_type);

        let active = matching
            .clone()
            .find(|r| r.status != AwardStatus::Failed)
            .cloned();
        Ok(active.or_else(|| matching.next_back().cloned()))
    }

    async fn insert_award(&self, record: &NewAwardRecord) -> Result<AwardRecord> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(AwardError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut records = self.records.lock();
        let duplicate = records.iter().any(|r| {
            r.wallet_id == record.wallet_id
                && r.badge_type == record.badge_type
                && r.status != AwardStatus::Failed
        });
        if duplicate && record.status != AwardStatus::Failed {
            return Err(AwardError::DuplicateKey {
                wallet_id: record.wallet_id.clone(),
                badge_type: record.badge_type.to_string(),
            });
        }

        let now = Utc::now();
        let saved = AwardRecord {
            id: self.next_id.fetch_add(1, Ordering::SeqCst) + 1,
            wallet_id: record.wallet_id.clone(),
            user_id: record.user_id.clone(),
            badge_type: record.badge_type.clone(),
            status: record.status,
            tx_hash: record.tx_hash.clone(),
            to_address: record.to_address.clone(),
            created_at: now,
            updated_at: now,
        };
        records.push(saved.clone());
        Ok(saved)
    }

    async fn attach_tx_hash(&self, id: i64, tx_hash: &str) -> Result<bool> {
        if self.fail_hash_attach.load(Ordering::SeqCst) {
            return Err(AwardError::Database(sqlx::Error::PoolTimedOut));
        }

        let mut records = self.records.lock();
        match records
            .iter_mut()
            .find(|r| r.id == id && r.status == AwardStatus::Pending && r.tx_hash.is_none())
        {
            Some(record) => {
                record.tx_hash = Some(tx_hash.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn release_reservation(&self, id: i64) -> Result<bool> {
        let mut records = self.records.lock();
        let before = records.len();
        records.retain(|r| {
            !(r.id == id && r.status == AwardStatus::Pending && r.tx_hash.is_none())
        });
        Ok(records.len() < before)
    }

    async fn update_award_status(
        &self,
        id: i64,
        from: AwardStatus,
        to: AwardStatus,
    ) -> Result<bool> {
        let mut records = self.records.lock();
        match records.iter_mut().find(|r| r.id == id && r.status == from) {
            Some(record) => {
                record.status = to;
                record.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<AwardRecord>> {
        let records = self.records.lock();
        let mut last_checked = self.last_checked.lock();

        let mut pending: Vec<_> = records
            .iter()
            .filter(|r| r.status == AwardStatus::Pending && r.tx_hash.is_some())
            .collect();
        // None 排在 Some 之前，与 NULLS FIRST 一致
        pending.sort_by_key(|r| (last_checked.get(&r.id).copied(), r.created_at, r.id));
        pending.truncate(usize::try_from(limit).unwrap_or(0));

        let mut batch: Vec<AwardRecord> = pending.into_iter().cloned().collect();
        for record in &batch {
            let seq = self.check_seq.fetch_add(1, Ordering::SeqCst) + 1;
            last_checked.insert(record.id, seq);
        }
        batch.sort_by_key(|r| (r.created_at, r.id));
        Ok(batch)
    }

    async fn count_stale_reservations(&self, before: DateTime<Utc>) -> Result<i64> {
        let count = self
            .records
            .lock()
            .iter()
            .filter(|r| {
                r.status == AwardStatus::Pending && r.tx_hash.is_none() && r.created_at < before
            })
            .count();
        Ok(i64::try_from(count).unwrap_or(i64::MAX))
    }
}

// ==================== 脚本化合约 ====================

/// 按哈希脚本化回执的合约
///
/// - `0xpending`：无回执
/// - `0xfailed`：回执不带成功标记
/// - `0xerror`：查询出错
/// - 其余哈希：成功回执
pub struct ScriptedContract {
    supply: AtomicI64,
    advance_supply_on_mint: AtomicBool,
    fail_submissions: AtomicBool,
    next_hash: AtomicU32,
    awards: Mutex<Vec<(i64, String, u64)>>,
    next_award_hash: Mutex<Option<String>>,
}

impl Default for ScriptedContract {
    fn default() -> Self {
        Self {
            supply: AtomicI64::new(1),
            advance_supply_on_mint: AtomicBool::new(true),
            fail_submissions: AtomicBool::new(false),
            next_hash: AtomicU32::new(0),
            awards: Mutex::new(Vec::new()),
            next_award_hash: Mutex::new(None),
        }
    }
}

impl ScriptedContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_supply(self, supply: i64) -> Self {
        self.supply.store(supply, Ordering::SeqCst);
        self
    }

    /// 铸造后是否推进总供应量（关闭即模拟铸造尚未上链）
    pub fn set_advance_supply_on_mint(&self, advance: bool) {
        self.advance_supply_on_mint.store(advance, Ordering::SeqCst);
    }

    /// 让后续写入交易全部失败
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// 指定下一次发放交易返回的哈希
    pub fn set_next_award_hash(&self, hash: &str) {
        *self.next_award_hash.lock() = Some(hash.to_string());
    }

    /// 已提交的发放：(token_id, to, amount)
    pub fn awards(&self) -> Vec<(i64, String, u64)> {
        self.awards.lock().clone()
    }

    fn submission(&self, prefix: &str) -> std::result::Result<TxHandle, GatewayError> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(GatewayError::MissingSigner);
        }
        let n = self.next_hash.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(TxHandle {
            hash: format!("0x{prefix}-{n}"),
        })
    }
}

#[async_trait]
impl BadgeContract for ScriptedContract {
    async fn award_token(
        &self,
        token_id: i64,
        to: &str,
        amount: u64,
    ) -> std::result::Result<TxHandle, GatewayError> {
        let mut handle = self.submission("award")?;
        if let Some(hash) = self.next_award_hash.lock().take() {
            handle.hash = hash;
        }
        self.awards.lock().push((token_id, to.to_string(), amount));
        Ok(handle)
    }

    async fn batch_award_token(
        &self,
        token_id: i64,
        recipients: &[String],
        amount: u64,
    ) -> std::result::Result<TxHandle, GatewayError> {
        let handle = self.submission("batch")?;
        let mut awards = self.awards.lock();
        for to in recipients {
            awards.push((token_id, to.clone(), amount));
        }
        Ok(handle)
    }

    async fn mint_token(
        &self,
        _initial_supply: u64,
        _transferable: bool,
    ) -> std::result::Result<TxHandle, GatewayError> {
        let handle = self.submission("mint")?;
        if self.advance_supply_on_mint.load(Ordering::SeqCst) {
            self.supply.fetch_add(1, Ordering::SeqCst);
        }
        Ok(handle)
    }

    async fn total_supply(&self) -> std::result::Result<i64, GatewayError> {
        Ok(self.supply.load(Ordering::SeqCst))
    }

    async fn transaction_receipt(
        &self,
        tx_hash: &str,
    ) -> std::result::Result<Option<TxReceipt>, GatewayError> {
        match tx_hash {
            "0xpending" => Ok(None),
            "0xfailed" => Ok(Some(TxReceipt {
                hash: tx_hash.to_string(),
                status: None,
            })),
            "0xerror" => Err(GatewayError::Network("connection refused".to_string())),
            _ => Ok(Some(TxReceipt {
                hash: tx_hash.to_string(),
                status: Some(true),
            })),
        }
    }
}

// ==================== 通知渠道 ====================

/// 记录所有消息的渠道
pub struct RecordingSink {
    name: &'static str,
    messages: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            messages: Mutex::new(Vec::new()),
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, payload: &str) -> Result<()> {
        self.messages.lock().push(payload.to_string());
        Ok(())
    }
}

/// 前 N 次发送失败的渠道
pub struct FailingSink {
    name: &'static str,
    failures_remaining: AtomicU32,
    attempts: AtomicU32,
}

impl FailingSink {
    pub fn new(name: &'static str, failures: u32) -> Self {
        Self {
            name,
            failures_remaining: AtomicU32::new(failures),
            attempts: AtomicU32::new(0),
        }
    }

    /// 永远失败
    pub fn always(name: &'static str) -> Self {
        Self::new(name, u32::MAX)
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NotificationSink for FailingSink {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn send(&self, _payload: &str) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            return Err(AwardError::Shared(BadgeError::ExternalService {
                service: self.name.to_string(),
                message: "不可用".to_string(),
            }));
        }
        Ok(())
    }
}

// ==================== 内存发布订阅 ====================

/// 内存版发布订阅连接工厂
///
/// 前 `fail_connects` 次连接失败，之后所有连接共享同一个消息列表。
#[derive(Default)]
pub struct InMemoryConnector {
    fail_connects: AtomicU32,
    connects: AtomicU32,
    drop_next_publish: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, String)>>>,
}

impl InMemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_first(attempts: u32) -> Self {
        let connector = Self::default();
        connector.fail_connects.store(attempts, Ordering::SeqCst);
        connector
    }

    /// 下一次发布返回错误，模拟连接中断
    pub fn break_next_publish(&self) {
        self.drop_next_publish.store(true, Ordering::SeqCst);
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    /// 已发布的 (channel, payload)
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

struct InMemoryConnection {
    drop_next_publish: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl TopicConnection for InMemoryConnection {
    async fn publish(&self, channel: &str, payload: &str) -> badge_shared::error::Result<()> {
        if self.drop_next_publish.swap(false, Ordering::SeqCst) {
            return Err(BadgeError::ExternalService {
                service: "pubsub".to_string(),
                message: "connection reset".to_string(),
            });
        }
        self.published
            .lock()
            .push((channel.to_string(), payload.to_string()));
        Ok(())
    }
}

#[async_trait]
impl Connector for InMemoryConnector {
    async fn connect(&self) -> badge_shared::error::Result<Arc<dyn TopicConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_connects.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_connects.store(remaining - 1, Ordering::SeqCst);
            return Err(BadgeError::ExternalService {
                service: "pubsub".to_string(),
                message: "connection refused".to_string(),
            });
        }
        Ok(Arc::new(InMemoryConnection {
            drop_next_publish: self.drop_next_publish.clone(),
            published: self.published.clone(),
        }))
    }
}
