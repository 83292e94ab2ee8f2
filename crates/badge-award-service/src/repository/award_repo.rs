//! 发放记录仓储
//!
//! 唯一性依赖 `uq_badge_awards_wallet_type_active` 部分唯一索引，
//! 多实例并发写入时由数据库裁决，不依赖进程内锁。
//! 链上发放先写入无哈希的预留记录，提交成功后再补写哈希。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use super::traits::AwardRepositoryTrait;
use crate::error::{AwardError, Result};
use crate::models::{AwardRecord, AwardStatus, BadgeType, NewAwardRecord};

/// 发放记录仓储（PostgreSQL）
pub struct AwardRepository {
    pool: PgPool,
}

impl AwardRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AwardRepositoryTrait for AwardRepository {
    async fn find_award(
        &self,
        wallet_id: &str,
        badge_type: &BadgeType,
    ) -> Result<Option<AwardRecord>> {
        let record = sqlx::query_as::<_, AwardRecord>(
            r#"
            SELECT id, wallet_id, user_id, badge_type, status, tx_hash, to_address, created_at, updated_at
            FROM badge_awards
            WHERE wallet_id = $1 AND badge_type = $2
            ORDER BY (status <> 'failed') DESC, created_at DESC, id DESC
            LIMIT 1
            "#,
        )
        .bind(wallet_id)
        .bind(badge_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn insert_award(&self, record: &NewAwardRecord) -> Result<AwardRecord> {
        let inserted = sqlx::query_as::<_, AwardRecord>(
            r#"
            INSERT INTO badge_awards (wallet_id, user_id, badge_type, status, tx_hash, to_address)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING id, wallet_id, user_id, badge_type, status, tx_hash, to_address, created_at, updated_at
            "#,
        )
        .bind(&record.wallet_id)
        .bind(&record.user_id)
        .bind(&record.badge_type)
        .bind(record.status)
        .bind(&record.tx_hash)
        .bind(&record.to_address)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(AwardError::DuplicateKey {
                    wallet_id: record.wallet_id.clone(),
                    badge_type: record.badge_type.to_string(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn attach_tx_hash(&self, id: i64, tx_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE badge_awards
            SET tx_hash = $1, updated_at = NOW()
            WHERE id = $2 AND status = 'pending' AND tx_hash IS NULL
            "#,
        )
        .bind(tx_hash)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release_reservation(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM badge_awards
            WHERE id = $1 AND status = 'pending' AND tx_hash IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_award_status(
        &self,
        id: i64,
        from: AwardStatus,
        to: AwardStatus,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE badge_awards
            SET status = $1, updated_at = NOW(), last_checked_at = NOW()
            WHERE id = $2 AND status = $3
            "#,
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn claim_pending_batch(&self, limit: i64) -> Result<Vec<AwardRecord>> {
        // SKIP LOCKED 让多个实例各自领取不同的记录
        let mut records = sqlx::query_as::<_, AwardRecord>(
            r#"
            WITH batch AS (
                SELECT id
                FROM badge_awards
                WHERE status = 'pending' AND tx_hash IS NOT NULL
                ORDER BY last_checked_at ASC NULLS FIRST, created_at ASC, id ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE badge_awards AS a
            SET last_checked_at = NOW()
            FROM batch
            WHERE a.id = batch.id
            RETURNING a.id, a.wallet_id, a.user_id, a.badge_type, a.status, a.tx_hash,
                      a.to_address, a.created_at, a.updated_at
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        // UPDATE ... RETURNING 不保证顺序
        records.sort_by_key(|r| (r.created_at, r.id));
        Ok(records)
    }

    async fn count_stale_reservations(&self, before: DateTime<Utc>) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM badge_awards
            WHERE status = 'pending' AND tx_hash IS NULL AND created_at < $1
            "#,
        )
        .bind(before)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }
}
