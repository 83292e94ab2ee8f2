//! 徽章定义仓储

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::BadgeRepositoryTrait;
use crate::error::{AwardError, Result};
use crate::models::{BadgeDefinition, BadgeType, NewBadgeDefinition};

/// 徽章定义仓储（PostgreSQL）
pub struct BadgeRepository {
    pool: PgPool,
}

impl BadgeRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BadgeRepositoryTrait for BadgeRepository {
    async fn find_badge_by_type(&self, badge_type: &BadgeType) -> Result<Option<BadgeDefinition>> {
        let badge = sqlx::query_as::<_, BadgeDefinition>(
            r#"
            SELECT badge_type, on_chain_id, name, image_url, created_at
            FROM badges
            WHERE badge_type = $1
            "#,
        )
        .bind(badge_type)
        .fetch_optional(&self.pool)
        .await?;

        Ok(badge)
    }

    async fn insert_badge(&self, badge: &NewBadgeDefinition) -> Result<BadgeDefinition> {
        let inserted = sqlx::query_as::<_, BadgeDefinition>(
            r#"
            INSERT INTO badges (badge_type, on_chain_id, name, image_url)
            VALUES ($1, $2, $3, $4)
            RETURNING badge_type, on_chain_id, name, image_url, created_at
            "#,
        )
        .bind(&badge.badge_type)
        .bind(badge.on_chain_id)
        .bind(&badge.name)
        .bind(&badge.image_url)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(row) => Ok(row),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Err(
                AwardError::BadgeAlreadyExists(badge.badge_type.to_string()),
            ),
            Err(e) => Err(e.into()),
        }
    }
}
