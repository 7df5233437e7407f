//! Tag repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use zettel_core::defaults::TAG_COLOR;
use zettel_core::{Error, Result, Tag, TagRepository};

const CARD_TAGS_SQL: &str = "SELECT t.id, t.owner_id, t.name, t.color, t.is_deleted
     FROM card_tag ct
     JOIN tag t ON t.id = ct.tag_id
     WHERE ct.card_id = $1 AND t.owner_id = $2
     ORDER BY t.name";

/// PostgreSQL implementation of TagRepository.
pub struct PgTagRepository {
    pool: Pool<Postgres>,
}

impl PgTagRepository {
    /// Create a new PgTagRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Upsert a tag inside a caller-owned transaction.
    ///
    /// A name collision (soft-deleted rows included) revives the existing
    /// row; its colour only changes when `color` is given.
    pub async fn upsert_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        name: &str,
        color: Option<&str>,
    ) -> Result<Tag> {
        let row = sqlx::query(
            "INSERT INTO tag (id, owner_id, name, color, is_deleted, created_at)
             VALUES ($1, $2, $3, COALESCE($4, $5), FALSE, $6)
             ON CONFLICT (owner_id, name) DO UPDATE
             SET is_deleted = FALSE, color = COALESCE($4, tag.color)
             RETURNING id, owner_id, name, color, is_deleted",
        )
        .bind(Uuid::now_v7())
        .bind(owner_id)
        .bind(name)
        .bind(color)
        .bind(TAG_COLOR)
        .bind(Utc::now())
        .fetch_one(&mut **tx)
        .await
        .map_err(Error::Database)?;

        Ok(tag_from_row(&row, 0))
    }

    async fn for_card_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        card_pk: Uuid,
    ) -> Result<Vec<Tag>> {
        let rows = sqlx::query(CARD_TAGS_SQL)
            .bind(card_pk)
            .bind(owner_id)
            .fetch_all(&mut **tx)
            .await
            .map_err(Error::Database)?;

        Ok(rows.iter().map(|r| tag_from_row(r, 0)).collect())
    }
}

fn tag_from_row(row: &PgRow, card_count: i64) -> Tag {
    Tag {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        name: row.get("name"),
        color: row.get("color"),
        is_deleted: row.get("is_deleted"),
        card_count,
    }
}

#[async_trait]
impl TagRepository for PgTagRepository {
    async fn upsert(&self, owner_id: Uuid, name: &str, color: Option<&str>) -> Result<Tag> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let tag = self.upsert_tx(&mut tx, owner_id, name, color).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(tag)
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(
            r#"
            SELECT
                t.id, t.owner_id, t.name, t.color, t.is_deleted,
                COUNT(c.id) AS card_count
            FROM tag t
            LEFT JOIN card_tag ct ON ct.tag_id = t.id
            LEFT JOIN card c ON c.id = ct.card_id AND NOT c.is_deleted
            WHERE t.owner_id = $1 AND NOT t.is_deleted
            GROUP BY t.id, t.owner_id, t.name, t.color, t.is_deleted
            ORDER BY t.name
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let tags = rows
            .iter()
            .map(|row| tag_from_row(row, row.get("card_count")))
            .collect();

        Ok(tags)
    }

    async fn soft_delete(&self, owner_id: Uuid, tag_id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE tag SET is_deleted = TRUE
             WHERE id = $1 AND owner_id = $2 AND NOT is_deleted",
        )
        .bind(tag_id)
        .bind(owner_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("tag {}", tag_id)));
        }
        Ok(())
    }

    async fn card_count(&self, owner_id: Uuid, tag_id: Uuid) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*)
             FROM card_tag ct
             JOIN card c ON c.id = ct.card_id
             WHERE ct.tag_id = $1 AND c.owner_id = $2 AND NOT c.is_deleted",
        )
        .bind(tag_id)
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(count)
    }

    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<Tag>> {
        let rows = sqlx::query(CARD_TAGS_SQL)
            .bind(card_pk)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.iter().map(|r| tag_from_row(r, 0)).collect())
    }

    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        names: &[String],
    ) -> Result<Vec<Tag>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("DELETE FROM card_tag WHERE card_id = $1")
            .bind(card_pk)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        for name in names {
            let tag = self.upsert_tx(&mut tx, owner_id, name, None).await?;
            sqlx::query(
                "INSERT INTO card_tag (card_id, tag_id) VALUES ($1, $2)
                 ON CONFLICT DO NOTHING",
            )
            .bind(card_pk)
            .bind(tag.id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        let tags = self.for_card_tx(&mut tx, owner_id, card_pk).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(tags)
    }
}
