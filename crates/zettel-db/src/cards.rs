//! Card repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use zettel_core::{Card, CardRepository, CardSummary, CardUpdate, Error, NewCard, Result};

use crate::escape_like;

const CARD_COLUMNS: &str =
    "id, owner_id, card_id, title, body, parent_id, is_deleted, created_at, updated_at";

const SUMMARY_COLUMNS: &str = "id, owner_id, card_id, title, parent_id, created_at, updated_at";

/// PostgreSQL implementation of CardRepository.
pub struct PgCardRepository {
    pool: Pool<Postgres>,
}

impl PgCardRepository {
    /// Create a new PgCardRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

pub(crate) fn card_from_row(row: &PgRow) -> Card {
    Card {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        card_id: row.get("card_id"),
        title: row.get("title"),
        body: row.get("body"),
        parent_id: row.get("parent_id"),
        is_deleted: row.get("is_deleted"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

pub(crate) fn summary_from_row(row: &PgRow) -> CardSummary {
    CardSummary {
        id: row.get("id"),
        owner_id: row.get("owner_id"),
        card_id: row.get("card_id"),
        title: row.get("title"),
        parent_id: row.get("parent_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Map a unique-index violation on the live identifier index to `Conflict`.
fn map_write_error(e: sqlx::Error, card_id: &str) -> Error {
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.code().as_deref() == Some("23505") {
            return Error::Conflict(format!("card identifier already in use: {}", card_id));
        }
    }
    Error::Database(e)
}

#[async_trait]
impl CardRepository for PgCardRepository {
    async fn insert(&self, card: NewCard) -> Result<Card> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO card (id, owner_id, card_id, title, body, parent_id, is_deleted, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, FALSE, $7, $7)
             RETURNING {CARD_COLUMNS}"
        ))
        .bind(card.id)
        .bind(card.owner_id)
        .bind(&card.card_id)
        .bind(&card.title)
        .bind(&card.body)
        .bind(card.parent_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &card.card_id))?;

        Ok(card_from_row(&row))
    }

    async fn update(&self, owner_id: Uuid, id: Uuid, update: CardUpdate) -> Result<Card> {
        let row = sqlx::query(&format!(
            "UPDATE card
             SET card_id = $3, title = $4, body = $5, parent_id = $6, updated_at = $7
             WHERE id = $1 AND owner_id = $2 AND NOT is_deleted
             RETURNING {CARD_COLUMNS}"
        ))
        .bind(id)
        .bind(owner_id)
        .bind(&update.card_id)
        .bind(&update.title)
        .bind(&update.body)
        .bind(update.parent_id)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &update.card_id))?;

        row.map(|r| card_from_row(&r))
            .ok_or(Error::CardNotFound(id))
    }

    async fn soft_delete(&self, owner_id: Uuid, id: Uuid) -> Result<()> {
        let result = sqlx::query(
            "UPDATE card SET is_deleted = TRUE, updated_at = $3
             WHERE id = $1 AND owner_id = $2 AND NOT is_deleted",
        )
        .bind(id)
        .bind(owner_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::CardNotFound(id));
        }
        Ok(())
    }

    async fn fetch(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Card>> {
        let row = sqlx::query(&format!(
            "SELECT {CARD_COLUMNS} FROM card
             WHERE id = $1 AND owner_id = $2 AND NOT is_deleted"
        ))
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| card_from_row(&r)))
    }

    async fn find_by_card_id(
        &self,
        owner_id: Uuid,
        card_id: &str,
    ) -> Result<Option<CardSummary>> {
        let row = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM card
             WHERE owner_id = $1 AND card_id = $2 AND NOT is_deleted"
        ))
        .bind(owner_id)
        .bind(card_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(|r| summary_from_row(&r)))
    }

    async fn identifier_in_use(
        &self,
        owner_id: Uuid,
        card_id: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool> {
        let in_use: bool = sqlx::query_scalar(
            "SELECT EXISTS (
                 SELECT 1 FROM card
                 WHERE owner_id = $1 AND card_id = $2 AND NOT is_deleted
                   AND ($3::uuid IS NULL OR id <> $3)
             )",
        )
        .bind(owner_id)
        .bind(card_id)
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(in_use)
    }

    async fn children(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        let escaped = escape_like(card_id);
        let rows = sqlx::query(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM card
             WHERE owner_id = $1 AND NOT is_deleted AND card_id <> $2
               AND (card_id LIKE $3 OR card_id LIKE $4)
             ORDER BY card_id"
        ))
        .bind(owner_id)
        .bind(card_id)
        .bind(format!("{}.%", escaped))
        .bind(format!("{}/%", escaped))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(summary_from_row).collect())
    }

    async fn max_numeric_identifier(&self, owner_id: Uuid) -> Result<Option<i64>> {
        // 18 digits always fits in BIGINT.
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(card_id::BIGINT) FROM card
             WHERE owner_id = $1 AND NOT is_deleted AND card_id ~ '^[0-9]{1,18}$'",
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(max)
    }
}
