//! Reference edge repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row, Transaction};
use tracing::debug;
use uuid::Uuid;

use zettel_core::{CardSummary, Error, LinkRepository, ReferenceEdge, Result};

use crate::cards::summary_from_row;

/// PostgreSQL implementation of LinkRepository.
pub struct PgLinkRepository {
    pool: Pool<Postgres>,
}

impl PgLinkRepository {
    /// Create a new PgLinkRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Replace outgoing edges inside a caller-owned transaction.
    pub async fn replace_outgoing_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        source_id: Uuid,
        targets: &[String],
    ) -> Result<usize> {
        sqlx::query("DELETE FROM reference WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let now = Utc::now();
        let mut written = 0usize;
        for target in targets {
            // Resolution and insert in one statement; a miss inserts nothing.
            let result = sqlx::query(
                "INSERT INTO reference (id, source_id, target_id, created_at)
                 SELECT $1, $2, c.id, $3
                 FROM card c
                 WHERE c.owner_id = $4 AND c.card_id = $5 AND NOT c.is_deleted",
            )
            .bind(Uuid::now_v7())
            .bind(source_id)
            .bind(now)
            .bind(owner_id)
            .bind(target)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

            if result.rows_affected() == 0 {
                debug!(
                    subsystem = "db",
                    component = "links",
                    op = "replace_outgoing",
                    %source_id,
                    target = %target,
                    "Unresolved reference dropped"
                );
            }
            written += result.rows_affected() as usize;
        }
        Ok(written)
    }
}

#[async_trait]
impl LinkRepository for PgLinkRepository {
    async fn replace_outgoing(
        &self,
        owner_id: Uuid,
        source_id: Uuid,
        targets: &[String],
    ) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let written = self
            .replace_outgoing_tx(&mut tx, owner_id, source_id, targets)
            .await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(written)
    }

    async fn outgoing(&self, source_id: Uuid) -> Result<Vec<ReferenceEdge>> {
        let rows = sqlx::query(
            "SELECT id, source_id, target_id, created_at
             FROM reference
             WHERE source_id = $1
             ORDER BY created_at, id",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let edges = rows
            .into_iter()
            .map(|row| ReferenceEdge {
                id: row.get("id"),
                source_id: row.get("source_id"),
                target_id: row.get("target_id"),
                created_at: row.get("created_at"),
            })
            .collect();

        Ok(edges)
    }

    async fn backlinks(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        let rows = sqlx::query(
            "SELECT s.id, s.owner_id, s.card_id, s.title, s.parent_id, s.created_at, s.updated_at
             FROM reference r
             JOIN card t ON t.id = r.target_id
             JOIN card s ON s.id = r.source_id
             WHERE t.owner_id = $1 AND t.card_id = $2 AND NOT t.is_deleted
               AND s.owner_id = $1 AND NOT s.is_deleted AND s.card_id <> $2
             ORDER BY s.card_id",
        )
        .bind(owner_id)
        .bind(card_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(summary_from_row).collect())
    }
}
