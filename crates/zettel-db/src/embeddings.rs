//! Chunk embedding repository implementation.

use async_trait::async_trait;
use chrono::Utc;
use pgvector::Vector;
use sqlx::{Pool, Postgres, Row, Transaction};
use uuid::Uuid;

use std::collections::HashSet;

use zettel_core::defaults::{HNSW_EF_SEARCH_MAX, NEAREST_CHUNK_OVERFETCH};
use zettel_core::{
    CardEmbedding, CardSummary, EmbeddingRepository, Error, Result, SimilarChunk,
};

/// PostgreSQL implementation of EmbeddingRepository.
pub struct PgEmbeddingRepository {
    pool: Pool<Postgres>,
}

impl PgEmbeddingRepository {
    /// Create a new PgEmbeddingRepository with the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Delete and re-insert a card's vectors inside a caller-owned transaction.
    pub async fn replace_for_card_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        owner_id: Uuid,
        card_pk: Uuid,
        chunks: Vec<(String, Vector)>,
        model: &str,
    ) -> Result<()> {
        sqlx::query("DELETE FROM card_embedding WHERE card_id = $1 AND owner_id = $2")
            .bind(card_pk)
            .bind(owner_id)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;

        let now = Utc::now();
        for (i, (text, vector)) in chunks.into_iter().enumerate() {
            sqlx::query(
                "INSERT INTO card_embedding (id, card_id, owner_id, chunk_index, chunk_text, vector, model, created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            )
            .bind(Uuid::now_v7())
            .bind(card_pk)
            .bind(owner_id)
            .bind(i as i32)
            .bind(&text)
            .bind(&vector)
            .bind(model)
            .bind(now)
            .execute(&mut **tx)
            .await
            .map_err(Error::Database)?;
        }

        Ok(())
    }
}

#[async_trait]
impl EmbeddingRepository for PgEmbeddingRepository {
    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        chunks: Vec<(String, Vector)>,
        model: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        self.replace_for_card_tx(&mut tx, owner_id, card_pk, chunks, model)
            .await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<CardEmbedding>> {
        let rows = sqlx::query(
            "SELECT id, card_id, owner_id, chunk_index, chunk_text, vector, model
             FROM card_embedding
             WHERE card_id = $1 AND owner_id = $2
             ORDER BY chunk_index",
        )
        .bind(card_pk)
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let embeddings = rows
            .into_iter()
            .map(|row| CardEmbedding {
                id: row.get("id"),
                card_pk: row.get("card_id"),
                owner_id: row.get("owner_id"),
                chunk_index: row.get("chunk_index"),
                chunk_text: row.get("chunk_text"),
                vector: row.get("vector"),
                model: row.get("model"),
            })
            .collect();

        Ok(embeddings)
    }

    async fn nearest_chunks(
        &self,
        owner_id: Uuid,
        query: &Vector,
        exclude: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SimilarChunk>> {
        let Ok(wanted) = usize::try_from(limit) else {
            return Ok(Vec::new());
        };
        if wanted == 0 {
            return Ok(Vec::new());
        }

        // Index-ordered chunk scan, widened until enough distinct cards
        // come back or the owner's chunks run out.
        let mut chunk_limit = limit.saturating_mul(NEAREST_CHUNK_OVERFETCH);
        loop {
            let rows = self
                .nearest_chunk_rows(owner_id, query, exclude, chunk_limit)
                .await?;
            let exhausted = (rows.len() as i64) < chunk_limit;
            let hits = closest_per_card(rows, wanted);
            if exhausted || hits.len() >= wanted || chunk_limit == i64::MAX {
                return Ok(hits);
            }
            chunk_limit = chunk_limit.saturating_mul(2);
        }
    }
}

impl PgEmbeddingRepository {
    /// Chunks ordered by cosine distance only, so the HNSW index drives the scan.
    async fn nearest_chunk_rows(
        &self,
        owner_id: Uuid,
        query: &Vector,
        exclude: Option<Uuid>,
        chunk_limit: i64,
    ) -> Result<Vec<SimilarChunk>> {
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        sqlx::query("SELECT set_config('hnsw.ef_search', $1, true)")
            .bind(chunk_limit.clamp(40, HNSW_EF_SEARCH_MAX).to_string())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let rows = sqlx::query(
            r#"
            SELECT c.id, c.owner_id, c.card_id, c.title, c.parent_id,
                   c.created_at, c.updated_at,
                   e.chunk_index, e.chunk_text,
                   (e.vector <=> $1::vector) AS distance
            FROM card_embedding e
            JOIN card c ON c.id = e.card_id
            WHERE e.owner_id = $2 AND c.owner_id = $2 AND NOT c.is_deleted
              AND ($3::uuid IS NULL OR c.id <> $3)
            ORDER BY e.vector <=> $1::vector
            LIMIT $4
            "#,
        )
        .bind(query)
        .bind(owner_id)
        .bind(exclude)
        .bind(chunk_limit)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        tx.commit().await.map_err(Error::Database)?;

        Ok(rows
            .into_iter()
            .map(|row| SimilarChunk {
                card: CardSummary {
                    id: row.get("id"),
                    owner_id: row.get("owner_id"),
                    card_id: row.get("card_id"),
                    title: row.get("title"),
                    parent_id: row.get("parent_id"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                },
                chunk_index: row.get("chunk_index"),
                chunk_text: row.get("chunk_text"),
                distance: row.get::<f64, _>("distance") as f32,
            })
            .collect())
    }
}

/// Keep each card's closest chunk from distance-ordered rows, nearest first,
/// at most `limit` cards. Equal distances order by card identity.
fn closest_per_card(rows: Vec<SimilarChunk>, limit: usize) -> Vec<SimilarChunk> {
    let mut seen = HashSet::new();
    let mut hits: Vec<SimilarChunk> = rows
        .into_iter()
        .filter(|hit| seen.insert(hit.card.id))
        .collect();
    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.card.id.cmp(&b.card.id))
    });
    hits.truncate(limit);
    hits
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(card: Uuid, chunk_index: i32, distance: f32) -> SimilarChunk {
        SimilarChunk {
            card: CardSummary {
                id: card,
                owner_id: Uuid::nil(),
                card_id: card.to_string(),
                title: String::new(),
                parent_id: card,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            chunk_index,
            chunk_text: format!("chunk {}", chunk_index),
            distance,
        }
    }

    #[test]
    fn test_closest_chunk_wins_per_card() {
        let (a, b) = (Uuid::now_v7(), Uuid::now_v7());
        let rows = vec![chunk(a, 2, 0.1), chunk(b, 0, 0.2), chunk(a, 0, 0.3)];

        let hits = closest_per_card(rows, 10);
        assert_eq!(hits.len(), 2);
        assert_eq!((hits[0].card.id, hits[0].chunk_index), (a, 2));
        assert_eq!(hits[1].card.id, b);
    }

    #[test]
    fn test_limit_counts_cards_not_chunks() {
        let (a, b, c) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let rows = vec![
            chunk(a, 0, 0.1),
            chunk(a, 1, 0.15),
            chunk(b, 0, 0.2),
            chunk(c, 0, 0.3),
        ];

        let ids: Vec<Uuid> = closest_per_card(rows, 2).iter().map(|h| h.card.id).collect();
        assert_eq!(ids, vec![a, b]);
    }

    #[test]
    fn test_equal_distances_order_by_identity() {
        let (first, second) = (Uuid::from_u128(1), Uuid::from_u128(2));
        let rows = vec![chunk(second, 0, 0.5), chunk(first, 0, 0.5)];

        let ids: Vec<Uuid> = closest_per_card(rows, 10).iter().map(|h| h.card.id).collect();
        assert_eq!(ids, vec![first, second]);
    }
}
