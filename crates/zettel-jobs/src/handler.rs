//! Handler for a single embedding recompute job.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, instrument};
use uuid::Uuid;

use zettel_core::defaults::CHUNK_MAX_CHARS;
use zettel_core::{chunk_card, CardRepository, EmbeddingBackend, EmbeddingRepository, Vector};
use zettel_db::{Database, PgCardRepository, PgEmbeddingRepository};

/// Context provided to job handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobContext {
    pub owner_id: Uuid,
    pub card_pk: Uuid,
    /// 1-based attempt number.
    pub attempt: u32,
}

/// Result of job execution.
#[derive(Debug, Clone, PartialEq)]
pub enum JobResult {
    /// Vectors stored; carries the number of chunks embedded.
    Success(usize),
    /// Permanent failure, not retried.
    Failed(String),
    /// Transient failure, retried while attempts remain.
    Retry(String),
}

/// Trait for job handlers.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Execute the job.
    async fn execute(&self, ctx: JobContext) -> JobResult;
}

/// Recomputes and stores the chunk embeddings of one card.
///
/// Loads the current card, so a job queued before a later save still embeds
/// the latest body.
pub struct EmbedCardHandler {
    cards: Arc<dyn CardRepository>,
    embeddings: Arc<dyn EmbeddingRepository>,
    embedder: Arc<dyn EmbeddingBackend>,
    max_chunk_chars: usize,
}

impl EmbedCardHandler {
    pub fn new(
        cards: Arc<dyn CardRepository>,
        embeddings: Arc<dyn EmbeddingRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            cards,
            embeddings,
            embedder,
            max_chunk_chars: CHUNK_MAX_CHARS,
        }
    }

    /// Handler backed by the PostgreSQL repositories.
    pub fn from_database(db: &Database, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        Self::new(
            Arc::new(PgCardRepository::new(db.pool.clone())),
            Arc::new(PgEmbeddingRepository::new(db.pool.clone())),
            embedder,
        )
    }

    /// Override the chunk size limit.
    pub fn with_max_chunk_chars(mut self, max_chars: usize) -> Self {
        self.max_chunk_chars = max_chars.max(1);
        self
    }
}

#[async_trait]
impl JobHandler for EmbedCardHandler {
    #[instrument(skip(self), fields(subsystem = "jobs", component = "embed_handler", op = "embed_card", card_pk = %ctx.card_pk, attempt = ctx.attempt))]
    async fn execute(&self, ctx: JobContext) -> JobResult {
        let start = Instant::now();
        let card = match self.cards.fetch(ctx.owner_id, ctx.card_pk).await {
            Ok(Some(card)) => card,
            Ok(None) => return JobResult::Failed(format!("card {} not found", ctx.card_pk)),
            Err(e) => return JobResult::Retry(e.to_string()),
        };

        let chunks = chunk_card(&card.title, &card.body, self.max_chunk_chars);
        let vectors: Vec<Vector> = if chunks.is_empty() {
            Vec::new()
        } else {
            match self.embedder.embed_texts(&chunks).await {
                Ok(vectors) if vectors.len() == chunks.len() => vectors,
                Ok(vectors) => {
                    return JobResult::Retry(format!(
                        "embedder returned {} vectors for {} chunks",
                        vectors.len(),
                        chunks.len()
                    ))
                }
                Err(e) => return JobResult::Retry(e.to_string()),
            }
        };

        let chunk_count = chunks.len();
        let rows: Vec<(String, Vector)> = chunks.into_iter().zip(vectors).collect();
        if let Err(e) = self
            .embeddings
            .replace_for_card(ctx.owner_id, ctx.card_pk, rows, self.embedder.model_name())
            .await
        {
            return JobResult::Retry(e.to_string());
        }

        debug!(
            card_id = %card.card_id,
            chunk_count,
            duration_ms = start.elapsed().as_millis() as u64,
            "Card embeddings stored"
        );
        JobResult::Success(chunk_count)
    }
}
