//! Core traits for the zettel engine.
//!
//! Repository traits describe the minimal store contract the engine needs;
//! collaborator traits describe the opaque embedding and scoring services.
//! Concrete implementations live in `zettel-db` and `zettel-inference`.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// CARD REPOSITORY
// =============================================================================

/// Repository for card rows.
///
/// Every lookup is owner-scoped and ignores soft-deleted cards; a miss is
/// `Ok(None)`, never an error.
#[async_trait]
pub trait CardRepository: Send + Sync {
    /// Insert a new card.
    async fn insert(&self, card: NewCard) -> Result<Card>;

    /// Overwrite identifier, title, body and parent of an existing card.
    async fn update(&self, owner_id: Uuid, id: Uuid, update: CardUpdate) -> Result<Card>;

    /// Mark a card deleted.
    async fn soft_delete(&self, owner_id: Uuid, id: Uuid) -> Result<()>;

    /// Fetch a full card by internal identity.
    async fn fetch(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Card>>;

    /// Resolve a textual identifier to a card.
    async fn find_by_card_id(&self, owner_id: Uuid, card_id: &str)
        -> Result<Option<CardSummary>>;

    /// Whether a non-deleted card other than `exclude` already uses `card_id`.
    async fn identifier_in_use(
        &self,
        owner_id: Uuid,
        card_id: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool>;

    /// Cards whose identifier starts with `card_id.` or `card_id/`,
    /// ordered by identifier, excluding the card itself.
    async fn children(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>>;

    /// Largest purely-numeric identifier among the owner's cards.
    async fn max_numeric_identifier(&self, owner_id: Uuid) -> Result<Option<i64>>;
}

// =============================================================================
// LINK REPOSITORY
// =============================================================================

/// Repository for reference edges.
#[async_trait]
pub trait LinkRepository: Send + Sync {
    /// Atomically replace every outgoing edge of `source_id`.
    ///
    /// Each target identifier is resolved among the owner's non-deleted
    /// cards; unresolved targets are skipped. On any failure the previous
    /// edge set is left intact. Returns the number of edges written.
    async fn replace_outgoing(
        &self,
        owner_id: Uuid,
        source_id: Uuid,
        targets: &[String],
    ) -> Result<usize>;

    /// Stored outgoing edges of a card.
    async fn outgoing(&self, source_id: Uuid) -> Result<Vec<ReferenceEdge>>;

    /// Non-deleted owner cards holding an edge to the card with textual
    /// identifier `card_id`, excluding that card itself.
    async fn backlinks(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>>;
}

// =============================================================================
// TAG REPOSITORY
// =============================================================================

/// Repository for tags and card memberships.
#[async_trait]
pub trait TagRepository: Send + Sync {
    /// Create a tag, or revive/update an existing one with the same name
    /// (soft-deleted included). `color: None` keeps the stored colour and
    /// uses the default for new tags.
    async fn upsert(&self, owner_id: Uuid, name: &str, color: Option<&str>) -> Result<Tag>;

    /// Non-deleted tags of an owner with card counts, ordered by name.
    async fn list(&self, owner_id: Uuid) -> Result<Vec<Tag>>;

    /// Soft-delete a tag.
    async fn soft_delete(&self, owner_id: Uuid, tag_id: Uuid) -> Result<()>;

    /// Number of non-deleted cards carrying a tag.
    async fn card_count(&self, owner_id: Uuid, tag_id: Uuid) -> Result<i64>;

    /// Direct tag memberships of a card, ordered by name.
    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<Tag>>;

    /// Atomically replace a card's memberships.
    ///
    /// Deletes every membership of the card, then upserts each name (without
    /// touching colours of existing tags) and inserts a membership unless
    /// already present. Returns the resulting direct tags.
    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        names: &[String],
    ) -> Result<Vec<Tag>>;
}

// =============================================================================
// EMBEDDING REPOSITORY
// =============================================================================

/// Repository for stored chunk embeddings.
#[async_trait]
pub trait EmbeddingRepository: Send + Sync {
    /// Atomically delete and re-insert all vectors of a card.
    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        chunks: Vec<(String, Vector)>,
        model: &str,
    ) -> Result<()>;

    /// Stored vectors of a card, by chunk index.
    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<CardEmbedding>>;

    /// Nearest cards to `query` by cosine distance, one row per card holding
    /// its closest chunk, ascending distance, owner-scoped, soft-deleted cards
    /// and `exclude` skipped.
    async fn nearest_chunks(
        &self,
        owner_id: Uuid,
        query: &Vector,
        exclude: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SimilarChunk>>;
}

// =============================================================================
// COLLABORATOR TRAITS
// =============================================================================

/// Backend for generating embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts.
    ///
    /// Returns a vector of embedding vectors, one per input text.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Get the expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// Backend for text generation.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate text with system context.
    async fn generate_with_system(&self, system: &str, prompt: &str) -> Result<String>;

    /// Get the model name being used.
    fn model_name(&self) -> &str;
}

/// External relevance scorer for query-driven retrieval.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Score each candidate against the query.
    ///
    /// Must return exactly one score per candidate, in input order.
    async fn score(&self, query: &str, candidates: &[CandidateSummary]) -> Result<Vec<f32>>;
}

/// Sink for post-save embedding recomputation.
///
/// Implementations must not block the save path.
pub trait EmbeddingScheduler: Send + Sync {
    /// Queue a recompute of a card's embeddings.
    fn schedule(&self, owner_id: Uuid, card_pk: Uuid) -> Result<()>;
}

/// Scheduler that drops every request (embedding disabled).
#[derive(Debug, Clone, Default)]
pub struct NoOpScheduler;

impl EmbeddingScheduler for NoOpScheduler {
    fn schedule(&self, _owner_id: Uuid, _card_pk: Uuid) -> Result<()> {
        Ok(())
    }
}
