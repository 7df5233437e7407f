//! Capabilities handed to every engine operation.

use std::sync::Arc;

use zettel_core::{
    CardRepository, EmbeddingBackend, EmbeddingRepository, EmbeddingScheduler, LinkRepository,
    NoOpScheduler, RelevanceScorer, TagRepository,
};
use zettel_db::Database;

/// Store handles and collaborators used by the engine.
///
/// Cheap to clone; every field is shared.
#[derive(Clone)]
pub struct EngineContext {
    pub cards: Arc<dyn CardRepository>,
    pub links: Arc<dyn LinkRepository>,
    pub tags: Arc<dyn TagRepository>,
    pub embeddings: Arc<dyn EmbeddingRepository>,
    pub embedder: Arc<dyn EmbeddingBackend>,
    /// Re-ranker for query-driven retrieval. `None` keeps similarity order.
    pub scorer: Option<Arc<dyn RelevanceScorer>>,
    /// Receives a recompute request after every save.
    pub scheduler: Arc<dyn EmbeddingScheduler>,
}

impl EngineContext {
    /// Context with no scorer and embedding recompute disabled.
    pub fn new(
        cards: Arc<dyn CardRepository>,
        links: Arc<dyn LinkRepository>,
        tags: Arc<dyn TagRepository>,
        embeddings: Arc<dyn EmbeddingRepository>,
        embedder: Arc<dyn EmbeddingBackend>,
    ) -> Self {
        Self {
            cards,
            links,
            tags,
            embeddings,
            embedder,
            scorer: None,
            scheduler: Arc::new(NoOpScheduler),
        }
    }

    /// Context backed by the PostgreSQL repositories.
    pub fn from_database(db: &Database, embedder: Arc<dyn EmbeddingBackend>) -> Self {
        let Database {
            cards,
            links,
            tags,
            embeddings,
            ..
        } = db.clone();
        Self::new(
            Arc::new(cards),
            Arc::new(links),
            Arc::new(tags),
            Arc::new(embeddings),
            embedder,
        )
    }

    /// Set the relevance scorer.
    pub fn with_scorer(mut self, scorer: Arc<dyn RelevanceScorer>) -> Self {
        self.scorer = Some(scorer);
        self
    }

    /// Set the post-save embedding scheduler.
    pub fn with_scheduler(mut self, scheduler: Arc<dyn EmbeddingScheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }
}
