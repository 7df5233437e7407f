//! # zettel-graph
//!
//! Card graph and related-card retrieval engine.
//!
//! This crate provides:
//! - Reference edges rebuilt from bracket markup, with children, backlinks
//!   and combined references
//! - Tag propagation down the card hierarchy and ancestor tag closures
//! - Related-card retrieval by card embedding or by free-text query, with
//!   optional re-ranking by an external relevance scorer
//! - The card save pipeline that keeps all of the above in step
//!
//! Every component takes an [`EngineContext`] holding the store handles and
//! collaborators it needs.
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zettel_graph::{CardService, EditCardRequest, EngineContext, RelatedCards};
//! use zettel_db::Database;
//! use zettel_inference::OllamaBackend;
//!
//! let db = Database::connect("postgres://...").await?;
//! let ctx = EngineContext::from_database(&db, Arc::new(OllamaBackend::from_env()));
//!
//! let cards = CardService::new(ctx.clone());
//! let card = cards
//!     .create_card(owner_id, EditCardRequest {
//!         card_id: "1/A".into(),
//!         title: "Atomic notes".into(),
//!         body: "Builds on [1] #method".into(),
//!     })
//!     .await?;
//!
//! let related = RelatedCards::new(ctx).related_to_card(owner_id, card.id).await?;
//! ```

pub mod cards;
pub mod context;
pub mod links;
pub mod related;
pub mod tags;

// Re-export core types
pub use zettel_core::*;

pub use cards::{normalize_card_id, CardService};
pub use context::EngineContext;
pub use links::{LinkGraph, RelationFilter};
pub use related::{RelatedCards, RetrievalConfig};
pub use tags::TagPropagation;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use uuid::Uuid;
    use zettel_core::memory::MemoryStore;
    use zettel_inference::mock::MockInferenceBackend;

    use crate::context::EngineContext;

    /// Engine wired to one in-memory store and a mock embedder.
    pub struct TestEngine {
        pub store: MemoryStore,
        pub embedder: MockInferenceBackend,
        pub owner: Uuid,
        pub ctx: EngineContext,
    }

    impl TestEngine {
        pub fn new() -> Self {
            Self::with_embedder(MockInferenceBackend::new().with_dimension(2))
        }

        pub fn with_embedder(embedder: MockInferenceBackend) -> Self {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_test_writer()
                .try_init();

            let store = MemoryStore::new();
            let ctx = EngineContext::new(
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(store.clone()),
                Arc::new(embedder.clone()),
            );
            Self {
                store,
                embedder,
                owner: Uuid::now_v7(),
                ctx,
            }
        }
    }
}
