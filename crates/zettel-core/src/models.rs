//! Core data models for the card graph.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use pgvector::Vector;

// =============================================================================
// CARD TYPES
// =============================================================================

/// A card: the atomic note of the knowledge base.
///
/// `id` is the internal, immutable identity. `card_id` is the user-visible
/// hierarchical identifier (e.g. `SP170/A.1`), unique per owner among
/// non-deleted cards. A root card's `parent_id` equals its own `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Card {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub card_id: String,
    pub title: String,
    pub body: String,
    pub parent_id: Uuid,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Card {
    /// True when the card parents itself.
    pub fn is_root(&self) -> bool {
        self.parent_id == self.id
    }

    /// Lightweight view without the body.
    pub fn summary(&self) -> CardSummary {
        CardSummary {
            id: self.id,
            owner_id: self.owner_id,
            card_id: self.card_id.clone(),
            title: self.title.clone(),
            parent_id: self.parent_id,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Card without its body, as returned by graph queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardSummary {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub card_id: String,
    pub title: String,
    pub parent_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CardSummary {
    pub fn is_root(&self) -> bool {
        self.parent_id == self.id
    }
}

/// Row to insert for a new card.
#[derive(Debug, Clone)]
pub struct NewCard {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub card_id: String,
    pub title: String,
    pub body: String,
    pub parent_id: Uuid,
}

/// Field values written by a card edit.
#[derive(Debug, Clone)]
pub struct CardUpdate {
    pub card_id: String,
    pub title: String,
    pub body: String,
    pub parent_id: Uuid,
}

/// Caller-supplied content for creating or editing a card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EditCardRequest {
    pub card_id: String,
    pub title: String,
    pub body: String,
}

/// A card with everything needed to display it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardView {
    pub card: Card,
    /// Structural parent; `None` for roots or when the parent is not visible.
    pub parent: Option<CardSummary>,
    pub children: Vec<CardSummary>,
    pub references: Vec<CardSummary>,
    /// Ancestor tag closure (parents first, duplicates kept).
    pub tags: Vec<Tag>,
}

// =============================================================================
// REFERENCE TYPES
// =============================================================================

/// Directed reference from a source card's body to a target card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceEdge {
    pub id: Uuid,
    pub source_id: Uuid,
    pub target_id: Uuid,
    pub created_at: DateTime<Utc>,
}

// =============================================================================
// TAG TYPES
// =============================================================================

/// Owner-scoped tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub color: String,
    pub is_deleted: bool,
    /// Number of non-deleted cards carrying this tag (computed by list queries)
    #[serde(default)]
    pub card_count: i64,
}

// =============================================================================
// EMBEDDING TYPES
// =============================================================================

/// One stored vector for a chunk of a card's body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardEmbedding {
    pub id: Uuid,
    pub card_pk: Uuid,
    pub owner_id: Uuid,
    pub chunk_index: i32,
    pub chunk_text: String,
    pub vector: Vector,
    pub model: String,
}

/// Candidate row from a similarity query: a card with its closest chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarChunk {
    pub card: CardSummary,
    pub chunk_index: i32,
    pub chunk_text: String,
    /// Cosine distance to the query vector (smaller is closer).
    pub distance: f32,
}

/// What the relevance scorer sees for one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateSummary {
    pub title: String,
    pub chunk: String,
}

impl From<&SimilarChunk> for CandidateSummary {
    fn from(hit: &SimilarChunk) -> Self {
        Self {
            title: hit.card.title.clone(),
            chunk: hit.chunk_text.clone(),
        }
    }
}

/// A related-card result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedCard {
    pub card: CardSummary,
    /// Representative body chunk that matched.
    pub chunk_text: String,
    pub distance: f32,
    /// Relevance score from the external scorer, when re-ranking ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,
}

impl From<SimilarChunk> for RelatedCard {
    fn from(hit: SimilarChunk) -> Self {
        Self {
            card: hit.card,
            chunk_text: hit.chunk_text,
            distance: hit.distance,
            score: None,
        }
    }
}

/// Element-wise mean of a set of vectors.
///
/// Returns `None` for an empty set or mismatched dimensions.
pub fn mean_vector(vectors: &[Vector]) -> Option<Vector> {
    let first = vectors.first()?;
    let dim = first.as_slice().len();
    let mut sum = vec![0.0f32; dim];
    for v in vectors {
        let slice = v.as_slice();
        if slice.len() != dim {
            return None;
        }
        for (acc, x) in sum.iter_mut().zip(slice) {
            *acc += *x;
        }
    }
    let n = vectors.len() as f32;
    Some(Vector::from(sum.into_iter().map(|x| x / n).collect::<Vec<_>>()))
}
