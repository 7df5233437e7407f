//! In-memory repository implementations for deterministic testing.
//!
//! `MemoryStore` implements every repository trait over a single mutex, so
//! each trait call is trivially atomic. Write failures can be injected to
//! exercise rollback paths.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zettel_core::memory::MemoryStore;
//!
//! let store = MemoryStore::new();
//! let owner = uuid::Uuid::now_v7();
//! let root = store.seed_card(owner, "1", "Root", "links to [2]");
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::defaults::TAG_COLOR;
use crate::error::{Error, Result};
use crate::models::*;
use crate::traits::*;

#[derive(Debug, Default)]
struct State {
    cards: Vec<Card>,
    edges: Vec<ReferenceEdge>,
    tags: Vec<Tag>,
    memberships: Vec<(Uuid, Uuid)>,
    embeddings: Vec<CardEmbedding>,
}

/// In-memory store implementing all repository traits.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with a database error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make similarity queries fail with a database error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_write(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    /// Insert a card directly, bypassing the save pipeline.
    ///
    /// The parent is resolved from the identifier among existing cards; a
    /// missing parent makes the card a root.
    pub fn seed_card(&self, owner_id: Uuid, card_id: &str, title: &str, body: &str) -> Card {
        let parent_card_id = crate::hierarchy::parent_identifier(card_id);
        let mut state = self.lock();
        let id = Uuid::now_v7();
        let parent_id = if parent_card_id == card_id {
            id
        } else {
            state
                .cards
                .iter()
                .find(|c| c.owner_id == owner_id && !c.is_deleted && c.card_id == parent_card_id)
                .map(|c| c.id)
                .unwrap_or(id)
        };
        let now = Utc::now();
        let card = Card {
            id,
            owner_id,
            card_id: card_id.to_string(),
            title: title.to_string(),
            body: body.to_string(),
            parent_id,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        state.cards.push(card.clone());
        card
    }

    /// Overwrite a card's parent pointer (for corrupted-data tests).
    pub fn set_parent(&self, id: Uuid, parent_id: Uuid) {
        let mut state = self.lock();
        if let Some(card) = state.cards.iter_mut().find(|c| c.id == id) {
            card.parent_id = parent_id;
        }
    }

    /// Store one vector per card without chunk text.
    pub fn seed_embedding(&self, owner_id: Uuid, card_pk: Uuid, vector: Vec<f32>) {
        let mut state = self.lock();
        let chunk_index = state
            .embeddings
            .iter()
            .filter(|e| e.card_pk == card_pk)
            .count() as i32;
        state.embeddings.push(CardEmbedding {
            id: Uuid::now_v7(),
            card_pk,
            owner_id,
            chunk_index,
            chunk_text: format!("chunk {}", chunk_index),
            vector: Vector::from(vector),
            model: "seed".to_string(),
        });
    }

    /// All stored edges (for assertions).
    pub fn edges(&self) -> Vec<ReferenceEdge> {
        self.lock().edges.clone()
    }

    /// Every tag row including soft-deleted ones (for assertions).
    pub fn all_tags(&self) -> Vec<Tag> {
        self.lock().tags.clone()
    }

    fn resolve(state: &State, owner_id: Uuid, card_id: &str) -> Option<Card> {
        state
            .cards
            .iter()
            .find(|c| c.owner_id == owner_id && !c.is_deleted && c.card_id == card_id)
            .cloned()
    }

    fn count_for_tag(state: &State, tag_id: Uuid) -> i64 {
        state
            .memberships
            .iter()
            .filter(|(card_pk, t)| {
                *t == tag_id
                    && state
                        .cards
                        .iter()
                        .any(|c| c.id == *card_pk && !c.is_deleted)
            })
            .count() as i64
    }

    fn upsert_locked(state: &mut State, owner_id: Uuid, name: &str, color: Option<&str>) -> Tag {
        if let Some(tag) = state
            .tags
            .iter_mut()
            .find(|t| t.owner_id == owner_id && t.name == name)
        {
            tag.is_deleted = false;
            if let Some(color) = color {
                tag.color = color.to_string();
            }
            return tag.clone();
        }
        let tag = Tag {
            id: Uuid::now_v7(),
            owner_id,
            name: name.to_string(),
            color: color.unwrap_or(TAG_COLOR).to_string(),
            is_deleted: false,
            card_count: 0,
        };
        state.tags.push(tag.clone());
        tag
    }

    fn tags_for_card(state: &State, owner_id: Uuid, card_pk: Uuid) -> Vec<Tag> {
        let mut tags: Vec<Tag> = state
            .memberships
            .iter()
            .filter(|(c, _)| *c == card_pk)
            .filter_map(|(_, tag_id)| {
                state
                    .tags
                    .iter()
                    .find(|t| t.id == *tag_id && t.owner_id == owner_id)
                    .cloned()
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }
}

fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 1.0;
    }
    1.0 - dot / (na * nb)
}

#[async_trait]
impl CardRepository for MemoryStore {
    async fn insert(&self, card: NewCard) -> Result<Card> {
        self.check_write()?;
        let now = Utc::now();
        let card = Card {
            id: card.id,
            owner_id: card.owner_id,
            card_id: card.card_id,
            title: card.title,
            body: card.body,
            parent_id: card.parent_id,
            is_deleted: false,
            created_at: now,
            updated_at: now,
        };
        self.lock().cards.push(card.clone());
        Ok(card)
    }

    async fn update(&self, owner_id: Uuid, id: Uuid, update: CardUpdate) -> Result<Card> {
        self.check_write()?;
        let mut state = self.lock();
        let card = state
            .cards
            .iter_mut()
            .find(|c| c.id == id && c.owner_id == owner_id && !c.is_deleted)
            .ok_or(Error::CardNotFound(id))?;
        card.card_id = update.card_id;
        card.title = update.title;
        card.body = update.body;
        card.parent_id = update.parent_id;
        card.updated_at = Utc::now();
        Ok(card.clone())
    }

    async fn soft_delete(&self, owner_id: Uuid, id: Uuid) -> Result<()> {
        self.check_write()?;
        let mut state = self.lock();
        let card = state
            .cards
            .iter_mut()
            .find(|c| c.id == id && c.owner_id == owner_id && !c.is_deleted)
            .ok_or(Error::CardNotFound(id))?;
        card.is_deleted = true;
        card.updated_at = Utc::now();
        Ok(())
    }

    async fn fetch(&self, owner_id: Uuid, id: Uuid) -> Result<Option<Card>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .find(|c| c.id == id && c.owner_id == owner_id && !c.is_deleted)
            .cloned())
    }

    async fn find_by_card_id(
        &self,
        owner_id: Uuid,
        card_id: &str,
    ) -> Result<Option<CardSummary>> {
        Ok(Self::resolve(&self.lock(), owner_id, card_id).map(|c| c.summary()))
    }

    async fn identifier_in_use(
        &self,
        owner_id: Uuid,
        card_id: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool> {
        Ok(self.lock().cards.iter().any(|c| {
            c.owner_id == owner_id
                && !c.is_deleted
                && c.card_id == card_id
                && Some(c.id) != exclude
        }))
    }

    async fn children(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        let dot = format!("{}.", card_id);
        let slash = format!("{}/", card_id);
        let mut children: Vec<CardSummary> = self
            .lock()
            .cards
            .iter()
            .filter(|c| {
                c.owner_id == owner_id
                    && !c.is_deleted
                    && c.card_id != card_id
                    && (c.card_id.starts_with(&dot) || c.card_id.starts_with(&slash))
            })
            .map(Card::summary)
            .collect();
        children.sort_by(|a, b| a.card_id.cmp(&b.card_id));
        Ok(children)
    }

    async fn max_numeric_identifier(&self, owner_id: Uuid) -> Result<Option<i64>> {
        Ok(self
            .lock()
            .cards
            .iter()
            .filter(|c| c.owner_id == owner_id && !c.is_deleted)
            .filter(|c| !c.card_id.is_empty() && c.card_id.chars().all(|ch| ch.is_ascii_digit()))
            .filter_map(|c| c.card_id.parse::<i64>().ok())
            .max())
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn replace_outgoing(
        &self,
        owner_id: Uuid,
        source_id: Uuid,
        targets: &[String],
    ) -> Result<usize> {
        self.check_write()?;
        let mut state = self.lock();
        let resolved: Vec<Uuid> = targets
            .iter()
            .filter_map(|t| Self::resolve(&state, owner_id, t).map(|c| c.id))
            .collect();
        state.edges.retain(|e| e.source_id != source_id);
        let now = Utc::now();
        for target_id in &resolved {
            state.edges.push(ReferenceEdge {
                id: Uuid::now_v7(),
                source_id,
                target_id: *target_id,
                created_at: now,
            });
        }
        Ok(resolved.len())
    }

    async fn outgoing(&self, source_id: Uuid) -> Result<Vec<ReferenceEdge>> {
        Ok(self
            .lock()
            .edges
            .iter()
            .filter(|e| e.source_id == source_id)
            .cloned()
            .collect())
    }

    async fn backlinks(&self, owner_id: Uuid, card_id: &str) -> Result<Vec<CardSummary>> {
        let state = self.lock();
        let Some(target) = Self::resolve(&state, owner_id, card_id) else {
            return Ok(Vec::new());
        };
        Ok(state
            .edges
            .iter()
            .filter(|e| e.target_id == target.id)
            .filter_map(|e| {
                state
                    .cards
                    .iter()
                    .find(|c| c.id == e.source_id && c.owner_id == owner_id && !c.is_deleted)
            })
            .filter(|c| c.card_id != card_id)
            .map(Card::summary)
            .collect())
    }
}

#[async_trait]
impl TagRepository for MemoryStore {
    async fn upsert(&self, owner_id: Uuid, name: &str, color: Option<&str>) -> Result<Tag> {
        self.check_write()?;
        Ok(Self::upsert_locked(&mut self.lock(), owner_id, name, color))
    }

    async fn list(&self, owner_id: Uuid) -> Result<Vec<Tag>> {
        let state = self.lock();
        let mut tags: Vec<Tag> = state
            .tags
            .iter()
            .filter(|t| t.owner_id == owner_id && !t.is_deleted)
            .map(|t| Tag {
                card_count: Self::count_for_tag(&state, t.id),
                ..t.clone()
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tags)
    }

    async fn soft_delete(&self, owner_id: Uuid, tag_id: Uuid) -> Result<()> {
        self.check_write()?;
        let mut state = self.lock();
        let tag = state
            .tags
            .iter_mut()
            .find(|t| t.id == tag_id && t.owner_id == owner_id && !t.is_deleted)
            .ok_or_else(|| Error::NotFound(format!("tag {}", tag_id)))?;
        tag.is_deleted = true;
        Ok(())
    }

    async fn card_count(&self, _owner_id: Uuid, tag_id: Uuid) -> Result<i64> {
        Ok(Self::count_for_tag(&self.lock(), tag_id))
    }

    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<Tag>> {
        Ok(Self::tags_for_card(&self.lock(), owner_id, card_pk))
    }

    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        names: &[String],
    ) -> Result<Vec<Tag>> {
        self.check_write()?;
        let mut state = self.lock();
        state.memberships.retain(|(c, _)| *c != card_pk);
        for name in names {
            let tag = Self::upsert_locked(&mut state, owner_id, name, None);
            if !state.memberships.contains(&(card_pk, tag.id)) {
                state.memberships.push((card_pk, tag.id));
            }
        }
        Ok(Self::tags_for_card(&state, owner_id, card_pk))
    }
}

#[async_trait]
impl EmbeddingRepository for MemoryStore {
    async fn replace_for_card(
        &self,
        owner_id: Uuid,
        card_pk: Uuid,
        chunks: Vec<(String, Vector)>,
        model: &str,
    ) -> Result<()> {
        self.check_write()?;
        let mut state = self.lock();
        state
            .embeddings
            .retain(|e| !(e.card_pk == card_pk && e.owner_id == owner_id));
        for (i, (text, vector)) in chunks.into_iter().enumerate() {
            state.embeddings.push(CardEmbedding {
                id: Uuid::now_v7(),
                card_pk,
                owner_id,
                chunk_index: i as i32,
                chunk_text: text,
                vector,
                model: model.to_string(),
            });
        }
        Ok(())
    }

    async fn for_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<CardEmbedding>> {
        let mut rows: Vec<CardEmbedding> = self
            .lock()
            .embeddings
            .iter()
            .filter(|e| e.card_pk == card_pk && e.owner_id == owner_id)
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.chunk_index);
        Ok(rows)
    }

    async fn nearest_chunks(
        &self,
        owner_id: Uuid,
        query: &Vector,
        exclude: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<SimilarChunk>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Database(sqlx::Error::PoolTimedOut));
        }
        let state = self.lock();
        let mut best: HashMap<Uuid, SimilarChunk> = HashMap::new();
        for e in state.embeddings.iter().filter(|e| e.owner_id == owner_id) {
            if Some(e.card_pk) == exclude {
                continue;
            }
            let Some(card) = state
                .cards
                .iter()
                .find(|c| c.id == e.card_pk && c.owner_id == owner_id && !c.is_deleted)
            else {
                continue;
            };
            let distance = cosine_distance(query.as_slice(), e.vector.as_slice());
            let closer = best
                .get(&e.card_pk)
                .map_or(true, |current| distance < current.distance);
            if closer {
                best.insert(
                    e.card_pk,
                    SimilarChunk {
                        card: card.summary(),
                        chunk_index: e.chunk_index,
                        chunk_text: e.chunk_text.clone(),
                        distance,
                    },
                );
            }
        }
        let mut hits: Vec<SimilarChunk> = best.into_values().collect();
        hits.sort_by(|a, b| {
            a.distance
                .total_cmp(&b.distance)
                .then_with(|| a.card.card_id.cmp(&b.card.card_id))
        });
        hits.truncate(limit.max(0) as usize);
        Ok(hits)
    }
}
