//! Related-card retrieval.
//!
//! Card-driven retrieval pulls the nearest candidates to a card's embedding
//! and keeps the first ones with no structural or reference relation to it.
//! Query-driven retrieval embeds free text and optionally re-ranks the
//! candidates with an external relevance scorer.

use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use zettel_core::defaults::{RELATED_CANDIDATE_LIMIT, RELATED_RESULT_LIMIT};
use zettel_core::{
    mean_vector, CandidateSummary, Card, Error, RelatedCard, Result, SimilarChunk, Vector,
};

use crate::context::EngineContext;
use crate::links::LinkGraph;

/// Limits for related-card retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Candidates pulled from the embedding store. Candidates past this rank
    /// are never considered.
    pub candidate_limit: i64,
    /// Maximum number of results returned.
    pub result_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_limit: RELATED_CANDIDATE_LIMIT,
            result_limit: RELATED_RESULT_LIMIT,
        }
    }
}

impl RetrievalConfig {
    /// Load from `ZETTEL_RELATED_CANDIDATES` and `ZETTEL_RELATED_LIMIT`.
    ///
    /// Missing, unparsable or non-positive values use the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            candidate_limit: std::env::var("ZETTEL_RELATED_CANDIDATES")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.candidate_limit),
            result_limit: std::env::var("ZETTEL_RELATED_LIMIT")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(defaults.result_limit),
        }
    }

    pub fn with_candidate_limit(mut self, limit: i64) -> Self {
        self.candidate_limit = limit.max(1);
        self
    }

    pub fn with_result_limit(mut self, limit: usize) -> Self {
        self.result_limit = limit.max(1);
        self
    }
}

/// Related-Card Retrieval.
#[derive(Clone)]
pub struct RelatedCards {
    ctx: EngineContext,
    links: LinkGraph,
    config: RetrievalConfig,
}

impl RelatedCards {
    pub fn new(ctx: EngineContext) -> Self {
        Self::with_config(ctx, RetrievalConfig::default())
    }

    pub fn with_config(ctx: EngineContext, config: RetrievalConfig) -> Self {
        Self {
            links: LinkGraph::new(ctx.clone()),
            ctx,
            config,
        }
    }

    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Cards similar to a stored card but not already linked to it.
    ///
    /// The source vector is the mean of the card's chunk vectors. A missing
    /// card or a card with no stored embedding yields an empty result.
    #[instrument(skip(self), fields(subsystem = "graph", component = "related", op = "related_to_card"))]
    pub async fn related_to_card(&self, owner_id: Uuid, card_pk: Uuid) -> Result<Vec<RelatedCard>> {
        let Some(card) = self.ctx.cards.fetch(owner_id, card_pk).await? else {
            debug!("Source card not visible");
            return Ok(Vec::new());
        };

        let stored = self.ctx.embeddings.for_card(owner_id, card_pk).await?;
        if stored.is_empty() {
            debug!(card_id = %card.card_id, "Source card has no embedding");
            return Ok(Vec::new());
        }

        let vectors: Vec<Vector> = stored.into_iter().map(|e| e.vector).collect();
        let source = mean_vector(&vectors).ok_or_else(|| {
            Error::Embedding(format!(
                "stored vectors of card {} have mismatched dimensions",
                card.card_id
            ))
        })?;

        self.related_to_card_with_vector(owner_id, &card, &source)
            .await
    }

    /// Cards similar to `vector`, excluding `card` and everything it is
    /// linked or related to.
    ///
    /// Candidates are scanned in similarity order and the scan stops at
    /// `result_limit` survivors.
    #[instrument(skip(self, card, vector), fields(subsystem = "graph", component = "related", op = "related_to_card_with_vector", card_id = %card.card_id))]
    pub async fn related_to_card_with_vector(
        &self,
        owner_id: Uuid,
        card: &Card,
        vector: &Vector,
    ) -> Result<Vec<RelatedCard>> {
        let start = Instant::now();
        let candidates = self
            .ctx
            .embeddings
            .nearest_chunks(owner_id, vector, Some(card.id), self.config.candidate_limit)
            .await?;
        let candidate_count = candidates.len();
        let filter = self.links.relation_filter(owner_id, card).await?;

        let mut results = Vec::with_capacity(self.config.result_limit);
        for hit in candidates {
            if results.len() >= self.config.result_limit {
                break;
            }
            if hit.card.id == card.id {
                continue;
            }
            if filter.is_linked_or_related(&hit.card) {
                debug!(candidate = %hit.card.card_id, "Candidate already related, skipped");
                continue;
            }
            results.push(RelatedCard::from(hit));
        }

        info!(
            candidate_count,
            result_count = results.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Related cards retrieved"
        );
        Ok(results)
    }

    /// Cards similar to free text, re-ranked by the scorer when configured.
    ///
    /// An empty query is rejected before any collaborator or store call. The
    /// scorer is called at most once and its failure fails the request.
    #[instrument(skip(self, query), fields(subsystem = "graph", component = "related", op = "related_to_query", query_len = query.len()))]
    pub async fn related_to_query(&self, owner_id: Uuid, query: &str) -> Result<Vec<RelatedCard>> {
        let start = Instant::now();
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query text is empty".to_string()));
        }

        let vector = self
            .ctx
            .embedder
            .embed_texts(&[query.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Embedding("no vector returned for query".to_string()))?;

        let candidates = self
            .ctx
            .embeddings
            .nearest_chunks(owner_id, &vector, None, self.config.candidate_limit)
            .await?;
        let candidate_count = candidates.len();

        let mut results = match &self.ctx.scorer {
            Some(scorer) if !candidates.is_empty() => {
                let summaries: Vec<CandidateSummary> =
                    candidates.iter().map(CandidateSummary::from).collect();
                let scores = scorer.score(query, &summaries).await?;
                rank_by_score(candidates, scores)?
            }
            _ => candidates.into_iter().map(RelatedCard::from).collect(),
        };
        results.truncate(self.config.result_limit);

        info!(
            candidate_count,
            result_count = results.len(),
            reranked = self.ctx.scorer.is_some(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Query retrieval complete"
        );
        Ok(results)
    }
}

/// Attach scores and sort descending. Equal scores keep similarity order.
fn rank_by_score(candidates: Vec<SimilarChunk>, scores: Vec<f32>) -> Result<Vec<RelatedCard>> {
    if scores.len() != candidates.len() {
        return Err(Error::Scoring(format!(
            "expected {} scores, got {}",
            candidates.len(),
            scores.len()
        )));
    }

    let mut ranked: Vec<RelatedCard> = candidates
        .into_iter()
        .zip(scores)
        .map(|(hit, score)| RelatedCard {
            score: Some(score),
            ..RelatedCard::from(hit)
        })
        .collect();
    ranked.sort_by(|a, b| {
        let a = a.score.unwrap_or(0.0);
        let b = b.score.unwrap_or(0.0);
        b.total_cmp(&a)
    });
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;
    use crate::test_support::TestEngine;
    use zettel_inference::mock::{MockInferenceBackend, ScriptedScorer};

    /// Seed `n` unrelated cards numbered from 100, all close to `[1, 0]`.
    fn seed_neighbours(t: &TestEngine, n: usize) -> Vec<Card> {
        (0..n)
            .map(|i| {
                let card = t.store.seed_card(t.owner, &format!("{}", 100 + i), "N", "");
                t.store
                    .seed_embedding(t.owner, card.id, vec![1.0, 0.01 * (i as f32 + 1.0)]);
                card
            })
            .collect()
    }

    #[test]
    fn test_default_config() {
        let config = RetrievalConfig::default();
        assert_eq!(config.candidate_limit, 50);
        assert_eq!(config.result_limit, 10);
    }

    #[test]
    fn test_config_builders_clamp() {
        let config = RetrievalConfig::default()
            .with_candidate_limit(0)
            .with_result_limit(3);
        assert_eq!(config.candidate_limit, 1);
        assert_eq!(config.result_limit, 3);
    }

    #[tokio::test]
    async fn test_never_returns_source_related_or_more_than_limit() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "see [2]");
        let linked = t.store.seed_card(t.owner, "2", "Linked", "");
        let child = t.store.seed_card(t.owner, "1/A", "Child", "");
        let backlinker = t.store.seed_card(t.owner, "3", "Backlinker", "[1]");
        t.ctx
            .links
            .replace_outgoing(t.owner, backlinker.id, &["1".to_string()])
            .await
            .unwrap();
        for card in [&source, &linked, &child, &backlinker] {
            t.store.seed_embedding(t.owner, card.id, vec![1.0, 0.0]);
        }
        seed_neighbours(&t, 15);

        let related = RelatedCards::new(t.ctx.clone());
        let results = related.related_to_card(t.owner, source.id).await.unwrap();

        assert_eq!(results.len(), 10);
        let excluded: HashSet<Uuid> = [source.id, linked.id, child.id, backlinker.id].into();
        assert!(results.iter().all(|r| !excluded.contains(&r.card.id)));
        assert!(results.iter().all(|r| r.score.is_none()));
    }

    #[tokio::test]
    async fn test_results_follow_similarity_order() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "");
        t.store.seed_embedding(t.owner, source.id, vec![1.0, 0.0]);
        let near = t.store.seed_card(t.owner, "2", "Near", "");
        t.store.seed_embedding(t.owner, near.id, vec![1.0, 0.1]);
        let far = t.store.seed_card(t.owner, "3", "Far", "");
        t.store.seed_embedding(t.owner, far.id, vec![0.0, 1.0]);

        let related = RelatedCards::new(t.ctx.clone());
        let results = related.related_to_card(t.owner, source.id).await.unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.card.id).collect();
        assert_eq!(ids, vec![near.id, far.id]);
    }

    #[tokio::test]
    async fn test_candidates_past_limit_never_considered() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "[100] [101]");
        t.store.seed_embedding(t.owner, source.id, vec![1.0, 0.0]);
        seed_neighbours(&t, 6);

        // Top 3 candidates are 100, 101, 102; two of them are direct links.
        let config = RetrievalConfig::default().with_candidate_limit(3);
        let related = RelatedCards::with_config(t.ctx.clone(), config);
        let results = related.related_to_card(t.owner, source.id).await.unwrap();

        let ids: Vec<&str> = results.iter().map(|r| r.card.card_id.as_str()).collect();
        assert_eq!(ids, vec!["102"]);
    }

    #[tokio::test]
    async fn test_card_without_embedding_is_empty() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "");
        seed_neighbours(&t, 3);

        let related = RelatedCards::new(t.ctx.clone());
        assert!(related
            .related_to_card(t.owner, source.id)
            .await
            .unwrap()
            .is_empty());
        assert!(related
            .related_to_card(t.owner, Uuid::now_v7())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_source_vector_is_mean_of_chunks() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "");
        t.store.seed_embedding(t.owner, source.id, vec![1.0, 0.0]);
        t.store.seed_embedding(t.owner, source.id, vec![0.0, 1.0]);
        let diagonal = t.store.seed_card(t.owner, "2", "Diagonal", "");
        t.store.seed_embedding(t.owner, diagonal.id, vec![1.0, 1.0]);
        let axis = t.store.seed_card(t.owner, "3", "Axis", "");
        t.store.seed_embedding(t.owner, axis.id, vec![1.0, 0.0]);

        let related = RelatedCards::new(t.ctx.clone());
        let results = related.related_to_card(t.owner, source.id).await.unwrap();
        assert_eq!(results[0].card.id, diagonal.id);
        assert!(results[0].distance.abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_store_failure_fails_retrieval() {
        let t = TestEngine::new();
        let source = t.store.seed_card(t.owner, "1", "Source", "");
        t.store.seed_embedding(t.owner, source.id, vec![1.0, 0.0]);
        t.store.set_fail_reads(true);

        let related = RelatedCards::new(t.ctx.clone());
        let err = related
            .related_to_card(t.owner, source.id)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Database(_)));
    }

    #[tokio::test]
    async fn test_empty_query_rejected_before_any_call() {
        let t = TestEngine::new();
        t.store.set_fail_reads(true);

        let related = RelatedCards::new(t.ctx.clone());
        for query in ["", "   \n"] {
            let err = related.related_to_query(t.owner, query).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)));
        }
        assert_eq!(t.embedder.embed_call_count(), 0);
    }

    fn query_engine(scorer: Option<ScriptedScorer>) -> (TestEngine, Vec<Card>) {
        let embedder = MockInferenceBackend::new()
            .with_dimension(2)
            .with_embedding("rust", vec![1.0, 0.0]);
        let mut t = TestEngine::with_embedder(embedder);
        if let Some(scorer) = scorer {
            t.ctx = t.ctx.clone().with_scorer(Arc::new(scorer));
        }
        let cards = [("1", vec![1.0, 0.0]), ("2", vec![1.0, 0.5]), ("3", vec![0.0, 1.0])]
            .into_iter()
            .map(|(id, v)| {
                let card = t.store.seed_card(t.owner, id, &format!("Card {}", id), "");
                t.store.seed_embedding(t.owner, card.id, v);
                card
            })
            .collect();
        (t, cards)
    }

    #[tokio::test]
    async fn test_query_without_scorer_keeps_similarity_order() {
        let (t, cards) = query_engine(None);
        let related = RelatedCards::new(t.ctx.clone());

        let results = related.related_to_query(t.owner, "rust").await.unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.card.id).collect();
        assert_eq!(ids, vec![cards[0].id, cards[1].id, cards[2].id]);
        assert_eq!(t.embedder.embed_call_count(), 1);
    }

    #[tokio::test]
    async fn test_query_reranked_by_single_scorer_call() {
        let scorer = ScriptedScorer::with_scores(vec![1.0, 9.0, 5.0]);
        let (t, cards) = query_engine(Some(scorer.clone()));
        let related = RelatedCards::new(t.ctx.clone());

        let results = related.related_to_query(t.owner, "rust").await.unwrap();
        let ids: Vec<Uuid> = results.iter().map(|r| r.card.id).collect();
        assert_eq!(ids, vec![cards[1].id, cards[2].id, cards[0].id]);
        assert_eq!(results[0].score, Some(9.0));

        assert_eq!(scorer.call_count(), 1);
        let (query, summaries) = &scorer.calls()[0];
        assert_eq!(query, "rust");
        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].title, "Card 1");
    }

    #[tokio::test]
    async fn test_scorer_failure_fails_query() {
        let (t, _) = query_engine(Some(ScriptedScorer::failing("model offline")));
        let related = RelatedCards::new(t.ctx.clone());

        let err = related.related_to_query(t.owner, "rust").await.unwrap_err();
        assert!(matches!(err, Error::Scoring(_)));
    }

    #[tokio::test]
    async fn test_scorer_count_mismatch_fails_query() {
        let (t, _) = query_engine(Some(ScriptedScorer::with_scores(vec![1.0])));
        let related = RelatedCards::new(t.ctx.clone());

        let err = related.related_to_query(t.owner, "rust").await.unwrap_err();
        assert!(matches!(err, Error::Scoring(_)));
    }

    #[tokio::test]
    async fn test_embedder_failure_fails_query() {
        let (t, _) = query_engine(None);
        t.embedder.fail_next(1);
        let related = RelatedCards::new(t.ctx.clone());

        let err = related.related_to_query(t.owner, "rust").await.unwrap_err();
        assert!(matches!(err, Error::Embedding(_)));
    }

    #[tokio::test]
    async fn test_query_result_limit() {
        let (t, _) = query_engine(None);
        let config = RetrievalConfig::default().with_result_limit(2);
        let related = RelatedCards::with_config(t.ctx.clone(), config);

        let results = related.related_to_query(t.owner, "rust").await.unwrap();
        assert_eq!(results.len(), 2);
    }
}
