//! LLM-backed relevance scorer for query-driven retrieval.
//!
//! The model is asked to rate every `"title - chunk"` candidate from 0 to 10
//! and to answer with comma-separated numbers only.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, instrument};

use zettel_core::{CandidateSummary, Error, GenerationBackend, RelevanceScorer, Result};

const SYSTEM_PROMPT: &str =
    "You are a search result scoring assistant. Only respond with comma-separated numbers.";

/// Relevance scorer that prompts a generation backend.
pub struct LlmRelevanceScorer {
    backend: Arc<dyn GenerationBackend>,
}

impl LlmRelevanceScorer {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        Self { backend }
    }
}

/// Build the rating prompt for a query and its candidates.
pub fn build_prompt(query: &str, candidates: &[CandidateSummary]) -> String {
    let documents = candidates
        .iter()
        .map(|c| format!("{} - {}", c.title, c.chunk))
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        r#"Given the search query "{query}", rate the relevance of each document on a scale of 0-10. You are being provided with a number of documents in the form of "title - chunk".

Consider how well each document matches the query's intent and content. A 10, or close to it,
means the document matches the query. A 0, or close to it, means it is unrelated.
Weigh the title most heavily: if the query names a subject and a document is titled with that
subject, it should be rated highest.
Only respond with numbers separated by commas, like: 8.5,7.2,6.8

Documents to rate:
{documents}"#
    )
}

/// Parse a comma-separated score list.
///
/// Entries that are not finite numbers score 0. The result has one entry per
/// comma-separated field, so a malformed reply can have the wrong length.
pub fn parse_scores(response: &str) -> Vec<f32> {
    response
        .trim()
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .ok()
                .filter(|s| s.is_finite())
                .unwrap_or(0.0)
        })
        .collect()
}

#[async_trait]
impl RelevanceScorer for LlmRelevanceScorer {
    #[instrument(skip(self, query, candidates), fields(subsystem = "inference", component = "scorer", op = "score", candidate_count = candidates.len()))]
    async fn score(&self, query: &str, candidates: &[CandidateSummary]) -> Result<Vec<f32>> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let prompt = build_prompt(query, candidates);
        let reply = self
            .backend
            .generate_with_system(SYSTEM_PROMPT, &prompt)
            .await
            .map_err(|e| Error::Scoring(e.to_string()))?;

        let scores = parse_scores(&reply);
        debug!(
            result_count = scores.len(),
            model = self.backend.model_name(),
            "Scores parsed"
        );
        Ok(scores)
    }
}
