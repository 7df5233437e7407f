//! Mock inference backend for deterministic testing.
//!
//! Provides mock implementations of the embedding, generation and scoring
//! collaborators that produce deterministic output for tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use zettel_inference::mock::{MockInferenceBackend, ScriptedScorer};
//!
//! let backend = MockInferenceBackend::new()
//!     .with_dimension(8)
//!     .with_embedding("rust", vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
//! let scorer = ScriptedScorer::with_scores(vec![3.0, 9.0]);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use zettel_core::{
    CandidateSummary, EmbeddingBackend, Error, GenerationBackend, RelevanceScorer, Result, Vector,
};

/// Mock inference backend for testing.
#[derive(Clone)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
    remaining_failures: Arc<AtomicUsize>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    fixed_embeddings: HashMap<String, Vec<f32>>,
    fixed_responses: HashMap<String, String>,
    default_response: String,
}

#[derive(Debug, Clone)]
struct MockCall {
    operation: &'static str,
    input: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 8,
            fixed_embeddings: HashMap::new(),
            fixed_responses: HashMap::new(),
            default_response: "Mock response".to_string(),
        }
    }
}

impl MockInferenceBackend {
    /// Create a new mock backend with default configuration.
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            call_log: Arc::new(Mutex::new(Vec::new())),
            remaining_failures: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Return `vector` whenever `text` is embedded.
    pub fn with_embedding(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed_embeddings
            .insert(text.into(), vector);
        self
    }

    /// Set a fixed response for generation requests.
    pub fn with_fixed_response(mut self, response: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.config).default_response = response.into();
        self
    }

    /// Add a response mapping for specific prompts.
    pub fn with_response_mapping(
        mut self,
        input: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Arc::make_mut(&mut self.config)
            .fixed_responses
            .insert(input.into(), output.into());
        self
    }

    /// Fail the next `n` calls, then succeed.
    pub fn fail_next(&self, n: usize) {
        self.remaining_failures.store(n, Ordering::SeqCst);
    }

    /// Texts passed to every embed call, in call order.
    pub fn embedded_inputs(&self) -> Vec<String> {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == "embed")
            .map(|c| c.input.clone())
            .collect()
    }

    /// Get number of embed calls.
    pub fn embed_call_count(&self) -> usize {
        self.call_count("embed")
    }

    /// Get number of generation calls.
    pub fn generate_call_count(&self) -> usize {
        self.call_count("generate")
    }

    fn call_count(&self, operation: &str) -> usize {
        self.call_log
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    fn log_call(&self, operation: &'static str, input: &str) {
        self.call_log.lock().unwrap().push(MockCall {
            operation,
            input: input.to_string(),
        });
    }

    fn should_fail(&self) -> bool {
        self.remaining_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn vector_for(&self, text: &str) -> Vec<f32> {
        self.config
            .fixed_embeddings
            .get(text)
            .cloned()
            .unwrap_or_else(|| MockEmbeddingGenerator::generate(text, self.config.dimension))
    }
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockInferenceBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        self.log_call("embed", &texts.join("\n"));

        if self.should_fail() {
            return Err(Error::Embedding("Simulated failure for testing".to_string()));
        }

        Ok(texts
            .iter()
            .map(|t| Vector::from(self.vector_for(t)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        "mock-embed"
    }
}

#[async_trait]
impl GenerationBackend for MockInferenceBackend {
    async fn generate_with_system(&self, _system: &str, prompt: &str) -> Result<String> {
        self.log_call("generate", prompt);

        if self.should_fail() {
            return Err(Error::Inference("Simulated failure for testing".to_string()));
        }

        if let Some(response) = self.config.fixed_responses.get(prompt) {
            return Ok(response.clone());
        }
        Ok(self.config.default_response.clone())
    }

    fn model_name(&self) -> &str {
        "mock-gen"
    }
}

/// Relevance scorer returning scripted scores.
#[derive(Clone)]
pub struct ScriptedScorer {
    outcome: std::result::Result<Vec<f32>, String>,
    calls: Arc<Mutex<Vec<(String, Vec<CandidateSummary>)>>>,
}

impl ScriptedScorer {
    /// Return `scores` on every call, regardless of candidate count.
    pub fn with_scores(scores: Vec<f32>) -> Self {
        Self {
            outcome: Ok(scores),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Fail every call with a scoring error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            outcome: Err(message.into()),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of times the scorer was invoked.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Candidates passed on each invocation.
    pub fn calls(&self) -> Vec<(String, Vec<CandidateSummary>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RelevanceScorer for ScriptedScorer {
    async fn score(&self, query: &str, candidates: &[CandidateSummary]) -> Result<Vec<f32>> {
        self.calls
            .lock()
            .unwrap()
            .push((query.to_string(), candidates.to_vec()));
        self.outcome.clone().map_err(Error::Scoring)
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic embedding from text.
    ///
    /// Uses character-based hashing for reproducibility. The same text
    /// will always produce the same embedding.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let dimension = dimension.max(1);
        let mut vec = vec![0.0; dimension];

        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % dimension;
            vec[idx] += 0.1;
        }

        Self::normalize(&mut vec);
        vec
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }
}
