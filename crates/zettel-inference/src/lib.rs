//! # zettel-inference
//!
//! Embedding, generation and relevance-scoring collaborators for the zettel
//! engine.
//!
//! This crate provides:
//! - Ollama implementation of the embedding and generation backends (default)
//! - An LLM-backed relevance scorer for query-driven retrieval
//! - Deterministic mock backends for tests (feature `mock`)
//!
//! # Feature Flags
//!
//! - `ollama` (default): Enable Ollama backend
//! - `mock`: Enable mock backends
//!
//! # Example
//!
//! ```rust,no_run
//! use zettel_inference::OllamaBackend;
//! use zettel_core::EmbeddingBackend;
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = OllamaBackend::from_env();
//!     let texts = vec!["Hello".to_string()];
//!     let embeddings = backend.embed_texts(&texts).await.unwrap();
//! }
//! ```

pub mod scorer;

#[cfg(feature = "ollama")]
pub mod ollama;

// Mock inference backend for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export core traits
pub use zettel_core::{EmbeddingBackend, GenerationBackend, RelevanceScorer};

pub use scorer::{parse_scores, LlmRelevanceScorer};

#[cfg(feature = "ollama")]
pub use ollama::OllamaBackend;
