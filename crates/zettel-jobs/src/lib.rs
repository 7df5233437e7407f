//! # zettel-jobs
//!
//! Background embedding recompute for the zettel engine.
//!
//! This crate provides:
//! - A bounded queue drained by a fixed number of worker tasks
//! - Retry with linear backoff and a per-attempt timeout
//! - Per-card status and lifecycle events via a broadcast channel
//! - An explicit staleness bound for stored embeddings
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use zettel_jobs::{EmbedCardHandler, EmbedWorkerConfig, EmbedWorkerPool};
//! use zettel_graph::{CardService, EngineContext};
//!
//! let embedder = Arc::new(OllamaBackend::from_env());
//! let handler = Arc::new(EmbedCardHandler::from_database(&db, embedder.clone()));
//! let pool = Arc::new(EmbedWorkerPool::spawn(EmbedWorkerConfig::from_env(), handler));
//!
//! let ctx = EngineContext::from_database(&db, embedder).with_scheduler(pool.clone());
//! let cards = CardService::new(ctx);
//!
//! // Listen for events
//! let mut events = pool.events();
//! while let Ok(event) = events.recv().await {
//!     println!("Event: {:?}", event);
//! }
//!
//! // Graceful shutdown
//! pool.shutdown().await;
//! ```

pub mod handler;
pub mod worker;

// Re-export core types
pub use zettel_core::*;

pub use handler::{EmbedCardHandler, JobContext, JobHandler, JobResult};
pub use worker::{EmbedEvent, EmbedStatus, EmbedWorkerConfig, EmbedWorkerPool};
