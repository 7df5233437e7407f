//! # zettel-core
//!
//! Core types, traits, and card-graph primitives for the zettel engine.
//!
//! This crate provides the data model, the repository and collaborator
//! traits the engine is written against, and the pure functions that do not
//! need a store: identifier parsing, body markup extraction and chunking.

pub mod chunking;
pub mod defaults;
pub mod error;
pub mod extraction;
pub mod hierarchy;
pub mod logging;
pub mod models;
pub mod traits;

#[cfg(any(test, feature = "mock"))]
pub mod memory;

// Re-export commonly used types at crate root
pub use chunking::{chunk_card, chunk_card_default};
pub use error::{Error, Result};
pub use extraction::{extract_hashtags, extract_references};
pub use hierarchy::parent_identifier;
pub use models::*;
pub use traits::*;
