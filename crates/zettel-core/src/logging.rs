//! Structured logging field name constants for the zettel engine.
//!
//! All crates use these names so log aggregation can query the same field
//! across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, retry or slow collaborator |
//! | INFO  | Lifecycle events, completed rebuilds |
//! | DEBUG | Decision points (dropped references, filtered candidates) |
//! | TRACE | Per-item iteration |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "graph", "db", "inference", "jobs"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "links", "tags", "related", "ollama", "pool", "embed_worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "rebuild_references", "ancestor_tags", "related_to_card"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Owning user of the card or tag.
pub const OWNER_ID: &str = "owner_id";

/// Internal card identity.
pub const CARD_PK: &str = "card_pk";

/// Textual (hierarchical) card identifier.
pub const CARD_ID: &str = "card_id";

/// Query text for query-driven retrieval.
pub const QUERY: &str = "query";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned.
pub const RESULT_COUNT: &str = "result_count";

/// Number of candidates considered before filtering.
pub const CANDIDATE_COUNT: &str = "candidate_count";

/// Number of chunks embedded.
pub const CHUNK_COUNT: &str = "chunk_count";

/// Number of reference edges written.
pub const EDGE_COUNT: &str = "edge_count";

/// Number of tag memberships written.
pub const TAG_COUNT: &str = "tag_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";
