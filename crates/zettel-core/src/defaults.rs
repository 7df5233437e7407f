//! Centralized default constants for the zettel engine.
//!
//! All crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// CARDS & TAGS
// =============================================================================

/// Colour assigned to tags created implicitly from a card body.
pub const TAG_COLOR: &str = "black";

/// Identifier returned for the first root card of an owner.
pub const FIRST_ROOT_IDENTIFIER: &str = "1";

/// Upper bound on parent-chain steps walked when collecting ancestor tags.
///
/// Real hierarchies are a handful of levels deep; the bound only matters for
/// corrupted parent links.
pub const MAX_ANCESTOR_DEPTH: usize = 256;

// =============================================================================
// RELATED-CARD RETRIEVAL
// =============================================================================

/// Number of nearest candidates pulled from the embedding store.
pub const RELATED_CANDIDATE_LIMIT: i64 = 50;

/// Maximum number of related cards returned.
pub const RELATED_RESULT_LIMIT: usize = 10;

/// Chunk rows fetched per wanted card in the first nearest-neighbour pass;
/// doubled while too few distinct cards come back.
pub const NEAREST_CHUNK_OVERFETCH: i64 = 4;

/// Ceiling for `hnsw.ef_search` (pgvector's maximum).
pub const HNSW_EF_SEARCH_MAX: i64 = 1_000;

// =============================================================================
// CHUNKING
// =============================================================================

/// Maximum characters per embedded chunk. Longer sentences are split.
pub const CHUNK_MAX_CHARS: usize = 1000;

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "mxbai-embed-large";

/// Default embedding vector dimension for mxbai-embed-large.
/// Must match the `vector(N)` column in the migrations.
pub const EMBED_DIMENSION: usize = 1024;

/// Default generation model used by the LLM relevance scorer.
pub const GEN_MODEL: &str = "llama3.1:8b";

/// Default Ollama endpoint.
pub const OLLAMA_URL: &str = "http://localhost:11434";

/// Timeout for embedding requests (seconds).
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Timeout for generation requests (seconds).
pub const GEN_TIMEOUT_SECS: u64 = 120;

/// Embedding calls slower than this are logged at WARN (milliseconds).
pub const EMBED_SLOW_MS: u64 = 5_000;

/// Generation calls slower than this are logged at WARN (milliseconds).
pub const GEN_SLOW_MS: u64 = 30_000;

// =============================================================================
// EMBEDDING WORKER
// =============================================================================

/// Number of concurrent embedding workers.
pub const EMBED_WORKERS: usize = 2;

/// Capacity of the embedding job queue.
pub const EMBED_QUEUE_CAPACITY: usize = 256;

/// Retries after the first failed attempt.
pub const EMBED_MAX_RETRIES: u32 = 3;

/// Upper limit accepted for the retry count.
pub const EMBED_MAX_RETRIES_LIMIT: u32 = 100;

/// Linear backoff step between retries (milliseconds).
pub const EMBED_RETRY_BACKOFF_MS: u64 = 2_000;

/// How long a `Succeeded` status stays visible before it is pruned (seconds).
pub const EMBED_STATUS_TTL_SECS: u64 = 3_600;

/// Capacity of the worker event broadcast channel.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// DATABASE
// =============================================================================

/// Default maximum number of connections in the pool.
pub const DB_MAX_CONNECTIONS: u32 = 10;

/// Default connection timeout in seconds.
pub const DB_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default idle timeout in seconds.
pub const DB_IDLE_TIMEOUT_SECS: u64 = 600;

/// Default maximum connection lifetime in seconds.
pub const DB_MAX_LIFETIME_SECS: u64 = 1800;
