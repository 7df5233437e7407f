//! # zettel-db
//!
//! PostgreSQL + pgvector database layer for the zettel engine.
//!
//! This crate provides:
//! - Connection pool management
//! - Repository implementations for cards, reference edges, tags and chunk
//!   embeddings
//! - Cosine-distance similarity queries with pgvector
//!
//! ## Example
//!
//! ```rust,ignore
//! use zettel_db::{CardRepository, Database};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/zettel").await?;
//!     let next = db.cards.max_numeric_identifier(owner_id).await?;
//!     println!("Largest root: {:?}", next);
//!     Ok(())
//! }
//! ```
pub mod cards;
pub mod embeddings;
pub mod links;
pub mod pool;
pub mod tags;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use zettel_core::*;

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// Re-export repository implementations
pub use cards::PgCardRepository;
pub use embeddings::PgEmbeddingRepository;
pub use links::PgLinkRepository;
pub use pool::{create_pool_with_config, PoolConfig};
pub use tags::PgTagRepository;

/// Combined database context with all repositories.
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Card repository.
    pub cards: PgCardRepository,
    /// Reference edge repository.
    pub links: PgLinkRepository,
    /// Tag and membership repository.
    pub tags: PgTagRepository,
    /// Chunk embedding repository.
    pub embeddings: PgEmbeddingRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            cards: PgCardRepository::new(pool.clone()),
            links: PgLinkRepository::new(pool.clone()),
            tags: PgTagRepository::new(pool.clone()),
            embeddings: PgEmbeddingRepository::new(pool.clone()),
            pool,
        }
    }

    /// Connect using pool settings from the environment.
    pub async fn connect(url: &str) -> Result<Self> {
        Self::connect_with_config(url, PoolConfig::from_env()).await
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}

impl Clone for Database {
    fn clone(&self) -> Self {
        Self::new(self.pool.clone())
    }
}
