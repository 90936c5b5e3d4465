//! # freyja-db
//!
//! PostgreSQL and filesystem backends for the Freyja storage layer.
//!
//! This crate provides:
//! - Connection pool management
//! - The primary metadata query service over `orm_resources`
//! - The background job queue over `job_queue`
//! - A filesystem storage adapter with BLAKE3 digests
//!
//! ## Example
//!
//! ```rust,ignore
//! use freyja_db::{Database, PoolConfig, ResourceFactory, StoreRole};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/freyja", PoolConfig::new(StoreRole::Primary)).await?;
//!     let primary = db.query_service(ResourceFactory::new());
//!
//!     let file_set = primary.find_by(&"fs-1".into()).await?;
//!     println!("{:?}", file_set.file_ids());
//!     Ok(())
//! }
//! ```
pub mod jobs;
pub mod pool;
pub mod query;
pub mod storage;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use freyja_core::*;

pub use jobs::PgJobRepository;
pub use pool::{PoolConfig, StoreRole};
pub use query::{model_aliases, PgQueryService, PgResourcePresence};
pub use storage::{storage_path, FilesystemStorage};

/// Combined database context.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Job repository for background processing.
    pub jobs: std::sync::Arc<PgJobRepository>,
    /// Id-presence lookups that bypass materialization.
    pub presence: PgResourcePresence,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            jobs: std::sync::Arc::new(PgJobRepository::new(pool.clone())),
            presence: PgResourcePresence::new(pool.clone()),
            pool,
        }
    }

    /// Connect to the metadata store `config.role` names.
    pub async fn connect(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = pool::connect(url, config).await?;
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

    /// Primary query service whose materializer runs through `factory`.
    pub fn query_service(&self, factory: ResourceFactory) -> PgQueryService {
        PgQueryService::new(self.pool.clone()).with_factory(factory)
    }
}
