//! Builder pattern for constructing Tableside instances
//!
//! The builder checks at compile time that storage is configured before [`Tableside`] is built.
//!
//! # Example
//!
//! ```rust,no_run
//! use tableside::{EngineConfig, TablesideBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tableside = TablesideBuilder::new()
//!         .with_sqlite("sqlite://tableside.db")
//!         .await?
//!         .with_config(EngineConfig::default().base_url("https://menu.example.com"))
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use tableside_core::{
    Broadcaster, Clock, InMemoryRepositoryProvider, SystemClock, repositories::RepositoryProvider,
};

use crate::{EngineConfig, Tableside};

/// Errors that can occur when building a Tableside instance.
#[derive(Debug, thiserror::Error)]
pub enum TablesideBuilderError {
    /// Failed to connect to storage backend
    #[error("Storage connection failed: {0}")]
    StorageConnection(String),

    /// Failed to run database migrations
    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Marker type indicating no storage has been configured yet.
pub struct NoStorage;

/// Marker type indicating storage has been configured.
pub struct WithStorage<R: RepositoryProvider> {
    repositories: Arc<R>,
}

/// A type-safe builder for constructing [`Tableside`] instances.
///
/// # Type States
///
/// - [`NoStorage`]: Initial state, storage must be configured
/// - [`WithStorage<R>`]: Storage configured, ready to build
pub struct TablesideBuilder<Storage> {
    storage: Storage,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    apply_migrations: bool,
}

impl Default for TablesideBuilder<NoStorage> {
    fn default() -> Self {
        Self::new()
    }
}

impl TablesideBuilder<NoStorage> {
    /// Create a new builder with [`EngineConfig::default`], the system clock and no automatic
    /// migrations.
    pub fn new() -> Self {
        Self {
            storage: NoStorage,
            config: EngineConfig::default(),
            clock: Arc::new(SystemClock),
            apply_migrations: false,
        }
    }

    /// Use an existing repository provider.
    pub fn with_repositories<R: RepositoryProvider>(
        self,
        repositories: Arc<R>,
    ) -> TablesideBuilder<WithStorage<R>> {
        TablesideBuilder {
            storage: WithStorage { repositories },
            config: self.config,
            clock: self.clock,
            apply_migrations: self.apply_migrations,
        }
    }

    /// Keep all state in process memory.
    pub fn with_in_memory(self) -> TablesideBuilder<WithStorage<InMemoryRepositoryProvider>> {
        self.with_repositories(Arc::new(InMemoryRepositoryProvider::new()))
    }
}

#[cfg(feature = "sqlite")]
impl TablesideBuilder<NoStorage> {
    /// Configure SQLite storage by connecting to the given URL.
    ///
    /// * `url` - SQLite connection URL (e.g., "sqlite::memory:" or "sqlite://path/to/db.sqlite")
    pub async fn with_sqlite(
        self,
        url: &str,
    ) -> Result<TablesideBuilder<WithStorage<crate::SqliteRepositoryProvider>>, TablesideBuilderError>
    {
        let provider = crate::SqliteRepositoryProvider::connect(url)
            .await
            .map_err(|e| TablesideBuilderError::StorageConnection(e.to_string()))?;

        Ok(self.with_repositories(Arc::new(provider)))
    }

    /// Configure SQLite storage with an existing connection pool.
    pub fn with_sqlite_pool(
        self,
        pool: crate::SqlitePool,
    ) -> TablesideBuilder<WithStorage<crate::SqliteRepositoryProvider>> {
        self.with_repositories(Arc::new(crate::SqliteRepositoryProvider::new(pool)))
    }
}

impl<Storage> TablesideBuilder<Storage> {
    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Run pending migrations during [`TablesideBuilder::build`].
    pub fn apply_migrations(mut self, apply: bool) -> Self {
        self.apply_migrations = apply;
        self
    }
}

impl<R: RepositoryProvider> TablesideBuilder<WithStorage<R>> {
    pub async fn build(self) -> Result<Tableside<R>, TablesideBuilderError> {
        let repositories = self.storage.repositories;

        if self.apply_migrations {
            repositories
                .migrate()
                .await
                .map_err(|e| TablesideBuilderError::Migration(e.to_string()))?;
        }

        Ok(Tableside::assemble(
            repositories,
            Broadcaster::new(),
            self.clock,
            self.config,
        ))
    }
}
