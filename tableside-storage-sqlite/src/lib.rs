//! SQLite storage backend for tableside
//!
//! ```rust,ignore
//! use tableside_core::repositories::RepositoryProvider;
//! use tableside_storage_sqlite::SqliteRepositoryProvider;
//!
//! let provider = SqliteRepositoryProvider::connect("sqlite://tableside.db").await?;
//! provider.migrate().await?;
//! ```

pub mod migrations;
pub mod repositories;

pub use repositories::{SqliteOrderRepository, SqliteRepositoryProvider, SqliteSessionRepository};
pub use sqlx::SqlitePool;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tableside_core::{Error, error::StorageError};

impl SqliteRepositoryProvider {
    /// Open (creating if missing) the database at `url`.
    pub async fn connect(url: &str) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| Error::Storage(StorageError::Connection(e.to_string())))?
            .create_if_missing(true);

        // Each connection to an in-memory database sees its own empty database.
        let max_connections = if url.contains(":memory:") { 1 } else { 10 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, url, "Failed to open database");
                Error::Storage(StorageError::Connection(e.to_string()))
            })?;

        Ok(Self::new(pool))
    }
}
