//! Repository implementations for SQLite storage
//!
//! Every conditional mutation is a single `UPDATE`/`DELETE ... RETURNING` statement, so the
//! guard and the write cannot interleave with another writer.

pub mod order;
pub mod session;

pub use order::SqliteOrderRepository;
pub use session::SqliteSessionRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{fmt::Display, sync::Arc};
use tableside_core::{
    Error,
    error::StorageError,
    repositories::{OrderRepositoryProvider, RepositoryProvider, SessionRepositoryProvider},
};

use crate::migrations::{self, SqliteMigrationManager};

/// Repository provider implementation for SQLite
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    session: Arc<SqliteSessionRepository>,
    order: Arc<SqliteOrderRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let session = Arc::new(SqliteSessionRepository::new(pool.clone()));
        let order = Arc::new(SqliteOrderRepository::new(pool.clone()));

        Self {
            pool,
            session,
            order,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl SessionRepositoryProvider for SqliteRepositoryProvider {
    type SessionRepo = SqliteSessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.session
    }
}

impl OrderRepositoryProvider for SqliteRepositoryProvider {
    type OrderRepo = SqliteOrderRepository;

    fn order(&self) -> &Self::OrderRepo {
        &self.order
    }
}

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        manager.up(&migrations::all()).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Unavailable(e.to_string())))?;
        Ok(())
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>, Error> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| corrupt("timestamp", format!("{millis} is out of range")))
}

/// A stored value that no longer decodes into its domain type.
pub(crate) fn corrupt(field: &str, e: impl Display) -> Error {
    tracing::error!(field, error = %e, "Undecodable row");
    Error::Storage(StorageError::Database(format!("Invalid stored {field}: {e}")))
}

/// Map a write failure, keeping unique-index violations distinguishable.
pub(crate) fn map_write_err(context: &str, e: sqlx::Error) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            Error::Storage(StorageError::Constraint(format!("{context}: {db}")))
        }
        _ => Error::Storage(StorageError::Database(format!("{context}: {e}"))),
    }
}
