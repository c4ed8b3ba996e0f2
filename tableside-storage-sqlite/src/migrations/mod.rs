//! Versioned schema migrations tracked in `_tableside_migrations`.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait Migration: Send + Sync {
    /// Execute the migration
    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError>;

    /// Rollback the migration
    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64,
}

/// Every migration this backend knows about, in order.
pub fn all() -> Vec<Box<dyn Migration>> {
    vec![
        Box::new(CreateTableSessionsTable),
        Box::new(CreateOrdersTable),
        Box::new(CreateIndexes),
    ]
}

pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    const TABLE: &'static str = "_tableside_migrations";

    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the tracking table
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL
            )"#,
            Self::TABLE
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply pending migrations, each in its own transaction
    pub async fn up(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Applying migration"
            );

            migration.up(&mut *tx).await?;

            sqlx::query(&format!(
                "INSERT INTO {} (version, name, applied_at) VALUES (?, ?, ?)",
                Self::TABLE
            ))
            .bind(migration.version())
            .bind(migration.name())
            .bind(Utc::now().timestamp())
            .execute(&mut *tx)
            .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    /// Roll back applied migrations, newest first
    pub async fn down(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations.iter().rev() {
            if !self.is_applied(migration.version()).await? {
                continue;
            }

            let mut tx = self.pool.begin().await?;
            tracing::info!(
                version = migration.version(),
                name = migration.name(),
                "Rolling back migration"
            );

            migration.down(&mut *tx).await?;

            sqlx::query(&format!("DELETE FROM {} WHERE version = ?", Self::TABLE))
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;

            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn applied_migrations(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(&format!(
            "SELECT version, name, applied_at FROM {} ORDER BY version",
            Self::TABLE
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    pub async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let applied: bool = sqlx::query_scalar(&format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE version = ?)",
            Self::TABLE
        ))
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(applied)
    }
}

pub struct CreateTableSessionsTable;

#[async_trait]
impl Migration for CreateTableSessionsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateTableSessionsTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        // Timestamps are unix milliseconds.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS table_sessions (
                id TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                table_number INTEGER NOT NULL CHECK (table_number > 0),
                issued_by TEXT NOT NULL,
                state TEXT NOT NULL CHECK (state IN ('active', 'expired')),
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                expired_at INTEGER,
                was_used INTEGER NOT NULL DEFAULT 0,
                usage_count INTEGER NOT NULL DEFAULT 0,
                last_used_at INTEGER,
                retention_deadline INTEGER NOT NULL
            )"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS table_sessions")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateOrdersTable;

#[async_trait]
impl Migration for CreateOrdersTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreateOrdersTable"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        // Line items are stored as a JSON array.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS orders (
                id TEXT PRIMARY KEY,
                session_token TEXT NOT NULL,
                table_number INTEGER NOT NULL,
                items TEXT NOT NULL,
                total_cents INTEGER NOT NULL,
                status TEXT NOT NULL CHECK (status IN ('pending', 'preparing', 'served', 'cancelled')),
                notes TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS orders")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIndexes;

const INDEXES: &[(&str, &str)] = &[
    (
        "idx_table_sessions_token",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_table_sessions_token ON table_sessions(token)",
    ),
    (
        "idx_table_sessions_one_active",
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_table_sessions_one_active \
         ON table_sessions(table_number, issued_by) WHERE state = 'active'",
    ),
    (
        "idx_table_sessions_due",
        "CREATE INDEX IF NOT EXISTS idx_table_sessions_due ON table_sessions(state, expires_at)",
    ),
    (
        "idx_table_sessions_created_at",
        "CREATE INDEX IF NOT EXISTS idx_table_sessions_created_at ON table_sessions(created_at)",
    ),
    (
        "idx_orders_created_at",
        "CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at)",
    ),
    (
        "idx_orders_session_token",
        "CREATE INDEX IF NOT EXISTS idx_orders_session_token ON orders(session_token)",
    ),
];

#[async_trait]
impl Migration for CreateIndexes {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        for (_, statement) in INDEXES {
            sqlx::query(*statement).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn down<'a>(&'a self, conn: &'a mut SqliteConnection) -> Result<(), MigrationError> {
        for (name, _) in INDEXES {
            sqlx::query(&format!("DROP INDEX IF EXISTS {name}"))
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}
