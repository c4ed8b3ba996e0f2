//! # Tableside
//!
//! Tableside runs the lifecycle of restaurant table sessions. A waiter opens a short-lived
//! session for a table and shows its QR code; customers who scan it can place orders until the
//! session expires. Every change is pushed in real time to the staff dashboards and to the
//! devices at the table.
//!
//! - Sessions are issued with a 256-bit random token, one active session per table and staff
//!   member, and expire both lazily on access and through a background sweep.
//! - Orders are accepted only while their session is active and move through
//!   `pending → preparing → served`, or are cancelled while still pending.
//! - Events fan out through an in-process [`Broadcaster`] to role, table and user rooms.
//! - Analytics are computed on demand over calendar windows.
//!
//! ## Storage Support
//!
//! - SQLite (feature `sqlite`, enabled by default)
//! - In-memory, for tests and single-process deployments
//!
//! ## Example
//!
//! ```rust,no_run
//! use tableside::{StaffId, TablesideBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tableside = TablesideBuilder::new()
//!         .with_sqlite("sqlite::memory:")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let qr = tableside.issue_session(12, &StaffId::new("waiter-1")).await?;
//!     println!("Scan {}", qr.qr_url);
//!     Ok(())
//! }
//! ```
use std::sync::Arc;

use tableside_core::{
    repositories::{OrderRepositoryAdapter, RepositoryProvider, SessionRepositoryAdapter},
    services::{AnalyticsService, ExpiryEnforcer, OrderService, SessionService},
};
use tokio::{sync::watch, task::JoinHandle};

mod builder;
mod config;

pub use builder::{NoStorage, TablesideBuilder, TablesideBuilderError, WithStorage};
pub use config::EngineConfig;

/// Re-export core types from tableside_core
pub use tableside_core::{
    Broadcaster, Clock, ConnectionIdentity, Error, Event, EventPublisher, InMemoryRepositoryProvider,
    LineItem, ManualClock, Order, OrderFilter, OrderId, OrderStatus, Role, Rollup,
    SessionFilter, SessionId, SessionQr, SessionState, SessionToken, StaffAuthenticator, StaffId,
    StaffIdentity, Stats, Subscription, SystemClock, TableSession, TimeRange,
    analytics::{IssuerBreakdown, TableBreakdown},
    events::Room,
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use tableside_storage_sqlite::{SqlitePool, SqliteRepositoryProvider};

type Sessions<R> = SessionRepositoryAdapter<R>;
type Orders<R> = OrderRepositoryAdapter<R>;

/// The engine: storage, services and the event broadcaster wired together.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct Tableside<R: RepositoryProvider> {
    repositories: Arc<R>,
    broadcaster: Broadcaster,
    clock: Arc<dyn Clock>,
    enforcer: Arc<ExpiryEnforcer<Sessions<R>>>,
    session_service: Arc<SessionService<Sessions<R>>>,
    order_service: Arc<OrderService<Sessions<R>, Orders<R>>>,
    analytics_service: Arc<AnalyticsService<Sessions<R>, Orders<R>>>,
    config: EngineConfig,
}

impl<R: RepositoryProvider> Tableside<R> {
    /// Create an engine with default settings and the system clock.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::assemble(
            repositories,
            Broadcaster::new(),
            Arc::new(SystemClock),
            EngineConfig::default(),
        )
    }

    /// Replace the engine configuration.
    pub fn with_config(self, config: EngineConfig) -> Self {
        Self::assemble(self.repositories, self.broadcaster, self.clock, config)
    }

    /// Replace the clock, e.g. with a [`ManualClock`] in tests.
    pub fn with_clock(self, clock: Arc<dyn Clock>) -> Self {
        Self::assemble(self.repositories, self.broadcaster, clock, self.config)
    }

    fn assemble(
        repositories: Arc<R>,
        broadcaster: Broadcaster,
        clock: Arc<dyn Clock>,
        config: EngineConfig,
    ) -> Self {
        let session_repo = Arc::new(SessionRepositoryAdapter::new(repositories.clone()));
        let order_repo = Arc::new(OrderRepositoryAdapter::new(repositories.clone()));
        let publisher: Arc<dyn EventPublisher> = Arc::new(broadcaster.clone());

        let enforcer = Arc::new(ExpiryEnforcer::new(
            session_repo.clone(),
            publisher.clone(),
            clock.clone(),
            config.expiry(),
        ));
        let session_service = Arc::new(SessionService::new(
            session_repo.clone(),
            enforcer.clone(),
            publisher.clone(),
            clock.clone(),
            config.session(),
        ));
        let order_service = Arc::new(OrderService::new(
            order_repo.clone(),
            enforcer.clone(),
            publisher,
            clock.clone(),
            config.store_timeout,
        ));
        let analytics_service = Arc::new(AnalyticsService::new(
            session_repo,
            order_repo,
            clock.clone(),
            config.analytics(),
        ));

        Self {
            repositories,
            broadcaster,
            clock,
            enforcer,
            session_service,
            order_service,
            analytics_service,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// The broadcaster real-time connections subscribe to.
    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Register a real-time connection in the rooms its identity grants.
    pub fn subscribe(&self, identity: &ConnectionIdentity) -> Subscription {
        self.broadcaster.subscribe(identity)
    }

    /// Run migrations for all repositories
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Health check for all repositories
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    /// Start the expiry sweep and the retention purge.
    ///
    /// Both tasks stop when `shutdown` changes; await the handles to wait for them.
    pub fn start_background_tasks(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            sweep_interval_ms = self.config.sweep_interval.as_millis() as u64,
            retention_sweep_interval_ms = self.config.retention_sweep_interval.as_millis() as u64,
            "Starting session background tasks"
        );
        vec![
            self.enforcer.start_sweep_task(shutdown.clone()),
            self.enforcer.start_retention_task(shutdown),
        ]
    }

    /// Run one expiry sweep and one retention purge, returning `(expired, purged)`.
    pub async fn sweep(&self) -> Result<(usize, usize), Error> {
        let expired = self.enforcer.sweep_once().await?;
        let purged = self.enforcer.purge_retention_once().await?;
        Ok((expired, purged))
    }

    // Sessions

    /// Open a session for `table_number`, superseding the issuer's previous one for that table.
    pub async fn issue_session(
        &self,
        table_number: u32,
        issued_by: &StaffId,
    ) -> Result<SessionQr, Error> {
        self.session_service.issue(table_number, issued_by).await
    }

    /// Validate a scanned token, counting the scan.
    pub async fn validate_session(&self, token: &str) -> Result<TableSession, Error> {
        self.session_service.validate(token).await
    }

    /// Validate a token without counting it as a scan.
    pub async fn check_session(&self, token: &str) -> Result<TableSession, Error> {
        self.session_service.check(token).await
    }

    pub async fn get_session(&self, id: &SessionId) -> Result<TableSession, Error> {
        self.session_service.get(id).await
    }

    pub async fn list_sessions(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error> {
        self.session_service.list(filter).await
    }

    pub async fn expire_session(&self, id: &SessionId) -> Result<TableSession, Error> {
        self.session_service.expire(id).await
    }

    /// Delete unused, non-active sessions created more than `days` days ago.
    pub async fn cleanup_sessions(&self, days: i64) -> Result<usize, Error> {
        self.session_service.cleanup(days).await
    }

    // Orders

    pub async fn place_order(
        &self,
        token: &str,
        items: Vec<LineItem>,
        notes: Option<String>,
    ) -> Result<Order, Error> {
        self.order_service.place_order(token, items, notes).await
    }

    pub async fn update_order_status(
        &self,
        id: &OrderId,
        status: OrderStatus,
    ) -> Result<Order, Error> {
        self.order_service.update_status(id, status).await
    }

    pub async fn cancel_order(&self, id: &OrderId) -> Result<Order, Error> {
        self.order_service.cancel(id).await
    }

    pub async fn get_order(&self, id: &OrderId) -> Result<Order, Error> {
        self.order_service.get(id).await
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error> {
        self.order_service.list(filter).await
    }

    // Analytics

    pub async fn analytics(&self, range: TimeRange) -> Result<Rollup, Error> {
        self.analytics_service.summarize(range).await
    }

    pub async fn top_tables(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<TableBreakdown>, Error> {
        self.analytics_service.top_tables(range, limit).await
    }

    pub async fn issuer_performance(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<IssuerBreakdown>, Error> {
        self.analytics_service.issuer_performance(range, limit).await
    }

    pub async fn stats(&self) -> Result<Stats, Error> {
        self.analytics_service.stats().await
    }
}
