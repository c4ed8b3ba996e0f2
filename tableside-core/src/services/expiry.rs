//! Session expiry enforcement
//!
//! Sessions leave the `active` state in two ways: passively, when a read finds a session whose
//! `expires_at` has passed, and actively, through a background sweep over the whole collection.
//! Both paths go through the same conditional store update, so however many callers race on a
//! session, exactly one of them observes the transition and announces `session:expired`.
//!
//! A second, slower task purges expired sessions that were never scanned once their retention
//! deadline has passed.

use std::{sync::Arc, time::Duration};

use crate::{
    Error,
    clock::Clock,
    error::utilities::with_store_timeout,
    events::{Event, EventPublisher},
    repositories::SessionRepository,
    session::{SessionToken, TableSession},
};

// tokio intervals panic on a zero period
const MIN_TICK: Duration = Duration::from_millis(100);

/// Timing for the background tasks.
#[derive(Debug, Clone)]
pub struct ExpiryConfig {
    /// How often the sweep looks for due sessions
    pub sweep_interval: Duration,
    /// Upper bound for a single batch round-trip
    pub batch_timeout: Duration,
    /// Maximum sessions transitioned per batch
    pub batch_size: usize,
    /// How often expired, unused sessions are purged
    pub retention_sweep_interval: Duration,
    /// Upper bound for the inline check done on reads
    pub store_timeout: Duration,
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            batch_timeout: Duration::from_secs(10),
            batch_size: 500,
            retention_sweep_interval: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(5),
        }
    }
}

pub struct ExpiryEnforcer<S: SessionRepository> {
    repository: Arc<S>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: ExpiryConfig,
}

impl<S: SessionRepository> Clone for ExpiryEnforcer<S> {
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            publisher: Arc::clone(&self.publisher),
            clock: Arc::clone(&self.clock),
            config: self.config.clone(),
        }
    }
}

impl<S: SessionRepository> ExpiryEnforcer<S> {
    pub fn new(
        repository: Arc<S>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: ExpiryConfig,
    ) -> Self {
        Self {
            repository,
            publisher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ExpiryConfig {
        &self.config
    }

    /// Look up a session by token, expiring it first if it is due.
    ///
    /// The returned record reflects the state after the check, so an `active` result is valid at
    /// the enforcer's current time.
    pub async fn resolve(&self, token: &SessionToken) -> Result<Option<TableSession>, Error> {
        let timeout = self.config.store_timeout;
        let Some(session) =
            with_store_timeout(timeout, "find session", self.repository.find_by_token(token))
                .await?
        else {
            return Ok(None);
        };

        let now = self.clock.now();
        if !session.is_due_for_expiry(now) {
            return Ok(Some(session));
        }

        match with_store_timeout(
            timeout,
            "expire session",
            self.repository.expire_if_due(token, now),
        )
        .await?
        {
            Some(expired) => {
                self.announce_expired(&expired, "passive");
                Ok(Some(expired))
            }
            // Someone else won the transition; read back what they wrote.
            None => {
                with_store_timeout(timeout, "find session", self.repository.find_by_token(token))
                    .await
            }
        }
    }

    /// Passive bulk check: bring every due session up to date before a listing is answered.
    pub async fn expire_due_now(&self) -> Result<usize, Error> {
        self.run_expiry_batches(self.config.store_timeout).await
    }

    /// One pass of the active sweep.
    pub async fn sweep_once(&self) -> Result<usize, Error> {
        self.run_expiry_batches(self.config.batch_timeout).await
    }

    async fn run_expiry_batches(&self, timeout: Duration) -> Result<usize, Error> {
        let batch_size = self.config.batch_size.max(1);
        let mut total = 0;

        loop {
            let now = self.clock.now();
            let expired = with_store_timeout(
                timeout,
                "expire due sessions",
                self.repository.expire_due(now, batch_size),
            )
            .await?;

            let count = expired.len();
            for session in &expired {
                self.announce_expired(session, "sweep");
            }
            total += count;

            if count < batch_size {
                return Ok(total);
            }
        }
    }

    /// Delete expired sessions that were never used and whose retention deadline has passed.
    pub async fn purge_retention_once(&self) -> Result<usize, Error> {
        let now = self.clock.now();
        let purged = with_store_timeout(
            self.config.batch_timeout,
            "purge retained sessions",
            self.repository.purge_retained(now),
        )
        .await?;

        for session in &purged {
            self.publisher.publish(Event::SessionDeleted(session.clone()));
        }
        Ok(purged.len())
    }

    fn announce_expired(&self, session: &TableSession, path: &'static str) {
        tracing::debug!(
            session_id = %session.id,
            table = session.table_number,
            path,
            "Session expired"
        );
        self.publisher.publish(Event::SessionExpired(session.clone()));
    }

    /// Start the periodic expiry sweep.
    ///
    /// Failures are logged and the sweep tries again on the next tick. The task exits when
    /// `shutdown` changes.
    pub fn start_sweep_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let enforcer = self.clone();
        let period = self.config.sweep_interval.max(MIN_TICK);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match enforcer.sweep_once().await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Expired due table sessions");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Session expiry sweep failed");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down session expiry sweep");
                        break;
                    }
                }
            }
        })
    }

    /// Start the periodic purge of unused, expired sessions.
    pub fn start_retention_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let enforcer = self.clone();
        let period = self.config.retention_sweep_interval.max(MIN_TICK);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(period);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match enforcer.purge_retention_once().await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Purged unused expired sessions");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Session retention purge failed");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down session retention purge");
                        break;
                    }
                }
            }
        })
    }
}
