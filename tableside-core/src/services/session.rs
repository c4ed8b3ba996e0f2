//! Session issuance, validation and administration
//!
//! ```rust,ignore
//! let qr = sessions.issue(12, &StaffId::new("waiter-3")).await?;
//! // render qr.qr_url as a QR code for table 12
//!
//! let session = sessions.validate(token_from_url).await?; // counts as a scan
//! ```

use std::{sync::Arc, time::Duration};

use chrono::Duration as ChronoDuration;

use crate::{
    Error,
    clock::Clock,
    error::{SessionError, StorageError, utilities::with_store_timeout},
    events::{Event, EventPublisher},
    id::validate_prefixed_id,
    repositories::SessionRepository,
    services::expiry::ExpiryEnforcer,
    session::{SessionId, SessionQr, SessionToken, TableSession},
    staff::StaffId,
    storage::SessionFilter,
    validation::{validate_cleanup_days, validate_staff_id, validate_table_number},
};

/// Issuance settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Lifetime of a newly issued session
    pub ttl: ChronoDuration,
    /// How long an unused session is kept after it expires
    pub retention: ChronoDuration,
    /// Prefix of the URL encoded into QR codes
    pub base_url: String,
    pub store_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: ChronoDuration::minutes(30),
            retention: ChronoDuration::days(7),
            base_url: "http://localhost:5173".to_string(),
            store_timeout: Duration::from_secs(5),
        }
    }
}

pub struct SessionService<S: SessionRepository> {
    repository: Arc<S>,
    enforcer: Arc<ExpiryEnforcer<S>>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    config: SessionConfig,
}

impl<S: SessionRepository> SessionService<S> {
    pub fn new(
        repository: Arc<S>,
        enforcer: Arc<ExpiryEnforcer<S>>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        config: SessionConfig,
    ) -> Self {
        Self {
            repository,
            enforcer,
            publisher,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Open a session for a table, expiring any session the same staff member still has open
    /// there.
    pub async fn issue(&self, table_number: u32, issued_by: &StaffId) -> Result<SessionQr, Error> {
        validate_table_number(table_number)?;
        validate_staff_id(issued_by.as_str())?;

        // One retry covers a token collision; a second collision is not worth chasing.
        let mut attempts = 0;
        let issued = loop {
            attempts += 1;
            let session = TableSession::new(
                SessionToken::new_random()?,
                table_number,
                issued_by.clone(),
                self.clock.now(),
                self.config.ttl,
                self.config.retention,
            );

            match with_store_timeout(
                self.config.store_timeout,
                "issue session",
                self.repository.issue(session),
            )
            .await
            {
                Ok(issued) => break issued,
                Err(Error::Storage(StorageError::Constraint(reason))) => {
                    tracing::warn!(table = table_number, attempts, %reason, "Session token collision");
                    if attempts >= 2 {
                        return Err(SessionError::TokenGenerationFailed.into());
                    }
                }
                Err(e) => return Err(e),
            }
        };

        for old in &issued.superseded {
            self.publisher.publish(Event::SessionExpired(old.clone()));
        }
        self.publisher
            .publish(Event::SessionCreated(issued.session.clone()));

        tracing::info!(
            session_id = %issued.session.id,
            table = table_number,
            issued_by = %issued_by,
            superseded = issued.superseded.len(),
            token = issued.session.token.fingerprint(),
            "Issued table session"
        );

        let qr_url = issued.session.qr_url(&self.config.base_url);
        Ok(SessionQr {
            session: issued.session,
            qr_url,
        })
    }

    /// Validate a token presented by a customer device and count the scan.
    pub async fn validate(&self, token: &str) -> Result<TableSession, Error> {
        let token = SessionToken::parse(token)?;
        let now = self.clock.now();

        let used = with_store_timeout(
            self.config.store_timeout,
            "record session usage",
            self.repository.record_usage(&token, now),
        )
        .await?;

        match used {
            Some(session) => {
                tracing::debug!(
                    session_id = %session.id,
                    usage_count = session.usage_count,
                    "Session scanned"
                );
                self.publisher.publish(Event::SessionUpdated(session.clone()));
                Ok(session)
            }
            None => {
                // Unknown, expired or due. Let the enforcer record a due transition.
                self.enforcer.resolve(&token).await?;
                Err(SessionError::InvalidOrExpired.into())
            }
        }
    }

    /// Check a token without counting it as a scan.
    pub async fn check(&self, token: &str) -> Result<TableSession, Error> {
        let token = SessionToken::parse(token)?;
        match self.enforcer.resolve(&token).await? {
            Some(session) if session.is_valid_at(self.clock.now()) => Ok(session),
            _ => Err(SessionError::InvalidOrExpired.into()),
        }
    }

    pub async fn get(&self, id: &SessionId) -> Result<TableSession, Error> {
        if !validate_prefixed_id(id.as_str(), "ses") {
            return Err(SessionError::NotFound.into());
        }

        let session = with_store_timeout(
            self.config.store_timeout,
            "find session",
            self.repository.find_by_id(id),
        )
        .await?
        .ok_or(SessionError::NotFound)?;

        if session.is_due_for_expiry(self.clock.now()) {
            if let Some(current) = self.enforcer.resolve(&session.token).await? {
                return Ok(current);
            }
            return Err(SessionError::NotFound.into());
        }
        Ok(session)
    }

    /// List sessions after bringing due sessions up to date.
    pub async fn list(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error> {
        self.enforcer.expire_due_now().await?;
        with_store_timeout(
            self.config.store_timeout,
            "list sessions",
            self.repository.list(filter),
        )
        .await
    }

    /// Manually expire a session. Expiring an already expired session returns it unchanged.
    pub async fn expire(&self, id: &SessionId) -> Result<TableSession, Error> {
        if !validate_prefixed_id(id.as_str(), "ses") {
            return Err(SessionError::NotFound.into());
        }

        let now = self.clock.now();
        let changed = with_store_timeout(
            self.config.store_timeout,
            "expire session",
            self.repository.expire(id, now),
        )
        .await?;

        if let Some(session) = changed {
            tracing::info!(session_id = %session.id, table = session.table_number, "Session expired manually");
            self.publisher.publish(Event::SessionExpired(session.clone()));
            return Ok(session);
        }

        with_store_timeout(
            self.config.store_timeout,
            "find session",
            self.repository.find_by_id(id),
        )
        .await?
        .ok_or_else(|| SessionError::NotFound.into())
    }

    /// Delete unused, no longer active sessions created more than `days` days ago. Due sessions
    /// are expired first and count as no longer active.
    pub async fn cleanup(&self, days: i64) -> Result<usize, Error> {
        validate_cleanup_days(days)?;
        self.enforcer.expire_due_now().await?;
        let cutoff = self.clock.now() - ChronoDuration::days(days);

        let deleted = with_store_timeout(
            self.config.store_timeout,
            "clean up sessions",
            self.repository.delete_unused_created_before(cutoff),
        )
        .await?;

        for session in &deleted {
            self.publisher.publish(Event::SessionDeleted(session.clone()));
        }
        tracing::info!(count = deleted.len(), days, "Cleaned up unused sessions");
        Ok(deleted.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        events::{Broadcaster, ConnectionIdentity, Subscription},
        repositories::SessionRepositoryAdapter,
        services::expiry::ExpiryConfig,
        session::SessionState,
        staff::{Role, StaffIdentity},
        storage::InMemoryRepositoryProvider,
    };
    use chrono::Utc;

    type Repo = SessionRepositoryAdapter<InMemoryRepositoryProvider>;

    struct Fixture {
        service: SessionService<Repo>,
        broadcaster: Broadcaster,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(provider: InMemoryRepositoryProvider, store_timeout: Duration) -> Fixture {
        let repository = Arc::new(SessionRepositoryAdapter::new(Arc::new(provider)));
        let broadcaster = Broadcaster::new();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let publisher: Arc<dyn EventPublisher> = Arc::new(broadcaster.clone());
        let enforcer = Arc::new(ExpiryEnforcer::new(
            repository.clone(),
            publisher.clone(),
            clock.clone(),
            ExpiryConfig {
                store_timeout,
                ..ExpiryConfig::default()
            },
        ));
        let service = SessionService::new(
            repository,
            enforcer,
            publisher,
            clock.clone(),
            SessionConfig {
                base_url: "https://order.example.com".to_string(),
                store_timeout,
                ..SessionConfig::default()
            },
        );
        Fixture {
            service,
            broadcaster,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(InMemoryRepositoryProvider::new(), Duration::from_secs(5))
    }

    fn watch_waiters(f: &Fixture) -> Subscription {
        f.broadcaster
            .subscribe(&ConnectionIdentity::Staff(StaffIdentity::new("w-obs", Role::Waiter)))
    }

    #[tokio::test]
    async fn test_issue_returns_qr_url_and_announces() {
        let f = fixture();
        let mut sub = watch_waiters(&f);

        let qr = f.service.issue(7, &StaffId::new("w1")).await.unwrap();

        assert_eq!(
            qr.qr_url,
            format!("https://order.example.com/s/{}/7", qr.session.token.as_str())
        );
        assert_eq!(qr.session.state, SessionState::Active);
        let names: Vec<_> = sub.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["session:created"]);
    }

    #[tokio::test]
    async fn test_issue_rejects_bad_input() {
        let f = fixture();
        assert!(f.service.issue(0, &StaffId::new("w1")).await.unwrap_err().is_validation_error());
        assert!(f.service.issue(3, &StaffId::new("")).await.unwrap_err().is_validation_error());
    }

    #[tokio::test]
    async fn test_reissue_leaves_one_active_session() {
        let f = fixture();
        let issuer = StaffId::new("w1");
        let first = f.service.issue(12, &issuer).await.unwrap();
        let mut sub = watch_waiters(&f);
        let second = f.service.issue(12, &issuer).await.unwrap();

        let active = f
            .service
            .list(
                &SessionFilter::new()
                    .with_table_number(12)
                    .with_state(SessionState::Active),
            )
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.session.id);

        let names: Vec<_> = sub.drain().iter().map(|e| e.name()).collect();
        assert_eq!(names, vec!["session:expired", "session:created"]);

        let err = f
            .service
            .validate(first.session.token.as_str())
            .await
            .unwrap_err();
        assert!(err.is_invalid_session());
    }

    #[tokio::test]
    async fn test_validation_boundary_around_expiry() {
        let f = fixture();
        let qr = f.service.issue(3, &StaffId::new("w1")).await.unwrap();
        let token = qr.session.token.as_str().to_string();

        f.clock.set(qr.session.expires_at - ChronoDuration::seconds(1));
        let session = f.service.validate(&token).await.unwrap();
        assert_eq!(session.usage_count, 1);
        assert!(session.was_used);

        f.clock.set(qr.session.expires_at + ChronoDuration::seconds(1));
        assert!(f.service.validate(&token).await.unwrap_err().is_invalid_session());

        let stored = f.service.get(&qr.session.id).await.unwrap();
        assert_eq!(stored.state, SessionState::Expired);
    }

    #[tokio::test]
    async fn test_concurrent_validations_are_all_counted() {
        let f = Arc::new(fixture());
        let qr = f.service.issue(9, &StaffId::new("w1")).await.unwrap();
        let token = qr.session.token.as_str().to_string();

        let mut handles = Vec::new();
        for _ in 0..25 {
            let f = Arc::clone(&f);
            let token = token.clone();
            handles.push(tokio::spawn(async move { f.service.validate(&token).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let session = f.service.get(&qr.session.id).await.unwrap();
        assert_eq!(session.usage_count, 25);
    }

    #[tokio::test]
    async fn test_check_does_not_count_as_scan() {
        let f = fixture();
        let qr = f.service.issue(2, &StaffId::new("w1")).await.unwrap();

        let checked = f.service.check(qr.session.token.as_str()).await.unwrap();
        assert_eq!(checked.usage_count, 0);
        assert!(!checked.was_used);
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_tokens() {
        let f = fixture();
        assert!(f.service.validate("nope").await.unwrap_err().is_validation_error());

        let unknown = SessionToken::new_random().unwrap();
        assert!(
            f.service
                .validate(unknown.as_str())
                .await
                .unwrap_err()
                .is_invalid_session()
        );
    }

    #[tokio::test]
    async fn test_manual_expire_is_idempotent() {
        let f = fixture();
        let qr = f.service.issue(5, &StaffId::new("w1")).await.unwrap();
        let mut sub = watch_waiters(&f);

        let first = f.service.expire(&qr.session.id).await.unwrap();
        let again = f.service.expire(&qr.session.id).await.unwrap();

        assert_eq!(first.state, SessionState::Expired);
        assert_eq!(again.expired_at, first.expired_at);
        assert_eq!(sub.drain().len(), 1);

        let missing = SessionId::new_random();
        assert!(f.service.expire(&missing).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_cleanup_only_removes_old_unused_inactive_sessions() {
        let f = fixture();
        let issuer = StaffId::new("w1");
        let unused = f.service.issue(1, &issuer).await.unwrap().session;
        let used = f.service.issue(2, &issuer).await.unwrap().session;
        let still_active = f.service.issue(3, &issuer).await.unwrap().session;
        f.service.validate(used.token.as_str()).await.unwrap();
        f.service.expire(&unused.id).await.unwrap();
        f.service.expire(&used.id).await.unwrap();

        f.clock.advance(ChronoDuration::days(3));
        // nothing is older than the cutoff yet
        assert_eq!(f.service.cleanup(7).await.unwrap(), 0);

        f.clock.advance(ChronoDuration::days(5));
        assert_eq!(f.service.cleanup(7).await.unwrap(), 2);
        assert!(f.service.get(&unused.id).await.unwrap_err().is_not_found());
        assert!(f.service.get(&used.id).await.is_ok());
        assert!(f.service.get(&still_active.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_slow_store_surfaces_unavailable() {
        let f = fixture_with(
            InMemoryRepositoryProvider::with_latency(Duration::from_millis(200)),
            Duration::from_millis(20),
        );
        let err = f.service.issue(4, &StaffId::new("w1")).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
