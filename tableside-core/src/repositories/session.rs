use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    session::{IssuedSession, SessionId, SessionToken, TableSession},
    storage::SessionFilter,
};

/// Repository for table session data access
///
/// Every state-changing method is a single conditional operation in the backing store. Methods
/// returning `Option<TableSession>` return `Some` only when this call changed the record, which
/// is what lets callers emit exactly one event per transition.
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Expire every active session of the same table and issuer, then insert `session`, as one
    /// atomic operation. A duplicate token fails with `StorageError::Constraint`.
    async fn issue(&self, session: TableSession) -> Result<IssuedSession, Error>;

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<TableSession>, Error>;

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<TableSession>, Error>;

    /// `active → expired` for this token if `expires_at <= now`
    async fn expire_if_due(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error>;

    /// `active → expired` regardless of `expires_at`
    async fn expire(&self, id: &SessionId, now: DateTime<Utc>)
    -> Result<Option<TableSession>, Error>;

    /// Transition up to `limit` due sessions, oldest expiry first
    async fn expire_due(&self, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<TableSession>, Error>;

    /// Increment usage if the session is active and `now < expires_at`, returning the updated
    /// record. `None` means the session is unknown, expired, or due.
    async fn record_usage(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error>;

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error>;

    /// Delete unused, non-active sessions created before `cutoff`
    async fn delete_unused_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TableSession>, Error>;

    /// Delete expired, unused sessions whose retention deadline has passed
    async fn purge_retained(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>, Error>;
}
