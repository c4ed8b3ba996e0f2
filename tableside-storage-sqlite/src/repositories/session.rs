use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tableside_core::{
    Error,
    error::{StorageError, utilities::DatabaseResultExt},
    repositories::SessionRepository,
    session::{IssuedSession, SessionId, SessionState, SessionToken, TableSession},
    staff::StaffId,
    storage::SessionFilter,
};

use super::{corrupt, from_millis, map_write_err, to_millis};

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteTableSession {
    id: String,
    token: String,
    table_number: i64,
    issued_by: String,
    state: String,
    created_at: i64,
    expires_at: i64,
    expired_at: Option<i64>,
    was_used: bool,
    usage_count: i64,
    last_used_at: Option<i64>,
    retention_deadline: i64,
}

impl TryFrom<SqliteTableSession> for TableSession {
    type Error = Error;

    fn try_from(row: SqliteTableSession) -> Result<Self, Self::Error> {
        Ok(TableSession {
            token: SessionToken::parse(&row.token).map_err(|e| corrupt("token", e))?,
            table_number: u32::try_from(row.table_number)
                .map_err(|e| corrupt("table_number", e))?,
            issued_by: StaffId::from(row.issued_by),
            state: row
                .state
                .parse::<SessionState>()
                .map_err(|e| corrupt("state", e))?,
            created_at: from_millis(row.created_at)?,
            expires_at: from_millis(row.expires_at)?,
            expired_at: row.expired_at.map(from_millis).transpose()?,
            was_used: row.was_used,
            usage_count: u64::try_from(row.usage_count).map_err(|e| corrupt("usage_count", e))?,
            last_used_at: row.last_used_at.map(from_millis).transpose()?,
            retention_deadline: from_millis(row.retention_deadline)?,
            id: SessionId::new(&row.id),
        })
    }
}

fn into_sessions(rows: Vec<SqliteTableSession>) -> Result<Vec<TableSession>, Error> {
    rows.into_iter().map(TableSession::try_from).collect()
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn issue(&self, session: TableSession) -> Result<IssuedSession, Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_db_err_with_context("Failed to begin issuance")?;

        let superseded = sqlx::query_as::<_, SqliteTableSession>(
            r#"
            UPDATE table_sessions
            SET state = 'expired', expired_at = ?1
            WHERE state = 'active' AND table_number = ?2 AND issued_by = ?3
            RETURNING *
            "#,
        )
        .bind(to_millis(session.created_at))
        .bind(i64::from(session.table_number))
        .bind(session.issued_by.as_str())
        .fetch_all(&mut *tx)
        .await
        .map_db_err_with_context("Failed to supersede sessions")?;

        let inserted = sqlx::query_as::<_, SqliteTableSession>(
            r#"
            INSERT INTO table_sessions (
                id, token, table_number, issued_by, state, created_at, expires_at,
                expired_at, was_used, usage_count, last_used_at, retention_deadline
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            RETURNING *
            "#,
        )
        .bind(session.id.as_str())
        .bind(session.token.as_str())
        .bind(i64::from(session.table_number))
        .bind(session.issued_by.as_str())
        .bind(session.state.as_str())
        .bind(to_millis(session.created_at))
        .bind(to_millis(session.expires_at))
        .bind(session.expired_at.map(to_millis))
        .bind(session.was_used)
        .bind(session.usage_count as i64)
        .bind(session.last_used_at.map(to_millis))
        .bind(to_millis(session.retention_deadline))
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| map_write_err("Failed to insert session", e))?;

        tx.commit()
            .await
            .map_db_err_with_context("Failed to commit issuance")?;

        Ok(IssuedSession {
            session: inserted.try_into()?,
            superseded: into_sessions(superseded)?,
        })
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<TableSession>, Error> {
        sqlx::query_as::<_, SqliteTableSession>("SELECT * FROM table_sessions WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_db_err()?
            .map(TableSession::try_from)
            .transpose()
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<TableSession>, Error> {
        sqlx::query_as::<_, SqliteTableSession>("SELECT * FROM table_sessions WHERE token = ?1")
            .bind(token.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_db_err()?
            .map(TableSession::try_from)
            .transpose()
    }

    async fn expire_if_due(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        sqlx::query_as::<_, SqliteTableSession>(
            r#"
            UPDATE table_sessions
            SET state = 'expired', expired_at = ?1
            WHERE token = ?2 AND state = 'active' AND expires_at <= ?1
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to expire session")?
        .map(TableSession::try_from)
        .transpose()
    }

    async fn expire(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        sqlx::query_as::<_, SqliteTableSession>(
            r#"
            UPDATE table_sessions
            SET state = 'expired', expired_at = ?1
            WHERE id = ?2 AND state = 'active'
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to expire session")?
        .map(TableSession::try_from)
        .transpose()
    }

    async fn expire_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TableSession>, Error> {
        let rows = sqlx::query_as::<_, SqliteTableSession>(
            r#"
            UPDATE table_sessions
            SET state = 'expired', expired_at = ?1
            WHERE state = 'active' AND expires_at <= ?1 AND id IN (
                SELECT id FROM table_sessions
                WHERE state = 'active' AND expires_at <= ?1
                ORDER BY expires_at
                LIMIT ?2
            )
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to expire due sessions")?;

        into_sessions(rows)
    }

    async fn record_usage(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        sqlx::query_as::<_, SqliteTableSession>(
            r#"
            UPDATE table_sessions
            SET usage_count = usage_count + 1, was_used = 1, last_used_at = ?1
            WHERE token = ?2 AND state = 'active' AND expires_at > ?1
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .bind(token.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to record session usage")?
        .map(TableSession::try_from)
        .transpose()
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM table_sessions WHERE 1 = 1");
        if let Some(from) = filter.created_from {
            query.push(" AND created_at >= ").push_bind(to_millis(from));
        }
        if let Some(before) = filter.created_before {
            query.push(" AND created_at < ").push_bind(to_millis(before));
        }
        if let Some(table_number) = filter.table_number {
            query
                .push(" AND table_number = ")
                .push_bind(i64::from(table_number));
        }
        if let Some(issued_by) = &filter.issued_by {
            query
                .push(" AND issued_by = ")
                .push_bind(issued_by.as_str().to_string());
        }
        if let Some(state) = filter.state {
            query.push(" AND state = ").push_bind(state.as_str());
        }
        query.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let rows = query
            .build_query_as::<SqliteTableSession>()
            .fetch_all(&self.pool)
            .await
            .map_db_err_with_context("Failed to list sessions")?;

        into_sessions(rows)
    }

    async fn delete_unused_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TableSession>, Error> {
        let rows = sqlx::query_as::<_, SqliteTableSession>(
            r#"
            DELETE FROM table_sessions
            WHERE state != 'active' AND was_used = 0 AND created_at < ?1
            RETURNING *
            "#,
        )
        .bind(to_millis(cutoff))
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to clean up sessions")?;

        into_sessions(rows)
    }

    async fn purge_retained(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>, Error> {
        let rows = sqlx::query_as::<_, SqliteTableSession>(
            r#"
            DELETE FROM table_sessions
            WHERE state = 'expired' AND was_used = 0 AND retention_deadline <= ?1
            RETURNING *
            "#,
        )
        .bind(to_millis(now))
        .fetch_all(&self.pool)
        .await
        .map_db_err_with_context("Failed to purge retained sessions")?;

        into_sessions(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::tests::setup_provider;
    use chrono::Duration;
    use tableside_core::repositories::SessionRepositoryProvider;

    fn new_session(table: u32, issuer: &str, now: DateTime<Utc>) -> TableSession {
        TableSession::new(
            SessionToken::new_random().unwrap(),
            table,
            StaffId::new(issuer),
            now,
            Duration::minutes(30),
            Duration::days(7),
        )
    }

    #[tokio::test]
    async fn test_issue_supersedes_previous_active_session() {
        let provider = setup_provider().await;
        let repo = provider.session();
        let now = Utc::now();

        let first = repo.issue(new_session(4, "w1", now)).await.unwrap();
        let second = repo.issue(new_session(4, "w1", now)).await.unwrap();

        assert!(first.superseded.is_empty());
        assert_eq!(second.superseded.len(), 1);
        assert_eq!(second.superseded[0].id, first.session.id);
        assert_eq!(second.superseded[0].state, SessionState::Expired);

        let active = repo
            .list(&SessionFilter::new().with_state(SessionState::Active))
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.session.id);
    }

    #[tokio::test]
    async fn test_duplicate_token_is_a_constraint_violation() {
        let provider = setup_provider().await;
        let now = Utc::now();
        let session = new_session(1, "w1", now);
        let mut clash = new_session(2, "w2", now);
        clash.token = session.token.clone();

        provider.session().issue(session).await.unwrap();
        let err = provider.session().issue(clash).await.unwrap_err();
        assert!(matches!(err, Error::Storage(StorageError::Constraint(_))));

        // the failed issuance rolled back entirely
        assert_eq!(
            provider.session().list(&SessionFilter::new()).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_usage_and_expiry_are_conditional() {
        let provider = setup_provider().await;
        let repo = provider.session();
        let now = Utc::now();
        let session = repo.issue(new_session(2, "w1", now)).await.unwrap().session;

        let used = repo.record_usage(&session.token, now).await.unwrap().unwrap();
        assert_eq!(used.usage_count, 1);
        assert!(used.was_used);

        let at_expiry = session.expires_at;
        assert!(repo.record_usage(&session.token, at_expiry).await.unwrap().is_none());
        assert!(repo.expire_if_due(&session.token, at_expiry).await.unwrap().is_some());
        assert!(repo.expire_if_due(&session.token, at_expiry).await.unwrap().is_none());
        assert!(repo.expire(&session.id, at_expiry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expire_due_honours_limit() {
        let provider = setup_provider().await;
        let repo = provider.session();
        let now = Utc::now();
        for table in 1..=3 {
            repo.issue(new_session(table, "w1", now)).await.unwrap();
        }

        let later = now + Duration::hours(1);
        assert_eq!(repo.expire_due(later, 2).await.unwrap().len(), 2);
        assert_eq!(repo.expire_due(later, 2).await.unwrap().len(), 1);
        assert!(repo.expire_due(later, 2).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_filters() {
        let provider = setup_provider().await;
        let repo = provider.session();
        let now = Utc::now();
        repo.issue(new_session(1, "w1", now)).await.unwrap();
        repo.issue(new_session(2, "w2", now + Duration::seconds(1)))
            .await
            .unwrap();

        let mine = repo
            .list(&SessionFilter::new().with_issuer(StaffId::new("w2")))
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].table_number, 2);

        let newest = repo.list(&SessionFilter::new().with_limit(1)).await.unwrap();
        assert_eq!(newest[0].table_number, 2);
    }

    #[tokio::test]
    async fn test_cleanup_and_purge() {
        let provider = setup_provider().await;
        let repo = provider.session();
        let now = Utc::now();
        let unused = repo.issue(new_session(1, "w1", now)).await.unwrap().session;
        let used = repo.issue(new_session(2, "w1", now)).await.unwrap().session;
        repo.record_usage(&used.token, now).await.unwrap();
        repo.expire_due(now + Duration::hours(1), 10).await.unwrap();

        let purged = repo
            .purge_retained(unused.retention_deadline)
            .await
            .unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].id, unused.id);

        let cleaned = repo
            .delete_unused_created_before(now + Duration::days(30))
            .await
            .unwrap();
        assert!(cleaned.is_empty());
        assert!(repo.find_by_id(&used.id).await.unwrap().is_some());
    }
}
