//! In-process storage backend
//!
//! Keeps every record behind a single `tokio::sync::RwLock`, so each repository method holds the
//! write lock across its check and its write. Used by tests, demos and single-node deployments
//! that do not need durability.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    Error,
    error::StorageError,
    order::{Order, OrderId, OrderStatus},
    repositories::{
        OrderRepository, OrderRepositoryProvider, RepositoryProvider, SessionRepository,
        SessionRepositoryProvider,
    },
    session::{IssuedSession, SessionId, SessionState, SessionToken, TableSession},
    storage::{OrderFilter, SessionFilter},
};

#[derive(Default)]
struct MemoryState {
    sessions: HashMap<SessionId, TableSession>,
    tokens: HashMap<String, SessionId>,
    orders: HashMap<OrderId, Order>,
}

impl MemoryState {
    fn session_by_token_mut(&mut self, token: &SessionToken) -> Option<&mut TableSession> {
        let id = self.tokens.get(token.as_str())?;
        self.sessions.get_mut(id)
    }

    fn remove_session(&mut self, id: &SessionId) -> Option<TableSession> {
        let session = self.sessions.remove(id)?;
        self.tokens.remove(session.token.as_str());
        Some(session)
    }

    fn remove_sessions_where(&mut self, predicate: impl Fn(&TableSession) -> bool) -> Vec<TableSession> {
        let doomed: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|s| predicate(s))
            .map(|s| s.id.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|id| self.remove_session(id))
            .collect()
    }
}

fn mark_expired(session: &mut TableSession, now: DateTime<Utc>) -> TableSession {
    session.state = SessionState::Expired;
    session.expired_at = Some(now);
    session.clone()
}

#[derive(Default)]
struct Shared {
    state: RwLock<MemoryState>,
    latency: Option<Duration>,
}

impl Shared {
    /// Simulated round-trip delay, for exercising store timeouts.
    async fn round_trip(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

pub struct InMemorySessionRepository {
    shared: Arc<Shared>,
}

pub struct InMemoryOrderRepository {
    shared: Arc<Shared>,
}

/// Repository provider keeping sessions and orders in memory.
pub struct InMemoryRepositoryProvider {
    sessions: InMemorySessionRepository,
    orders: InMemoryOrderRepository,
}

impl InMemoryRepositoryProvider {
    pub fn new() -> Self {
        Self::from_shared(Shared::default())
    }

    /// Delay every repository call by `latency`.
    pub fn with_latency(latency: Duration) -> Self {
        Self::from_shared(Shared {
            latency: Some(latency),
            ..Shared::default()
        })
    }

    fn from_shared(shared: Shared) -> Self {
        let shared = Arc::new(shared);
        Self {
            sessions: InMemorySessionRepository {
                shared: Arc::clone(&shared),
            },
            orders: InMemoryOrderRepository { shared },
        }
    }
}

impl Default for InMemoryRepositoryProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRepositoryProvider for InMemoryRepositoryProvider {
    type SessionRepo = InMemorySessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.sessions
    }
}

impl OrderRepositoryProvider for InMemoryRepositoryProvider {
    type OrderRepo = InMemoryOrderRepository;

    fn order(&self) -> &Self::OrderRepo {
        &self.orders
    }
}

#[async_trait]
impl RepositoryProvider for InMemoryRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        tracing::debug!("In-memory storage needs no migrations");
        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn issue(&self, session: TableSession) -> Result<IssuedSession, Error> {
        self.shared.round_trip().await;
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;

        if state.tokens.contains_key(session.token.as_str()) {
            return Err(StorageError::Constraint("duplicate session token".to_string()).into());
        }

        let superseded: Vec<TableSession> = state
            .sessions
            .values_mut()
            .filter(|existing| {
                existing.state == SessionState::Active
                    && existing.table_number == session.table_number
                    && existing.issued_by == session.issued_by
            })
            .map(|existing| mark_expired(existing, session.created_at))
            .collect();

        state
            .tokens
            .insert(session.token.as_str().to_string(), session.id.clone());
        state.sessions.insert(session.id.clone(), session.clone());

        Ok(IssuedSession {
            session,
            superseded,
        })
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<TableSession>, Error> {
        self.shared.round_trip().await;
        Ok(self.shared.state.read().await.sessions.get(id).cloned())
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<TableSession>, Error> {
        self.shared.round_trip().await;
        let state = self.shared.state.read().await;
        Ok(state
            .tokens
            .get(token.as_str())
            .and_then(|id| state.sessions.get(id))
            .cloned())
    }

    async fn expire_if_due(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state
            .session_by_token_mut(token)
            .filter(|s| s.is_due_for_expiry(now))
            .map(|s| mark_expired(s, now)))
    }

    async fn expire(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state
            .sessions
            .get_mut(id)
            .filter(|s| s.state == SessionState::Active)
            .map(|s| mark_expired(s, now)))
    }

    async fn expire_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;

        let mut due: Vec<&mut TableSession> = state
            .sessions
            .values_mut()
            .filter(|s| s.is_due_for_expiry(now))
            .collect();
        due.sort_by_key(|s| s.expires_at);

        Ok(due
            .into_iter()
            .take(limit)
            .map(|s| mark_expired(s, now))
            .collect())
    }

    async fn record_usage(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state
            .session_by_token_mut(token)
            .filter(|s| s.is_valid_at(now))
            .map(|s| {
                s.usage_count += 1;
                s.was_used = true;
                s.last_used_at = Some(now);
                s.clone()
            }))
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error> {
        self.shared.round_trip().await;
        let state = self.shared.state.read().await;

        let mut sessions: Vec<TableSession> = state
            .sessions
            .values()
            .filter(|s| filter.matches(s))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            sessions.truncate(limit);
        }
        Ok(sessions)
    }

    async fn delete_unused_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state.remove_sessions_where(|s| {
            s.state != SessionState::Active && !s.was_used && s.created_at < cutoff
        }))
    }

    async fn purge_retained(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state.remove_sessions_where(|s| {
            s.state == SessionState::Expired && !s.was_used && s.retention_deadline <= now
        }))
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn create_if_session_valid(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        self.shared.round_trip().await;
        let mut guard = self.shared.state.write().await;
        let state = &mut *guard;

        let session_valid = state
            .tokens
            .get(order.session_token.as_str())
            .and_then(|id| state.sessions.get(id))
            .is_some_and(|s| s.is_valid_at(now));
        if !session_valid {
            return Ok(None);
        }

        state.orders.insert(order.id.clone(), order.clone());
        Ok(Some(order))
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        self.shared.round_trip().await;
        Ok(self.shared.state.read().await.orders.get(id).cloned())
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        Ok(state
            .orders
            .get_mut(id)
            .filter(|o| o.status == expected)
            .map(|o| {
                o.status = next;
                o.updated_at = now;
                o.clone()
            }))
    }

    async fn delete_if_pending(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        self.shared.round_trip().await;
        let mut state = self.shared.state.write().await;
        let pending = state
            .orders
            .get(id)
            .is_some_and(|o| o.status == OrderStatus::Pending);
        Ok(if pending { state.orders.remove(id) } else { None })
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error> {
        self.shared.round_trip().await;
        let state = self.shared.state.read().await;

        let mut orders: Vec<Order> = state
            .orders
            .values()
            .filter(|o| filter.matches(o))
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        if let Some(limit) = filter.limit {
            orders.truncate(limit);
        }
        Ok(orders)
    }
}
