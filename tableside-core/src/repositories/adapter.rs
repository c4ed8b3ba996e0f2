use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    order::{Order, OrderId, OrderStatus},
    repositories::{OrderRepository, RepositoryProvider, SessionRepository},
    session::{IssuedSession, SessionId, SessionToken, TableSession},
    storage::{OrderFilter, SessionFilter},
};

/// Adapter that wraps a RepositoryProvider and implements SessionRepository
pub struct SessionRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SessionRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SessionRepository for SessionRepositoryAdapter<R> {
    async fn issue(&self, session: TableSession) -> Result<IssuedSession, Error> {
        self.provider.session().issue(session).await
    }

    async fn find_by_id(&self, id: &SessionId) -> Result<Option<TableSession>, Error> {
        self.provider.session().find_by_id(id).await
    }

    async fn find_by_token(&self, token: &SessionToken) -> Result<Option<TableSession>, Error> {
        self.provider.session().find_by_token(token).await
    }

    async fn expire_if_due(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.provider.session().expire_if_due(token, now).await
    }

    async fn expire(
        &self,
        id: &SessionId,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.provider.session().expire(id, now).await
    }

    async fn expire_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TableSession>, Error> {
        self.provider.session().expire_due(now, limit).await
    }

    async fn record_usage(
        &self,
        token: &SessionToken,
        now: DateTime<Utc>,
    ) -> Result<Option<TableSession>, Error> {
        self.provider.session().record_usage(token, now).await
    }

    async fn list(&self, filter: &SessionFilter) -> Result<Vec<TableSession>, Error> {
        self.provider.session().list(filter).await
    }

    async fn delete_unused_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<TableSession>, Error> {
        self.provider
            .session()
            .delete_unused_created_before(cutoff)
            .await
    }

    async fn purge_retained(&self, now: DateTime<Utc>) -> Result<Vec<TableSession>, Error> {
        self.provider.session().purge_retained(now).await
    }
}

/// Adapter that wraps a RepositoryProvider and implements OrderRepository
pub struct OrderRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> OrderRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> OrderRepository for OrderRepositoryAdapter<R> {
    async fn create_if_session_valid(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        self.provider
            .order()
            .create_if_session_valid(order, now)
            .await
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        self.provider.order().find_by_id(id).await
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        self.provider
            .order()
            .update_status(id, expected, next, now)
            .await
    }

    async fn delete_if_pending(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        self.provider.order().delete_if_pending(id).await
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error> {
        self.provider.order().list(filter).await
    }
}
