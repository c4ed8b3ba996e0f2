use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    order::{Order, OrderId, OrderStatus},
    storage::OrderFilter,
};

/// Repository for order data access
#[async_trait]
pub trait OrderRepository: Send + Sync + 'static {
    /// Insert `order` only if its session is active with `expires_at > now` at the moment of the
    /// write. Returns `None` when the session check failed and nothing was written.
    async fn create_if_session_valid(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error>;

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, Error>;

    /// Compare-and-set on status. Returns `None` if the stored status is not `expected`.
    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error>;

    /// Delete the order if it is still pending, returning what was deleted
    async fn delete_if_pending(&self, id: &OrderId) -> Result<Option<Order>, Error>;

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error>;
}
