//! Binding orders to table sessions and moving them through the kitchen workflow.

use std::{sync::Arc, time::Duration};

use crate::{
    Error,
    clock::Clock,
    error::{OrderError, SessionError, utilities::with_store_timeout},
    events::{Event, EventPublisher},
    id::validate_prefixed_id,
    order::{LineItem, Order, OrderId, OrderStatus},
    repositories::{OrderRepository, SessionRepository},
    services::expiry::ExpiryEnforcer,
    session::SessionToken,
    storage::OrderFilter,
    validation::{validate_line_items, validate_notes},
};

pub struct OrderService<S: SessionRepository, O: OrderRepository> {
    repository: Arc<O>,
    enforcer: Arc<ExpiryEnforcer<S>>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl<S: SessionRepository, O: OrderRepository> OrderService<S, O> {
    pub fn new(
        repository: Arc<O>,
        enforcer: Arc<ExpiryEnforcer<S>>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            repository,
            enforcer,
            publisher,
            clock,
            store_timeout,
        }
    }

    /// Accept an order for the table behind `token`.
    ///
    /// The session must be active and unexpired both when it is resolved and at the instant the
    /// order is written; otherwise the customer is asked to re-scan.
    pub async fn place_order(
        &self,
        token: &str,
        items: Vec<LineItem>,
        notes: Option<String>,
    ) -> Result<Order, Error> {
        let token = SessionToken::parse(token)?;
        validate_line_items(&items)?;
        let notes = notes.filter(|n| !n.trim().is_empty());
        validate_notes(notes.as_deref())?;

        let session = match self.enforcer.resolve(&token).await? {
            Some(session) if session.is_valid_at(self.clock.now()) => session,
            _ => return Err(SessionError::InvalidOrExpired.into()),
        };

        let now = self.clock.now();
        let order = Order::new(token, session.table_number, items, notes, now);

        let order = with_store_timeout(
            self.store_timeout,
            "place order",
            self.repository.create_if_session_valid(order, now),
        )
        .await?
        .ok_or(SessionError::InvalidOrExpired)?;

        tracing::info!(
            order_id = %order.id,
            table = order.table_number,
            total_cents = order.total_cents,
            items = order.items.len(),
            "Order placed"
        );
        self.publisher.publish(Event::OrderCreated(order.clone()));

        Ok(order)
    }

    /// Move an order to `next`. Moving to `cancelled` deletes the order.
    pub async fn update_status(&self, id: &OrderId, next: OrderStatus) -> Result<Order, Error> {
        if next == OrderStatus::Cancelled {
            return self.cancel(id).await;
        }

        let current = self.get(id).await?;
        current.status.check_transition(next)?;

        let updated = with_store_timeout(
            self.store_timeout,
            "update order status",
            self.repository
                .update_status(id, current.status, next, self.clock.now()),
        )
        .await?;

        let Some(order) = updated else {
            return Err(self.lost_race(id, next).await);
        };

        tracing::info!(
            order_id = %order.id,
            from = %current.status,
            to = %order.status,
            "Order status updated"
        );
        self.publisher.publish(Event::OrderStatusUpdated(order.clone()));
        Ok(order)
    }

    /// Cancel a pending order, deleting it.
    pub async fn cancel(&self, id: &OrderId) -> Result<Order, Error> {
        let current = self.get(id).await?;
        current.status.check_transition(OrderStatus::Cancelled)?;

        let deleted = with_store_timeout(
            self.store_timeout,
            "cancel order",
            self.repository.delete_if_pending(id),
        )
        .await?;

        let Some(mut order) = deleted else {
            return Err(self.lost_race(id, OrderStatus::Cancelled).await);
        };
        // The row is gone; report the status it left with.
        order.status = OrderStatus::Cancelled;
        order.updated_at = self.clock.now();

        tracing::info!(order_id = %order.id, table = order.table_number, "Order cancelled");
        self.publisher.publish(Event::OrderCancelled(order.clone()));
        Ok(order)
    }

    pub async fn get(&self, id: &OrderId) -> Result<Order, Error> {
        if !validate_prefixed_id(id.as_str(), "ord") {
            return Err(OrderError::NotFound.into());
        }

        with_store_timeout(
            self.store_timeout,
            "find order",
            self.repository.find_by_id(id),
        )
        .await?
        .ok_or_else(|| OrderError::NotFound.into())
    }

    pub async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error> {
        with_store_timeout(
            self.store_timeout,
            "list orders",
            self.repository.list(filter),
        )
        .await
    }

    /// A conditional write matched nothing: another caller moved or removed the order first.
    async fn lost_race(&self, id: &OrderId, attempted: OrderStatus) -> Error {
        match self.get(id).await {
            Ok(order) => OrderError::IllegalStatusTransition {
                current: order.status,
                attempted,
            }
            .into(),
            Err(e) => e,
        }
    }
}
