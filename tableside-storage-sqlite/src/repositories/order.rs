use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tableside_core::{
    Error,
    error::utilities::DatabaseResultExt,
    order::{LineItem, Order, OrderId, OrderStatus},
    repositories::OrderRepository,
    session::SessionToken,
    storage::OrderFilter,
};

use super::{corrupt, from_millis, map_write_err, to_millis};

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteOrder {
    id: String,
    session_token: String,
    table_number: i64,
    items: String,
    total_cents: i64,
    status: String,
    notes: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SqliteOrder> for Order {
    type Error = Error;

    fn try_from(row: SqliteOrder) -> Result<Self, Self::Error> {
        let items: Vec<LineItem> =
            serde_json::from_str(&row.items).map_err(|e| corrupt("items", e))?;
        Ok(Order {
            id: OrderId::new(&row.id),
            session_token: SessionToken::parse(&row.session_token)
                .map_err(|e| corrupt("session_token", e))?,
            table_number: u32::try_from(row.table_number)
                .map_err(|e| corrupt("table_number", e))?,
            items,
            total_cents: row.total_cents,
            status: row
                .status
                .parse::<OrderStatus>()
                .map_err(|e| corrupt("status", e))?,
            notes: row.notes,
            created_at: from_millis(row.created_at)?,
            updated_at: from_millis(row.updated_at)?,
        })
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn create_if_session_valid(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        let items = serde_json::to_string(&order.items).map_err(|e| corrupt("items", e))?;

        // The session check and the insert are one statement.
        sqlx::query_as::<_, SqliteOrder>(
            r#"
            INSERT INTO orders (
                id, session_token, table_number, items, total_cents, status, notes,
                created_at, updated_at
            )
            SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9
            WHERE EXISTS (
                SELECT 1 FROM table_sessions
                WHERE token = ?2 AND state = 'active' AND expires_at > ?10
            )
            RETURNING *
            "#,
        )
        .bind(order.id.as_str())
        .bind(order.session_token.as_str())
        .bind(i64::from(order.table_number))
        .bind(items)
        .bind(order.total_cents)
        .bind(order.status.as_str())
        .bind(order.notes.as_deref())
        .bind(to_millis(order.created_at))
        .bind(to_millis(order.updated_at))
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_err("Failed to create order", e))?
        .map(Order::try_from)
        .transpose()
    }

    async fn find_by_id(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        sqlx::query_as::<_, SqliteOrder>("SELECT * FROM orders WHERE id = ?1")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_db_err()?
            .map(Order::try_from)
            .transpose()
    }

    async fn update_status(
        &self,
        id: &OrderId,
        expected: OrderStatus,
        next: OrderStatus,
        now: DateTime<Utc>,
    ) -> Result<Option<Order>, Error> {
        sqlx::query_as::<_, SqliteOrder>(
            r#"
            UPDATE orders
            SET status = ?1, updated_at = ?2
            WHERE id = ?3 AND status = ?4
            RETURNING *
            "#,
        )
        .bind(next.as_str())
        .bind(to_millis(now))
        .bind(id.as_str())
        .bind(expected.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to update order status")?
        .map(Order::try_from)
        .transpose()
    }

    async fn delete_if_pending(&self, id: &OrderId) -> Result<Option<Order>, Error> {
        sqlx::query_as::<_, SqliteOrder>(
            "DELETE FROM orders WHERE id = ?1 AND status = 'pending' RETURNING *",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_db_err_with_context("Failed to cancel order")?
        .map(Order::try_from)
        .transpose()
    }

    async fn list(&self, filter: &OrderFilter) -> Result<Vec<Order>, Error> {
        let mut query = QueryBuilder::<Sqlite>::new("SELECT * FROM orders WHERE 1 = 1");
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
        if let Some(status) = filter.status {
            query.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(token) = &filter.session_token {
            query
                .push(" AND session_token = ")
                .push_bind(token.as_str().to_string());
        }
        query.push(" ORDER BY created_at DESC");
        if let Some(limit) = filter.limit {
            query
                .push(" LIMIT ")
                .push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        query
            .build_query_as::<SqliteOrder>()
            .fetch_all(&self.pool)
            .await
            .map_db_err_with_context("Failed to list orders")?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::tests::setup_provider;
    use chrono::Duration;
    use tableside_core::{
        repositories::{OrderRepositoryProvider, SessionRepository, SessionRepositoryProvider},
        session::TableSession,
        staff::StaffId,
    };

    fn meal() -> Vec<LineItem> {
        vec![
            LineItem {
                menu_item_id: "soup".into(),
                name: "Soup".into(),
                unit_price_cents: 450,
                quantity: 2,
            },
            LineItem {
                menu_item_id: "bread".into(),
                name: "Bread".into(),
                unit_price_cents: 350,
                quantity: 1,
            },
        ]
    }

    async fn open_session(
        provider: &crate::SqliteRepositoryProvider,
        now: DateTime<Utc>,
    ) -> TableSession {
        let session = TableSession::new(
            SessionToken::new_random().unwrap(),
            6,
            StaffId::new("w1"),
            now,
            Duration::minutes(30),
            Duration::days(7),
        );
        provider.session().issue(session).await.unwrap().session
    }

    #[tokio::test]
    async fn test_create_requires_valid_session() {
        let provider = setup_provider().await;
        let now = Utc::now();
        let session = open_session(&provider, now).await;

        let order = Order::new(session.token.clone(), 6, meal(), Some("no onions".into()), now);
        let stored = provider
            .order()
            .create_if_session_valid(order, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.total_cents, 1250);
        assert_eq!(stored.items, meal());
        assert_eq!(stored.notes.as_deref(), Some("no onions"));

        let late = session.expires_at;
        let rejected = Order::new(session.token.clone(), 6, meal(), None, late);
        assert!(provider
            .order()
            .create_if_session_valid(rejected, late)
            .await
            .unwrap()
            .is_none());
        assert_eq!(provider.order().list(&OrderFilter::new()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_status_compare_and_set() {
        let provider = setup_provider().await;
        let now = Utc::now();
        let session = open_session(&provider, now).await;
        let order = provider
            .order()
            .create_if_session_valid(Order::new(session.token, 6, meal(), None, now), now)
            .await
            .unwrap()
            .unwrap();

        let repo = provider.order();
        let preparing = repo
            .update_status(&order.id, OrderStatus::Pending, OrderStatus::Preparing, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(preparing.status, OrderStatus::Preparing);
        assert!(repo
            .update_status(&order.id, OrderStatus::Pending, OrderStatus::Preparing, now)
            .await
            .unwrap()
            .is_none());
        assert!(repo.delete_if_pending(&order.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_cancel_deletes_pending_order() {
        let provider = setup_provider().await;
        let now = Utc::now();
        let session = open_session(&provider, now).await;
        let order = provider
            .order()
            .create_if_session_valid(Order::new(session.token.clone(), 6, meal(), None, now), now)
            .await
            .unwrap()
            .unwrap();

        let removed = provider.order().delete_if_pending(&order.id).await.unwrap();
        assert_eq!(removed.map(|o| o.id), Some(order.id.clone()));
        assert!(provider.order().find_by_id(&order.id).await.unwrap().is_none());

        let by_session = provider
            .order()
            .list(&OrderFilter::new().with_session_token(session.token))
            .await
            .unwrap();
        assert!(by_session.is_empty());
    }
}
