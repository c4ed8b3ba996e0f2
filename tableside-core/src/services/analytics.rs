use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{Duration as ChronoDuration, FixedOffset, Offset, Utc};

use crate::{
    Error,
    analytics::{self, IssuerBreakdown, Rollup, Snapshot, Stats, TableBreakdown, TimeRange, Window},
    clock::Clock,
    error::utilities::with_store_timeout,
    order::Order,
    repositories::{OrderRepository, SessionRepository},
    session::{SessionToken, TableSession},
    staff::StaffId,
    storage::{OrderFilter, SessionFilter},
    validation::validate_top_limit,
};

#[derive(Debug, Clone)]
pub struct AnalyticsConfig {
    /// Offset whose midnight starts a day
    pub utc_offset: FixedOffset,
    /// How far before a window to look for the sessions its orders were placed with
    pub session_lookback: ChronoDuration,
    /// Rows in each breakdown of a full rollup
    pub default_top_limit: usize,
    pub store_timeout: Duration,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            utc_offset: Utc.fix(),
            session_lookback: ChronoDuration::minutes(30),
            default_top_limit: 10,
            store_timeout: Duration::from_secs(5),
        }
    }
}

/// Read-only summaries computed from current store state on every call.
pub struct AnalyticsService<S: SessionRepository, O: OrderRepository> {
    sessions: Arc<S>,
    orders: Arc<O>,
    clock: Arc<dyn Clock>,
    config: AnalyticsConfig,
}

struct Fetched {
    window: Window,
    sessions: Vec<TableSession>,
    orders: Vec<Order>,
    issuers: HashMap<SessionToken, StaffId>,
}

impl Fetched {
    fn snapshot(&self) -> Snapshot<'_> {
        Snapshot {
            window: self.window,
            sessions: &self.sessions,
            orders: &self.orders,
            issuers: &self.issuers,
        }
    }
}

impl<S: SessionRepository, O: OrderRepository> AnalyticsService<S, O> {
    pub fn new(
        sessions: Arc<S>,
        orders: Arc<O>,
        clock: Arc<dyn Clock>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            sessions,
            orders,
            clock,
            config,
        }
    }

    pub async fn summarize(&self, range: TimeRange) -> Result<Rollup, Error> {
        let now = self.clock.now();
        let window = range.window(now, self.config.utc_offset)?;

        let current = self.fetch(window).await?;
        let previous = self.fetch(window.previous()).await?;

        Ok(analytics::rollup(
            &range,
            &current.snapshot(),
            &previous.snapshot(),
            now,
            self.config.default_top_limit,
        ))
    }

    pub async fn top_tables(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<TableBreakdown>, Error> {
        validate_top_limit(limit)?;
        let window = range.window(self.clock.now(), self.config.utc_offset)?;
        let fetched = self.fetch(window).await?;
        Ok(analytics::top_tables(&fetched.snapshot(), limit))
    }

    pub async fn issuer_performance(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> Result<Vec<IssuerBreakdown>, Error> {
        validate_top_limit(limit)?;
        let window = range.window(self.clock.now(), self.config.utc_offset)?;
        let fetched = self.fetch(window).await?;
        Ok(analytics::issuer_performance(&fetched.snapshot(), limit))
    }

    pub async fn stats(&self) -> Result<Stats, Error> {
        let now = self.clock.now();
        let sessions = with_store_timeout(
            self.config.store_timeout,
            "list sessions",
            self.sessions.list(&SessionFilter::new()),
        )
        .await?;
        let orders = with_store_timeout(
            self.config.store_timeout,
            "list orders",
            self.orders.list(&OrderFilter::new()),
        )
        .await?;

        Ok(analytics::stats(&sessions, &orders, now))
    }

    async fn fetch(&self, window: Window) -> Result<Fetched, Error> {
        // Orders in the window may belong to sessions opened shortly before it.
        let candidates = with_store_timeout(
            self.config.store_timeout,
            "list sessions",
            self.sessions.list(
                &SessionFilter::new()
                    .created_between(window.start - self.config.session_lookback, window.end),
            ),
        )
        .await?;
        let orders = with_store_timeout(
            self.config.store_timeout,
            "list orders",
            self.orders
                .list(&OrderFilter::new().created_between(window.start, window.end)),
        )
        .await?;

        let issuers = candidates
            .iter()
            .map(|s| (s.token.clone(), s.issued_by.clone()))
            .collect();
        let sessions = candidates
            .into_iter()
            .filter(|s| window.contains(s.created_at))
            .collect();

        Ok(Fetched {
            window,
            sessions,
            orders,
            issuers,
        })
    }
}
