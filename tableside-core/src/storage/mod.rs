//! Query types shared by every storage backend, and the in-process backend itself.

pub mod memory;

pub use memory::InMemoryRepositoryProvider;

use chrono::{DateTime, Utc};

use crate::{
    order::{Order, OrderStatus},
    session::{SessionState, SessionToken, TableSession},
    staff::StaffId,
};

/// Criteria for listing sessions. Unset fields match everything; results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionFilter {
    /// Inclusive lower bound on `created_at`
    pub created_from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`
    pub created_before: Option<DateTime<Utc>>,
    pub table_number: Option<u32>,
    pub issued_by: Option<StaffId>,
    pub state: Option<SessionState>,
    pub limit: Option<usize>,
}

impl SessionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_between(mut self, from: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_before = Some(before);
        self
    }

    pub fn with_table_number(mut self, table_number: u32) -> Self {
        self.table_number = Some(table_number);
        self
    }

    pub fn with_issuer(mut self, issued_by: StaffId) -> Self {
        self.issued_by = Some(issued_by);
        self
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, session: &TableSession) -> bool {
        self.created_from.is_none_or(|from| session.created_at >= from)
            && self
                .created_before
                .is_none_or(|before| session.created_at < before)
            && self
                .table_number
                .is_none_or(|n| session.table_number == n)
            && self
                .issued_by
                .as_ref()
                .is_none_or(|issuer| &session.issued_by == issuer)
            && self.state.is_none_or(|state| session.state == state)
    }
}

/// Criteria for listing orders. Unset fields match everything; results are newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderFilter {
    pub created_from: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    pub table_number: Option<u32>,
    pub status: Option<OrderStatus>,
    pub session_token: Option<SessionToken>,
    pub limit: Option<usize>,
}

impl OrderFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created_between(mut self, from: DateTime<Utc>, before: DateTime<Utc>) -> Self {
        self.created_from = Some(from);
        self.created_before = Some(before);
        self
    }

    pub fn with_table_number(mut self, table_number: u32) -> Self {
        self.table_number = Some(table_number);
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_session_token(mut self, token: SessionToken) -> Self {
        self.session_token = Some(token);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.created_from.is_none_or(|from| order.created_at >= from)
            && self
                .created_before
                .is_none_or(|before| order.created_at < before)
            && self.table_number.is_none_or(|n| order.table_number == n)
            && self.status.is_none_or(|status| order.status == status)
            && self
                .session_token
                .as_ref()
                .is_none_or(|token| &order.session_token == token)
    }
}
