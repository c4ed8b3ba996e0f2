//! Orders bound to a table session
//!
//! An order references the session token it was placed with, but once accepted it no longer
//! depends on that session being valid. Amounts are integer cents.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{OrderError, ValidationError},
    id::generate_prefixed_id,
    session::SessionToken,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(String);

impl OrderId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn new_random() -> Self {
        Self(generate_prefixed_id("ord"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Preparing,
    Served,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Preparing => "preparing",
            OrderStatus::Served => "served",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Whether `self → next` is one of the legal transitions:
    /// `pending → preparing`, `preparing → served`, `pending → cancelled`.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Pending, OrderStatus::Preparing)
                | (OrderStatus::Preparing, OrderStatus::Served)
                | (OrderStatus::Pending, OrderStatus::Cancelled)
        )
    }

    pub fn check_transition(&self, next: OrderStatus) -> Result<(), OrderError> {
        if self.can_transition_to(next) {
            Ok(())
        } else {
            Err(OrderError::IllegalStatusTransition {
                current: *self,
                attempted: next,
            })
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "preparing" => Ok(OrderStatus::Preparing),
            "served" => Ok(OrderStatus::Served),
            "cancelled" => Ok(OrderStatus::Cancelled),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown order status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub menu_item_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: u32,
}

impl LineItem {
    pub fn subtotal_cents(&self) -> i64 {
        self.unit_price_cents * i64::from(self.quantity)
    }
}

/// Sum of line item subtotals. Client-submitted totals are never consulted.
pub fn compute_total_cents(items: &[LineItem]) -> i64 {
    items.iter().map(LineItem::subtotal_cents).sum()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub session_token: SessionToken,
    pub table_number: u32,
    pub items: Vec<LineItem>,
    pub total_cents: i64,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        session_token: SessionToken,
        table_number: u32,
        items: Vec<LineItem>,
        notes: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let total_cents = compute_total_cents(&items);
        Self {
            id: OrderId::new_random(),
            session_token,
            table_number,
            items,
            total_cents,
            status: OrderStatus::Pending,
            notes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn item_count(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }
}
