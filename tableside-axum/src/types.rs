use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tableside::{LineItem, OrderStatus, SessionId, TableSession, TimeRange};
use tableside_core::error::ValidationError;

// Query strings cannot use `#[serde(flatten)]`: flattened fields lose their numeric types.
macro_rules! windowed_query {
    ($($query:ty),+) => {
        $(impl $query {
            /// The requested calendar range, if any.
            pub fn time_range(&self) -> Result<Option<TimeRange>, ValidationError> {
                TimeRange::from_query(
                    self.range.as_deref(),
                    self.start_date.as_deref(),
                    self.end_date.as_deref(),
                )
            }
        })+
    };
}

windowed_query!(SessionListQuery, AnalyticsQuery, OrderListQuery);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueSessionRequest {
    pub table_number: u32,
}

/// A freshly issued session with everything needed to print its QR code.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedSessionResponse {
    pub id: SessionId,
    pub token: String,
    pub table_number: u32,
    pub expires_at: DateTime<Utc>,
    pub qr_url: String,
    /// SVG data URL encoding `qr_url`
    pub qr_image: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub table_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidateResponse {
    pub fn valid(session: &TableSession) -> Self {
        Self {
            valid: true,
            table_number: Some(session.table_number),
            expires_at: Some(session.expires_at),
            message: None,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            table_number: None,
            expires_at: None,
            message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionListQuery {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub table_number: Option<u32>,
    pub issued_by: Option<String>,
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CleanupQuery {
    pub days: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub deleted: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsQuery {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    pub token: String,
    pub items: Vec<LineItem>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderListQuery {
    pub range: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: Option<String>,
    pub table_number: Option<u32>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}
