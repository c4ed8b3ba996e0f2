//! # Tableside Axum Integration
//!
//! Axum routes, staff authentication and the WebSocket fan-out for a [`Tableside`] engine.
//!
//! ## Endpoints
//!
//! - `POST /sessions`, `GET /sessions`, `GET /sessions/{id}`, `PUT /sessions/{id}/expire`,
//!   `DELETE /sessions/cleanup`
//! - `GET /sessions/validate/{token}` (public, counts a scan)
//! - `GET /sessions/analytics`, `/sessions/analytics/top-tables`,
//!   `/sessions/analytics/waiters-performance`, `/sessions/analytics/stats`
//! - `POST /orders` (public), `GET /orders`, `GET /orders/{id}`, `PUT /orders/{id}/status`,
//!   `DELETE /orders/{id}`
//! - `GET /ws` for real-time events, `GET /health`
//!
//! Staff authenticate with an HS256 bearer token; customers authenticate with their session
//! token alone.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tableside::{StaffAuthenticator, TablesideBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tableside = TablesideBuilder::new()
//!         .with_sqlite("sqlite://tableside.db")
//!         .await?
//!         .apply_migrations(true)
//!         .build()
//!         .await?;
//!
//!     let app = tableside_axum::routes(
//!         Arc::new(tableside),
//!         Arc::new(StaffAuthenticator::new_hs256(b"change-me")),
//!     );
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

mod error;
mod extractors;
mod middleware;
mod qr;
mod realtime;
mod routes;
mod types;

pub use error::{ApiError, Result};
pub use extractors::{AdminUser, OptionalStaffUser, OrderManager, SessionIssuer, StaffUser};
pub use middleware::{AppState, auth_middleware};
pub use qr::svg_data_url;
pub use realtime::{ConnectQuery, Peer, resolve_peer, ws_handler};
pub use routes::create_router;
pub use types::{
    AnalyticsQuery, CleanupQuery, CleanupResponse, HealthResponse, IssueSessionRequest,
    IssuedSessionResponse, OrderListQuery, PlaceOrderRequest, SessionListQuery,
    UpdateStatusRequest, ValidateResponse,
};

use std::sync::Arc;

use axum::Router;
use tableside::{StaffAuthenticator, Tableside};
use tableside_core::repositories::RepositoryProvider;

/// Build the full router for `tableside`, verifying staff credentials with `authenticator`.
///
/// The returned router can be served directly or nested under a prefix.
pub fn routes<R>(tableside: Arc<Tableside<R>>, authenticator: Arc<StaffAuthenticator>) -> Router
where
    R: RepositoryProvider + 'static,
{
    create_router(tableside, authenticator)
}
