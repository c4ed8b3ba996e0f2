use std::{str::FromStr, sync::Arc};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get, post, put},
};
use tableside::{
    Error, OrderFilter, OrderId, OrderStatus, Role, SessionFilter, SessionId, SessionState,
    StaffAuthenticator, StaffId, Tableside, TimeRange,
};
use tableside_core::{error::ValidationError, repositories::RepositoryProvider};

use crate::{
    error::{ApiError, Result},
    extractors::{AdminUser, OrderManager, SessionIssuer, StaffUser},
    middleware::{AppState, auth_middleware},
    qr,
    realtime::ws_handler,
    types::*,
};

const DEFAULT_CLEANUP_DAYS: i64 = 7;
const DEFAULT_TOP_LIMIT: usize = 10;

pub fn create_router<R>(tableside: Arc<Tableside<R>>, authenticator: Arc<StaffAuthenticator>) -> Router
where
    R: RepositoryProvider + 'static,
{
    let state = AppState {
        tableside,
        authenticator,
    };

    let session_routes = Router::new()
        .route("/sessions", post(issue_session_handler).get(list_sessions_handler))
        .route("/sessions/validate/{token}", get(validate_session_handler))
        .route("/sessions/cleanup", delete(cleanup_sessions_handler))
        .route("/sessions/analytics", get(analytics_handler))
        .route("/sessions/analytics/top-tables", get(top_tables_handler))
        .route(
            "/sessions/analytics/waiters-performance",
            get(issuer_performance_handler),
        )
        .route("/sessions/analytics/stats", get(stats_handler))
        .route("/sessions/{id}", get(get_session_handler))
        .route("/sessions/{id}/expire", put(expire_session_handler));

    let order_routes = Router::new()
        .route("/orders", post(place_order_handler).get(list_orders_handler))
        .route("/orders/{id}", get(get_order_handler).delete(cancel_order_handler))
        .route("/orders/{id}/status", put(update_order_status_handler));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler::<R>))
        .merge(session_routes)
        .merge(order_routes)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<R>,
        ))
        .with_state(state)
}

async fn health_handler<R>(State(state): State<AppState<R>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    state.tableside.health_check().await?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

// Sessions

async fn issue_session_handler<R>(
    State(state): State<AppState<R>>,
    SessionIssuer(staff): SessionIssuer,
    Json(payload): Json<IssueSessionRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let issued = state
        .tableside
        .issue_session(payload.table_number, &staff.id)
        .await?;
    let qr_image = qr::svg_data_url(&issued.qr_url)?;

    Ok((
        StatusCode::CREATED,
        Json(IssuedSessionResponse {
            id: issued.session.id,
            token: issued.session.token.as_str().to_string(),
            table_number: issued.session.table_number,
            expires_at: issued.session.expires_at,
            qr_url: issued.qr_url,
            qr_image,
        }),
    ))
}

async fn validate_session_handler<R>(
    State(state): State<AppState<R>>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    match state.tableside.validate_session(&token).await {
        Ok(session) => Ok((StatusCode::OK, Json(ValidateResponse::valid(&session)))),
        Err(e @ (Error::Session(_) | Error::Validation(_))) => {
            tracing::debug!(error = %e, "Rejected session scan");
            Ok((
                StatusCode::BAD_REQUEST,
                Json(ValidateResponse::invalid(ApiError::InvalidSession.to_string())),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

async fn list_sessions_handler<R>(
    State(state): State<AppState<R>>,
    StaffUser(staff): StaffUser,
    Query(query): Query<SessionListQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let mut filter = SessionFilter::new();
    if let Some(range) = query.time_range()? {
        let window = window_for(&state, range)?;
        filter = filter.created_between(window.start, window.end);
    }
    if let Some(table_number) = query.table_number {
        filter = filter.with_table_number(table_number);
    }
    if let Some(status) = query.status.as_deref() {
        filter = filter.with_state(SessionState::from_str(status)?);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }

    // Waiters only ever see the sessions they opened.
    filter = match (staff.role, query.issued_by) {
        (Role::Waiter, _) => filter.with_issuer(staff.id),
        (_, Some(issued_by)) => filter.with_issuer(StaffId::from(issued_by)),
        (_, None) => filter,
    };

    Ok(Json(state.tableside.list_sessions(&filter).await?))
}

async fn get_session_handler<R>(
    State(state): State<AppState<R>>,
    StaffUser(staff): StaffUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let session = state.tableside.get_session(&SessionId::new(&id)).await?;
    if staff.role == Role::Waiter && session.issued_by != staff.id {
        return Err(ApiError::SessionNotFound);
    }
    Ok(Json(session))
}

async fn expire_session_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(admin): AdminUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let session = state.tableside.expire_session(&SessionId::new(&id)).await?;
    tracing::info!(session_id = %session.id, admin = %admin.id, "Session expired by admin");
    Ok(Json(session))
}

async fn cleanup_sessions_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(_): AdminUser,
    Query(query): Query<CleanupQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let days = query.days.unwrap_or(DEFAULT_CLEANUP_DAYS);
    let deleted = state.tableside.cleanup_sessions(days).await?;
    Ok(Json(CleanupResponse { deleted }))
}

// Analytics

async fn analytics_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(_): AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let range = query.time_range()?.unwrap_or(TimeRange::Today);
    Ok(Json(state.tableside.analytics(range).await?))
}

async fn top_tables_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(_): AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let range = query.time_range()?.unwrap_or(TimeRange::Today);
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    Ok(Json(state.tableside.top_tables(range, limit).await?))
}

async fn issuer_performance_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(_): AdminUser,
    Query(query): Query<AnalyticsQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let range = query.time_range()?.unwrap_or(TimeRange::Today);
    let limit = query.limit.unwrap_or(DEFAULT_TOP_LIMIT);
    Ok(Json(state.tableside.issuer_performance(range, limit).await?))
}

async fn stats_handler<R>(
    State(state): State<AppState<R>>,
    AdminUser(_): AdminUser,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    Ok(Json(state.tableside.stats().await?))
}

// Orders

async fn place_order_handler<R>(
    State(state): State<AppState<R>>,
    Json(payload): Json<PlaceOrderRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let order = state
        .tableside
        .place_order(&payload.token, payload.items, payload.notes)
        .await?;
    Ok((StatusCode::CREATED, Json(order)))
}

async fn list_orders_handler<R>(
    State(state): State<AppState<R>>,
    StaffUser(_): StaffUser,
    Query(query): Query<OrderListQuery>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let mut filter = OrderFilter::new();
    if let Some(range) = query.time_range()? {
        let window = window_for(&state, range)?;
        filter = filter.created_between(window.start, window.end);
    }
    if let Some(status) = query.status.as_deref() {
        filter = filter.with_status(OrderStatus::from_str(status)?);
    }
    if let Some(table_number) = query.table_number {
        filter = filter.with_table_number(table_number);
    }
    if let Some(limit) = query.limit {
        filter = filter.with_limit(limit);
    }

    Ok(Json(state.tableside.list_orders(&filter).await?))
}

async fn get_order_handler<R>(
    State(state): State<AppState<R>>,
    StaffUser(_): StaffUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    Ok(Json(state.tableside.get_order(&OrderId::new(&id)).await?))
}

async fn update_order_status_handler<R>(
    State(state): State<AppState<R>>,
    OrderManager(staff): OrderManager,
    Path(id): Path<String>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    let order = state
        .tableside
        .update_order_status(&OrderId::new(&id), payload.status)
        .await?;
    tracing::debug!(order_id = %order.id, staff_id = %staff.id, status = %payload.status, "Order moved");
    Ok(Json(order))
}

async fn cancel_order_handler<R>(
    State(state): State<AppState<R>>,
    OrderManager(_): OrderManager,
    Path(id): Path<String>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
{
    Ok(Json(state.tableside.cancel_order(&OrderId::new(&id)).await?))
}

fn window_for<R: RepositoryProvider>(
    state: &AppState<R>,
    range: TimeRange,
) -> std::result::Result<tableside_core::analytics::Window, ValidationError> {
    let now = state.tableside.clock().now();
    range.window(now, state.tableside.config().utc_offset)
}
