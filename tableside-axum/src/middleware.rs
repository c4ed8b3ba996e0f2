use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::headers::{Authorization, HeaderMapExt, authorization::Bearer};
use tableside::{StaffAuthenticator, StaffIdentity, Tableside};
use tableside_core::repositories::RepositoryProvider;

/// Shared state handed to every handler.
pub struct AppState<R: RepositoryProvider> {
    pub tableside: Arc<Tableside<R>>,
    pub authenticator: Arc<StaffAuthenticator>,
}

impl<R: RepositoryProvider> Clone for AppState<R> {
    fn clone(&self) -> Self {
        Self {
            tableside: self.tableside.clone(),
            authenticator: self.authenticator.clone(),
        }
    }
}

/// Resolve the bearer credential, if any, into a [`StaffIdentity`] request extension.
///
/// Never rejects: routes that need a caller use the [`crate::StaffUser`] extractor.
pub async fn auth_middleware<R>(
    State(state): State<AppState<R>>,
    mut request: Request,
    next: Next,
) -> Response
where
    R: RepositoryProvider,
{
    if let Some(token) = extract_bearer_token(&request) {
        match state.authenticator.verify(&token) {
            Ok(identity) => {
                tracing::debug!(staff_id = %identity.id, role = %identity.role, "Authenticated staff request");
                request.extensions_mut().insert(identity);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Invalid staff credential");
            }
        }
    }

    next.run(request).await
}

pub(crate) fn extract_bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .typed_get::<Authorization<Bearer>>()
        .map(|auth| auth.token().to_string())
}

/// Verify an optional credential outside the middleware, e.g. a WebSocket `access_token`.
pub(crate) fn verify_optional(
    authenticator: &StaffAuthenticator,
    token: Option<&str>,
) -> Option<StaffIdentity> {
    token.and_then(|token| authenticator.verify(token).ok())
}
