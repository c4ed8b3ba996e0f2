use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tableside_core::error::{
    AuthError, Error, OrderError, SessionError, StorageError, ValidationError,
};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("Session is invalid or expired, please re-scan the QR code at your table")]
    InvalidSession,

    #[error("Session not found, please re-scan the QR code at your table")]
    SessionNotFound,

    #[error("Order not found")]
    OrderNotFound,

    #[error("{0}")]
    IllegalTransition(String),

    #[error("Service temporarily unavailable, please retry")]
    Unavailable(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error")]
    InternalError(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(e) => ApiError::BadRequest(e.to_string()),
            Error::Session(SessionError::InvalidOrExpired) => ApiError::InvalidSession,
            Error::Session(SessionError::NotFound) => ApiError::SessionNotFound,
            Error::Order(OrderError::NotFound) => ApiError::OrderNotFound,
            Error::Order(e @ OrderError::IllegalStatusTransition { .. }) => {
                ApiError::IllegalTransition(e.to_string())
            }
            Error::Storage(StorageError::Unavailable(msg))
            | Error::Storage(StorageError::Connection(msg)) => ApiError::Unavailable(msg),
            Error::Auth(AuthError::Forbidden(msg)) => ApiError::Forbidden(msg),
            Error::Auth(_) => ApiError::Unauthorized,
            other => ApiError::InternalError(other.to_string()),
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        ApiError::BadRequest(err.to_string())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::InvalidSession => StatusCode::BAD_REQUEST,
            ApiError::SessionNotFound | ApiError::OrderNotFound => StatusCode::NOT_FOUND,
            ApiError::IllegalTransition(_) => StatusCode::CONFLICT,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code clients switch on.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "INVALID_INPUT",
            ApiError::InvalidSession => "INVALID_OR_EXPIRED_SESSION",
            ApiError::SessionNotFound => "SESSION_NOT_FOUND",
            ApiError::OrderNotFound => "ORDER_NOT_FOUND",
            ApiError::IllegalTransition(_) => "ILLEGAL_STATUS_TRANSITION",
            ApiError::Unavailable(_) => "STORE_UNAVAILABLE",
            ApiError::Unauthorized => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::InternalError(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::InternalError(detail) => {
                tracing::error!(error = %detail, "Request failed");
            }
            ApiError::Unavailable(detail) => {
                tracing::warn!(error = %detail, "Store unavailable");
            }
            _ => {}
        }

        let body = Json(json!({
            "error": self.to_string(),
            "code": self.code(),
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
