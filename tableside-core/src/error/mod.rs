pub mod utilities;

use thiserror::Error;

use crate::order::OrderStatus;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    /// The token is unknown, expired, or was superseded. Customers should re-scan the QR code.
    #[error("Session is invalid or expired, please re-scan the QR code")]
    InvalidOrExpired,

    #[error("Failed to generate a unique session token")]
    TokenGenerationFailed,
}

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("Order not found")]
    NotFound,

    #[error("Illegal status transition from {current} to {attempted}")]
    IllegalStatusTransition {
        current: OrderStatus,
        attempted: OrderStatus,
    },
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid table number: {0}")]
    InvalidTableNumber(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Invalid staff id: {0}")]
    InvalidStaffId(String),

    #[error("Invalid line item: {0}")]
    InvalidLineItem(String),

    #[error("Invalid date range: {0}")]
    InvalidRange(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),
}

impl Error {
    /// Errors a caller may retry with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Storage(StorageError::Unavailable(_)) | Error::Storage(StorageError::Connection(_))
        )
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Session(SessionError::NotFound)
                | Error::Order(OrderError::NotFound)
                | Error::Storage(StorageError::NotFound)
        )
    }

    pub fn is_invalid_session(&self) -> bool {
        matches!(self, Error::Session(SessionError::InvalidOrExpired))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let session_error = Error::Session(SessionError::InvalidOrExpired);
        assert_eq!(
            session_error.to_string(),
            "Session error: Session is invalid or expired, please re-scan the QR code"
        );

        let validation_error =
            Error::Validation(ValidationError::InvalidTableNumber("0".to_string()));
        assert_eq!(
            validation_error.to_string(),
            "Validation error: Invalid table number: 0"
        );

        let storage_error = Error::Storage(StorageError::NotFound);
        assert_eq!(storage_error.to_string(), "Storage error: Record not found");
    }

    #[test]
    fn test_illegal_transition_names_both_statuses() {
        let err = OrderError::IllegalStatusTransition {
            current: OrderStatus::Served,
            attempted: OrderStatus::Preparing,
        };
        assert_eq!(
            err.to_string(),
            "Illegal status transition from served to preparing"
        );
    }

    #[test]
    fn test_is_retryable() {
        assert!(Error::Storage(StorageError::Unavailable("timeout".into())).is_retryable());
        assert!(Error::Storage(StorageError::Connection("refused".into())).is_retryable());
        assert!(!Error::Storage(StorageError::NotFound).is_retryable());
        assert!(!Error::Session(SessionError::InvalidOrExpired).is_retryable());
    }

    #[test]
    fn test_is_not_found() {
        assert!(Error::Session(SessionError::NotFound).is_not_found());
        assert!(Error::Order(OrderError::NotFound).is_not_found());
        assert!(!Error::Session(SessionError::InvalidOrExpired).is_not_found());
    }

    #[test]
    fn test_error_from_conversions() {
        let error: Error = SessionError::TokenGenerationFailed.into();
        assert!(matches!(
            error,
            Error::Session(SessionError::TokenGenerationFailed)
        ));

        let error: Error = ValidationError::MissingField("items".to_string()).into();
        assert!(error.is_validation_error());
    }
}
