//! Repository traits for the data access layer
//!
//! Services talk to storage only through these traits.
//!
//! - [`SessionRepository`] and [`OrderRepository`] define the operations per data domain
//! - `*RepositoryProvider` traits hand out each repository
//! - [`RepositoryProvider`] combines the providers with lifecycle methods (migrations, health)
//!
//! Backends must make every conditional mutation atomic: a check and the write it guards are a
//! single statement or transaction, never a read followed by a separate write.

pub mod adapter;
pub mod order;
pub mod session;

pub use adapter::{OrderRepositoryAdapter, SessionRepositoryAdapter};
pub use order::OrderRepository;
pub use session::SessionRepository;

use async_trait::async_trait;

use crate::Error;

/// Provider trait for session repository access.
pub trait SessionRepositoryProvider: Send + Sync + 'static {
    /// The session repository implementation type
    type SessionRepo: SessionRepository;

    /// Get the session repository
    fn session(&self) -> &Self::SessionRepo;
}

/// Provider trait for order repository access.
pub trait OrderRepositoryProvider: Send + Sync + 'static {
    /// The order repository implementation type
    type OrderRepo: OrderRepository;

    /// Get the order repository
    fn order(&self) -> &Self::OrderRepo;
}

/// Provider trait that storage implementations must implement to provide all repositories.
///
/// # Example
///
/// ```rust,ignore
/// use tableside_core::repositories::*;
///
/// struct MyStorage { /* ... */ }
///
/// impl SessionRepositoryProvider for MyStorage {
///     type SessionRepo = MySessionRepository;
///     fn session(&self) -> &Self::SessionRepo { &self.sessions }
/// }
///
/// // ... OrderRepositoryProvider ...
///
/// #[async_trait]
/// impl RepositoryProvider for MyStorage {
///     async fn migrate(&self) -> Result<(), Error> { /* ... */ }
///     async fn health_check(&self) -> Result<(), Error> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait RepositoryProvider: SessionRepositoryProvider + OrderRepositoryProvider {
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
