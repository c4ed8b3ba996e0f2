//! Business logic on top of the repositories
//!
//! Services are generic over the repository traits and share one [`ExpiryEnforcer`] so that every
//! read path applies the same passive expiry check.

pub mod analytics;
pub mod expiry;
pub mod order;
pub mod session;

pub use analytics::{AnalyticsConfig, AnalyticsService};
pub use expiry::{ExpiryConfig, ExpiryEnforcer};
pub use order::OrderService;
pub use session::{SessionConfig, SessionService};
