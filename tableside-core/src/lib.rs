//! Core of the tableside ordering engine
//!
//! Staff open a short-lived [`TableSession`] per table and hand its token to customers through a
//! QR code. Orders are accepted only while that session is active. Every change is published as
//! an [`Event`] to role, table and user rooms through the [`Broadcaster`].
//!
//! This crate holds the domain types, the repository traits storage backends implement, the
//! services built on them, and an in-memory backend. Applications normally use it through the
//! `tableside` facade crate.

pub mod analytics;
pub mod auth;
pub mod clock;
pub mod crypto;
pub mod error;
pub mod events;
pub mod id;
pub mod order;
pub mod repositories;
pub mod services;
pub mod session;
pub mod staff;
pub mod storage;
pub mod validation;

pub use analytics::{Rollup, Stats, TimeRange};
pub use auth::StaffAuthenticator;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::Error;
pub use events::{Broadcaster, ConnectionIdentity, Event, EventPublisher, Room, Subscription};
pub use order::{LineItem, Order, OrderId, OrderStatus};
pub use session::{SessionId, SessionQr, SessionState, SessionToken, TableSession};
pub use staff::{Role, StaffId, StaffIdentity};
pub use storage::{InMemoryRepositoryProvider, OrderFilter, SessionFilter};
