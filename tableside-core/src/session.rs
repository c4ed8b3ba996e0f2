//! Table sessions
//!
//! A table session is the short-lived ordering channel opened for one physical table. Its token
//! is embedded in a QR code; whoever holds the token may place orders until the session expires.
//!
//! | Field                | Type               | Description                                                  |
//! | -------------------- | ------------------ | ------------------------------------------------------------ |
//! | `id`                 | `SessionId`        | Store-assigned identifier.                                   |
//! | `token`              | `SessionToken`     | Bearer credential shared through the QR code.                |
//! | `table_number`       | `u32`              | Physical table the session belongs to.                       |
//! | `issued_by`          | `StaffId`          | Staff member who opened the session.                         |
//! | `state`              | `SessionState`     | `active` or `expired`.                                       |
//! | `created_at`         | `DateTime`         | When the session was issued.                                 |
//! | `expires_at`         | `DateTime`         | Fixed at issuance, never recomputed.                         |
//! | `expired_at`         | `Option<DateTime>` | When the `active → expired` transition was written.          |
//! | `was_used`           | `bool`             | Set by the first successful validation.                      |
//! | `usage_count`        | `u64`              | Number of successful validations.                            |
//! | `last_used_at`       | `Option<DateTime>` | Time of the latest successful validation.                    |
//! | `retention_deadline` | `DateTime`         | After this an unused, expired session may be purged.         |

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    crypto::{constant_time_compare, generate_secure_token},
    error::ValidationError,
    id::generate_prefixed_id,
    staff::StaffId,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn new_random() -> Self {
        Self(generate_prefixed_id("ses"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque session token with 256 bits of entropy.
///
/// There is intentionally no `Display` impl and `Debug` is redacted, so a token cannot end up
/// in a log line through `{}` or `{:?}`. Use [`SessionToken::as_str`] where the raw value is
/// genuinely needed (QR payload, storage lookups).
#[derive(Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl Hash for SessionToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialEq for SessionToken {
    fn eq(&self, other: &Self) -> bool {
        constant_time_compare(self.0.as_bytes(), other.0.as_bytes())
    }
}

impl SessionToken {
    /// Wrap an externally supplied token, checking only its shape.
    pub fn parse(token: &str) -> Result<Self, ValidationError> {
        crate::validation::validate_token(token)?;
        Ok(Self(token.to_string()))
    }

    /// Create a new random token
    pub fn new_random() -> Result<Self, Error> {
        Ok(Self(generate_secure_token()?))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    /// A short prefix for correlating log lines, never the whole token.
    pub fn fingerprint(&self) -> &str {
        &self.0[..self.0.len().min(6)]
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionToken({}…)", self.fingerprint())
    }
}

impl FromStr for SessionToken {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Active,
    Expired,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Active => "active",
            SessionState::Expired => "expired",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SessionState::Active),
            "expired" => Ok(SessionState::Expired),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown session state: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableSession {
    pub id: SessionId,
    pub token: SessionToken,
    pub table_number: u32,
    pub issued_by: StaffId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub expired_at: Option<DateTime<Utc>>,
    pub was_used: bool,
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub retention_deadline: DateTime<Utc>,
}

impl TableSession {
    /// Build a fresh, active session record.
    pub fn new(
        token: SessionToken,
        table_number: u32,
        issued_by: StaffId,
        now: DateTime<Utc>,
        ttl: Duration,
        retention: Duration,
    ) -> Self {
        let expires_at = now + ttl;
        Self {
            id: SessionId::new_random(),
            token,
            table_number,
            issued_by,
            state: SessionState::Active,
            created_at: now,
            expires_at,
            expired_at: None,
            was_used: false,
            usage_count: 0,
            last_used_at: None,
            retention_deadline: expires_at + retention,
        }
    }

    /// True when the record is active but its expiry time has been reached.
    pub fn is_due_for_expiry(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && now >= self.expires_at
    }

    /// True when the session may be used at `now`.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.state == SessionState::Active && now < self.expires_at
    }

    /// The URL customers reach by scanning the QR code.
    pub fn qr_url(&self, base_url: &str) -> String {
        format!(
            "{}/s/{}/{}",
            base_url.trim_end_matches('/'),
            self.token.as_str(),
            self.table_number
        )
    }
}

/// Outcome of an atomic issuance: the new record and every session it superseded.
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub session: TableSession,
    pub superseded: Vec<TableSession>,
}

/// A freshly issued session together with its render-ready QR payload.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionQr {
    pub session: TableSession,
    pub qr_url: String,
}
