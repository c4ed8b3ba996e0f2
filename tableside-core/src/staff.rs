//! Staff identities as seen by the engine.
//!
//! Account management and role approval happen elsewhere; the engine only needs to know who is
//! calling and in which role.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StaffId(String);

impl StaffId {
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl From<String> for StaffId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StaffId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl fmt::Display for StaffId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Waiter,
    Kitchen,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Waiter => "waiter",
            Role::Kitchen => "kitchen",
        }
    }

    /// May open and list table sessions.
    pub fn can_issue_sessions(&self) -> bool {
        matches!(self, Role::Admin | Role::Waiter)
    }

    /// May move orders through the kitchen workflow or cancel them.
    pub fn can_manage_orders(&self) -> bool {
        matches!(self, Role::Admin | Role::Kitchen)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "waiter" => Ok(Role::Waiter),
            "kitchen" => Ok(Role::Kitchen),
            other => Err(ValidationError::InvalidField(format!("Unknown role: {other}"))),
        }
    }
}

/// A verified caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaffIdentity {
    pub id: StaffId,
    pub role: Role,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl StaffIdentity {
    pub fn new(id: impl Into<StaffId>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip_and_permissions() {
        assert_eq!("kitchen".parse::<Role>().unwrap(), Role::Kitchen);
        assert!("chef".parse::<Role>().is_err());

        assert!(Role::Waiter.can_issue_sessions());
        assert!(!Role::Kitchen.can_issue_sessions());
        assert!(Role::Kitchen.can_manage_orders());
        assert!(!Role::Waiter.can_manage_orders());
        assert!(Role::Admin.can_issue_sessions() && Role::Admin.can_manage_orders());
    }
}
