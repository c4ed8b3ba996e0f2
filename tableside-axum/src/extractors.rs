use axum::{Extension, RequestPartsExt, extract::FromRequestParts, http::request::Parts};
use tableside::{Role, StaffIdentity};

use crate::error::ApiError;

/// An authenticated staff member. Rejects with 401 when the request carries no valid credential.
pub struct StaffUser(pub StaffIdentity);

impl<S> FromRequestParts<S> for StaffUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(identity): Extension<StaffIdentity> =
            parts.extract().await.map_err(|_| ApiError::Unauthorized)?;

        Ok(StaffUser(identity))
    }
}

pub struct OptionalStaffUser(pub Option<StaffIdentity>);

impl<S> FromRequestParts<S> for OptionalStaffUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalStaffUser(parts.extensions.get::<StaffIdentity>().cloned()))
    }
}

fn require(
    identity: &StaffIdentity,
    permitted: fn(&Role) -> bool,
    action: &str,
) -> Result<(), ApiError> {
    if permitted(&identity.role) {
        Ok(())
    } else {
        tracing::debug!(staff_id = %identity.id, role = %identity.role, action, "Forbidden");
        Err(ApiError::Forbidden(format!(
            "{} may not {action}",
            identity.role
        )))
    }
}

/// An admin.
pub struct AdminUser(pub StaffIdentity);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let StaffUser(identity) = StaffUser::from_request_parts(parts, state).await?;
        require(&identity, |role| *role == Role::Admin, "perform admin actions")?;
        Ok(AdminUser(identity))
    }
}

/// Staff allowed to open table sessions: admins and waiters.
pub struct SessionIssuer(pub StaffIdentity);

impl<S> FromRequestParts<S> for SessionIssuer
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let StaffUser(identity) = StaffUser::from_request_parts(parts, state).await?;
        require(&identity, Role::can_issue_sessions, "issue sessions")?;
        Ok(SessionIssuer(identity))
    }
}

/// Staff allowed to move orders through the kitchen: admins and kitchen staff.
pub struct OrderManager(pub StaffIdentity);

impl<S> FromRequestParts<S> for OrderManager
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let StaffUser(identity) = StaffUser::from_request_parts(parts, state).await?;
        require(&identity, Role::can_manage_orders, "manage orders")?;
        Ok(OrderManager(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_uses_role_permissions() {
        let waiter = StaffIdentity::new("w1", Role::Waiter);
        let chef = StaffIdentity::new("k1", Role::Kitchen);

        assert!(require(&waiter, Role::can_issue_sessions, "issue sessions").is_ok());
        assert!(require(&chef, Role::can_manage_orders, "manage orders").is_ok());
        assert!(matches!(
            require(&chef, Role::can_issue_sessions, "issue sessions"),
            Err(ApiError::Forbidden(msg)) if msg == "kitchen may not issue sessions"
        ));
    }
}
