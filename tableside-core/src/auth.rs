//! Bearer credential verification for staff.
//!
//! Staff tokens are HS256 JWTs minted by the external account service. The engine verifies the
//! signature and expiry and turns the claims into a [`StaffIdentity`]; it never stores them.

use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::AuthError,
    staff::{Role, StaffId, StaffIdentity},
};

/// JWT claims carried by a staff credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaffClaims {
    /// Subject - staff member id
    pub sub: String,
    /// One of `admin`, `waiter`, `kitchen`
    pub role: Role,
    /// Issued at in seconds (as UTC timestamp)
    pub iat: i64,
    /// Expiration time in seconds (as UTC timestamp)
    pub exp: i64,
    /// Display name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Verifies (and, for tooling and tests, mints) staff bearer tokens.
#[derive(Clone)]
pub struct StaffAuthenticator {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl StaffAuthenticator {
    /// Create an authenticator sharing an HS256 secret with the account service
    pub fn new_hs256(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Verify a bearer token and return the caller identity
    pub fn verify(&self, token: &str) -> Result<StaffIdentity, Error> {
        let data = decode::<StaffClaims>(token, &self.decoding_key, &self.validation).map_err(
            |e| {
                tracing::debug!(error = %e, "Rejected staff credential");
                AuthError::InvalidCredentials(e.to_string())
            },
        )?;

        let claims = data.claims;
        if claims.sub.trim().is_empty() {
            return Err(AuthError::InvalidCredentials("empty subject".to_string()).into());
        }

        Ok(StaffIdentity {
            id: StaffId::new(&claims.sub),
            role: claims.role,
            name: claims.name,
        })
    }

    /// Mint a credential for `identity`, valid for `ttl`
    pub fn mint(&self, identity: &StaffIdentity, ttl: Duration) -> Result<String, Error> {
        let now = Utc::now();
        let claims = StaffClaims {
            sub: identity.id.as_str().to_string(),
            role: identity.role,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            name: identity.name.clone(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::InvalidCredentials(format!("Failed to encode JWT: {e}")).into())
    }
}

impl std::fmt::Debug for StaffAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaffAuthenticator")
            .field("algorithm", &Algorithm::HS256)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mint_and_verify() {
        let auth = StaffAuthenticator::new_hs256(b"test-secret-at-least-32-bytes-long!");
        let identity = StaffIdentity::new("waiter-7", Role::Waiter).with_name("Ana");

        let token = auth.mint(&identity, Duration::hours(1)).unwrap();
        let verified = auth.verify(&token).unwrap();

        assert_eq!(verified, identity);
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let issuer = StaffAuthenticator::new_hs256(b"secret-one-secret-one-secret-one");
        let verifier = StaffAuthenticator::new_hs256(b"secret-two-secret-two-secret-two");
        let token = issuer
            .mint(&StaffIdentity::new("admin", Role::Admin), Duration::hours(1))
            .unwrap();

        let err = verifier.verify(&token).unwrap_err();
        assert!(err.is_auth_error());
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let auth = StaffAuthenticator::new_hs256(b"test-secret-at-least-32-bytes-long!");
        let token = auth
            .mint(
                &StaffIdentity::new("kitchen-1", Role::Kitchen),
                Duration::seconds(-120),
            )
            .unwrap();

        assert!(auth.verify(&token).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let auth = StaffAuthenticator::new_hs256(b"test-secret-at-least-32-bytes-long!");
        assert!(auth.verify("not.a.jwt").is_err());
    }
}
