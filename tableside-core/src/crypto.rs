//! Token generation and comparison
//!
//! Session tokens are the only credential a customer needs to place an order, so they are
//! drawn from the operating system CSPRNG and compared in constant time when a storage backend
//! verifies a lookup.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
use subtle::ConstantTimeEq;

use crate::{Error, error::SessionError};

/// Number of random bytes in a session token (256 bits).
pub const TOKEN_BYTES: usize = 32;

/// Length of an encoded session token: 32 bytes as unpadded base64url.
pub const TOKEN_LENGTH: usize = 43;

/// Generate a cryptographically secure random token.
///
/// Returns [`SessionError::TokenGenerationFailed`] if the OS entropy source is unavailable.
pub fn generate_secure_token() -> Result<String, Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    OsRng.try_fill_bytes(&mut bytes).map_err(|e| {
        tracing::error!(error = %e, "OS random number generator failed");
        Error::Session(SessionError::TokenGenerationFailed)
    })?;
    Ok(BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Perform constant-time comparison of two byte slices.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}
