//! Prefixed identifiers
//!
//! Store-assigned ids look like `ses_Zq3…` or `ord_8fK…`: a short prefix naming the entity
//! followed by 96 bits of URL-safe randomness.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{RngCore, rng};

/// Generate a prefixed ID with 96 bits of entropy.
///
/// Ids are not secrets, so the thread-local generator is sufficient here.
pub fn generate_prefixed_id(prefix: &str) -> String {
    let mut bytes = [0u8; 12];
    rng().fill_bytes(&mut bytes);
    format!("{prefix}_{}", BASE64_URL_SAFE_NO_PAD.encode(bytes))
}

/// Validate that a prefixed ID has the expected format
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    let Some(random_part) = id
        .strip_prefix(expected_prefix)
        .and_then(|rest| rest.strip_prefix('_'))
    else {
        return false;
    };

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12,
        Err(_) => false,
    }
}
