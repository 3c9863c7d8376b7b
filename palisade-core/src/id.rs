//! ID generation utilities with prefix support
//!
//! Identifiers are generated with at least 96 bits of entropy and are
//! URL-safe, in the `{prefix}_{random}` style: `acct_`, `sess_`, `evt_`,
//! `thr_`.

use base64::{Engine, prelude::BASE64_URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};

/// Generate a prefixed ID with at least 96 bits of entropy
///
/// # Arguments
/// * `prefix` - The prefix for the ID (e.g., "acct", "sess", "evt")
pub fn generate_prefixed_id(prefix: &str) -> String {
    // 12 bytes = 96 bits of random data
    let mut bytes = [0u8; 12];
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");

    let encoded = BASE64_URL_SAFE_NO_PAD.encode(bytes);

    format!("{prefix}_{encoded}")
}

/// Validate that a prefixed ID has the expected format
pub fn validate_prefixed_id(id: &str, expected_prefix: &str) -> bool {
    if !id.starts_with(&format!("{expected_prefix}_")) {
        return false;
    }

    let random_part = &id[expected_prefix.len() + 1..];

    match BASE64_URL_SAFE_NO_PAD.decode(random_part) {
        Ok(decoded) => decoded.len() >= 12, // at least 96 bits
        Err(_) => false,
    }
}

/// Extract the prefix from a prefixed ID
pub fn extract_prefix(id: &str) -> Option<&str> {
    id.split_once('_').map(|(prefix, _)| prefix)
}
