//! Cryptographic utilities for secure token handling
//!
//! This module provides secure token generation, token hashing with
//! constant-time verification, and device fingerprint derivation.
//!
//! # Security
//!
//! Token verification with a standard string comparison can exit early on
//! the first mismatching byte, creating measurable timing differences.
//! Tokens are therefore stored as SHA-256 hashes and compared with the
//! `subtle` crate's constant-time equality.
//!
//! SHA-256 (rather than argon2) is sufficient here because the tokens have
//! 256 bits of entropy from a CSPRNG; slow hashing is reserved for
//! low-entropy secrets (passwords).

use rand::{TryRngCore, rngs::OsRng};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generate a cryptographically secure random token.
///
/// Produces a 256-bit random token encoded as URL-safe base64
/// (43 characters), suitable for session tokens and reset tokens.
///
/// # Panics
///
/// Panics if the OS random number generator fails. This indicates a
/// critical system failure from which recovery is not possible for
/// security-sensitive operations.
pub fn generate_secure_token() -> String {
    let mut bytes = [0u8; 32]; // 256 bits of entropy
    OsRng
        .try_fill_bytes(&mut bytes)
        .expect("OS RNG failure - system entropy source unavailable");
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

/// Hash a token for storage using SHA-256.
///
/// Deterministic, so the hash can double as the database lookup key.
/// The token must carry CSPRNG-grade entropy.
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let result = hasher.finalize();
    hex::encode(result)
}

/// Verify a token against a stored hash with constant-time comparison.
pub fn verify_token_hash(token: &str, stored_hash: &str) -> bool {
    let computed_hash = hash_token(token);
    constant_time_compare(computed_hash.as_bytes(), stored_hash.as_bytes())
}

/// Perform constant-time comparison of two byte slices.
pub fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Derive a device fingerprint from the client's user agent and IP address.
///
/// The fingerprint identifies a device/browser combination for new-device
/// detection. An optional salt decouples stored fingerprints from raw
/// client data across deployments.
pub fn device_fingerprint(user_agent: &str, ip_address: &str, salt: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(user_agent.as_bytes());
    hasher.update(b"\x1f");
    hasher.update(ip_address.as_bytes());
    if let Some(salt) = salt {
        hasher.update(b"\x1f");
        hasher.update(salt.as_bytes());
    }
    hex::encode(hasher.finalize())
}
