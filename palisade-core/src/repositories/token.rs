//! Repository trait for purpose-scoped secure tokens.
//!
//! Secure tokens back the password reset flow: high-entropy, single-use,
//! short-lived, stored hashed. Scoping every token to a purpose keeps
//! token types isolated from each other.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, account::AccountId, error::ValidationError};

/// What a secure token may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenPurpose {
    PasswordReset,
}

impl TokenPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenPurpose::PasswordReset => "password_reset",
        }
    }
}

impl std::str::FromStr for TokenPurpose {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "password_reset" => Ok(TokenPurpose::PasswordReset),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown token purpose: {other}"
            ))),
        }
    }
}

/// A purpose-scoped single-use token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecureToken {
    pub account_id: AccountId,

    /// Plaintext token. Only populated on the creating call; rows loaded
    /// from storage carry an empty string (only the hash is persisted).
    #[serde(skip_serializing, default)]
    pub token: String,

    pub purpose: TokenPurpose,
    pub used_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl SecureToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Repository for secure token data access.
#[async_trait]
pub trait TokenRepository: Send + Sync + 'static {
    /// Mint a new token for an account and purpose.
    async fn create_token(
        &self,
        account_id: &AccountId,
        purpose: TokenPurpose,
        expires_in: Duration,
    ) -> Result<SecureToken, Error>;

    /// Verify and consume a token for a specific purpose.
    ///
    /// Consumption is atomic with verification: a token that matched is
    /// marked used in the same operation and can never match again.
    /// Expired, already-used, unknown and wrong-purpose tokens all return
    /// `None`.
    async fn verify_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<SecureToken>, Error>;

    /// Check validity without consuming.
    async fn check_token(&self, token: &str, purpose: TokenPurpose) -> Result<bool, Error>;

    /// Remove expired tokens. Returns rows removed.
    async fn cleanup_expired(&self) -> Result<u64, Error>;
}
