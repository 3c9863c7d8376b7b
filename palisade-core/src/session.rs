//! Session management
//!
//! This module contains the core session struct and related functionality.
//!
//! A session represents one authenticated client context. Sessions carry an
//! absolute expiry fixed at creation: renewal updates activity but never
//! moves `expires_at`, so a session cannot be kept alive indefinitely
//! through activity alone.
//!
//! | Field              | Type                 | Description                                       |
//! | ------------------ | -------------------- | ------------------------------------------------- |
//! | `token`            | `SessionToken`       | Opaque identifier presented by the client.        |
//! | `account_id`       | `AccountId`          | The owning account.                               |
//! | `fingerprint`      | `DeviceFingerprint`  | Hash of user agent + IP (+ optional salt).        |
//! | `created_at`       | `DateTime`           | Creation time.                                    |
//! | `last_activity_at` | `DateTime`           | Updated on renewal.                               |
//! | `expires_at`       | `DateTime`           | Absolute expiry, never extended.                  |
//! | `ended_at`         | `Option<DateTime>`   | Set once the session is ended.                    |
//! | `ended_reason`     | `Option<EndReason>`  | Why the session ended.                            |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    account::AccountId,
    crypto::{self, generate_secure_token},
    error::ValidationError,
};

/// An opaque session token with at least 256 bits of entropy.
///
/// The plaintext token travels to the client once; storage only ever sees
/// its SHA-256 hash, which doubles as the lookup key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a token presented by a client.
    pub fn new(token: &str) -> Self {
        SessionToken(token.to_string())
    }

    /// Create a new random session token.
    pub fn new_random() -> Self {
        SessionToken(generate_secure_token())
    }

    /// The at-rest hash of this token.
    pub fn token_hash(&self) -> String {
        crypto::hash_token(&self.0)
    }

    /// Verify this token against a stored hash in constant time.
    pub fn verify_hash(&self, stored_hash: &str) -> bool {
        crypto::verify_token_hash(&self.0, stored_hash)
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionToken {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A derived hash identifying a client device/browser combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceFingerprint(String);

impl DeviceFingerprint {
    /// Derive a fingerprint from connection attributes.
    pub fn derive(user_agent: &str, ip_address: &str, salt: Option<&str>) -> Self {
        DeviceFingerprint(crypto::device_fingerprint(user_agent, ip_address, salt))
    }

    pub fn new(value: &str) -> Self {
        DeviceFingerprint(value.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceFingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a session stopped being active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The client logged out.
    LoggedOut,
    /// The absolute expiry elapsed.
    Expired,
    /// Ended to make room under the concurrent-session cap.
    EvictedSessionLimit,
    /// Revoked by the account holder or an administrator.
    Revoked,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndReason::LoggedOut => "logged_out",
            EndReason::Expired => "expired",
            EndReason::EvictedSessionLimit => "evicted_session_limit",
            EndReason::Revoked => "revoked",
        }
    }
}

impl std::str::FromStr for EndReason {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "logged_out" => Ok(EndReason::LoggedOut),
            "expired" => Ok(EndReason::Expired),
            "evicted_session_limit" => Ok(EndReason::EvictedSessionLimit),
            "revoked" => Ok(EndReason::Revoked),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown session end reason: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The opaque token presented by the client.
    ///
    /// Rows loaded from storage carry an empty token (only the hash is
    /// persisted); such sessions must not be used for authentication.
    #[serde(skip_serializing, default)]
    pub token: SessionToken,

    /// SHA-256 of the token, the persisted identifier.
    pub token_hash: String,

    /// The owning account.
    pub account_id: AccountId,

    /// Device fingerprint captured at creation.
    pub fingerprint: DeviceFingerprint,

    /// The IP address of the client that created the session.
    pub ip_address: Option<String>,

    /// The user agent of the client that created the session.
    pub user_agent: Option<String>,

    /// Whether this is a long-lived "remember me" session.
    pub remember_me: bool,

    pub created_at: DateTime<Utc>,

    /// Updated on every renewal.
    pub last_activity_at: DateTime<Utc>,

    /// Absolute expiry. Monotonic: never pushed backward or forward after
    /// creation.
    pub expires_at: DateTime<Utc>,

    /// Set once the session has ended.
    pub ended_at: Option<DateTime<Utc>>,

    pub ended_reason: Option<EndReason>,
}

impl Session {
    pub fn builder() -> SessionBuilder {
        SessionBuilder::default()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Active means not ended and not past expiry.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.ended_at.is_none() && !self.is_expired(now)
    }
}

#[derive(Default)]
pub struct SessionBuilder {
    token: Option<SessionToken>,
    account_id: Option<AccountId>,
    fingerprint: Option<DeviceFingerprint>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    remember_me: bool,
    created_at: Option<DateTime<Utc>>,
    last_activity_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl SessionBuilder {
    pub fn token(mut self, token: SessionToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn account_id(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn fingerprint(mut self, fingerprint: DeviceFingerprint) -> Self {
        self.fingerprint = Some(fingerprint);
        self
    }

    pub fn ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn remember_me(mut self, remember_me: bool) -> Self {
        self.remember_me = remember_me;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn last_activity_at(mut self, last_activity_at: DateTime<Utc>) -> Self {
        self.last_activity_at = Some(last_activity_at);
        self
    }

    pub fn expires_at(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn build(self) -> Result<Session, Error> {
        let now = Utc::now();
        let token = self.token.unwrap_or_default();
        let token_hash = token.token_hash();
        Ok(Session {
            token,
            token_hash,
            account_id: self.account_id.ok_or(ValidationError::MissingField(
                "Account ID is required".to_string(),
            ))?,
            fingerprint: self.fingerprint.ok_or(ValidationError::MissingField(
                "Device fingerprint is required".to_string(),
            ))?,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            remember_me: self.remember_me,
            created_at: self.created_at.unwrap_or(now),
            last_activity_at: self.last_activity_at.unwrap_or(now),
            expires_at: self.expires_at.ok_or(ValidationError::MissingField(
                "Expiry is required".to_string(),
            ))?,
            ended_at: None,
            ended_reason: None,
        })
    }
}
