//! Account management
//!
//! This module contains the core account struct and related functionality.
//!
//! An account carries its identity fields alongside its embedded security
//! state. The security fields are owned and mutated by the lockout state
//! machine and the two-factor service; everything else reads them.
//!
//! | Field                      | Type               | Description                                          |
//! | -------------------------- | ------------------ | ---------------------------------------------------- |
//! | `id`                       | `AccountId`        | The unique identifier for the account.               |
//! | `email`                    | `String`           | The email of the account holder.                     |
//! | `name`                     | `Option<String>`   | Display name.                                        |
//! | `level`                    | `PrivilegeLevel`   | Ordered privilege level.                             |
//! | `failed_attempts`          | `u32`              | Consecutive failed login attempts.                   |
//! | `locked_until`             | `Option<DateTime>` | Lockout horizon; elapsed means unlocked (lazy).      |
//! | `two_factor_enabled`       | `bool`             | Whether TOTP is required at login.                   |
//! | `two_factor_secret`        | `Option<String>`   | TOTP secret, present iff enrolled or pending.        |
//! | `requires_password_change` | `bool`             | Forces a password rotation at next login.            |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    error::ValidationError,
    id::{generate_prefixed_id, validate_prefixed_id},
};

/// A unique, stable identifier for a specific account
///
/// This value should be treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct AccountId(String);

impl AccountId {
    pub fn new(id: &str) -> Self {
        AccountId(id.to_string())
    }

    pub fn new_random() -> Self {
        AccountId(generate_prefixed_id("acct"))
    }

    pub fn into_inner(self) -> String {
        self.0
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that this ID has the correct format for an account ID
    pub fn is_valid(&self) -> bool {
        validate_prefixed_id(&self.0, "acct")
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new_random()
    }
}

impl From<String> for AccountId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl std::fmt::Display for AccountId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Ordered privilege level for administrative access.
///
/// The ordering is load-bearing: privilege checks compare with `>=` against
/// a required minimum, so `Viewer < Moderator < Admin < SuperAdmin` must
/// hold.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    #[default]
    Viewer,
    Moderator,
    Admin,
    SuperAdmin,
}

impl PrivilegeLevel {
    /// Stable storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PrivilegeLevel::Viewer => "viewer",
            PrivilegeLevel::Moderator => "moderator",
            PrivilegeLevel::Admin => "admin",
            PrivilegeLevel::SuperAdmin => "super_admin",
        }
    }
}

impl std::str::FromStr for PrivilegeLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "viewer" => Ok(PrivilegeLevel::Viewer),
            "moderator" => Ok(PrivilegeLevel::Moderator),
            "admin" => Ok(PrivilegeLevel::Admin),
            "super_admin" => Ok(PrivilegeLevel::SuperAdmin),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown privilege level: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Representation of an account, including its embedded security state.
///
/// The password hash never leaves the server; the struct is split into a
/// [`AccountSummary`] for wire responses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// The unique identifier for the account.
    pub id: AccountId,

    /// The email of the account holder.
    pub email: String,

    /// Display name.
    pub name: Option<String>,

    /// Ordered privilege level.
    pub level: PrivilegeLevel,

    /// Argon2 hash of the current password.
    #[serde(skip_serializing, default)]
    pub password_hash: String,

    /// When the password was last changed.
    pub password_changed_at: DateTime<Utc>,

    /// Whether the account must rotate its password at next login.
    pub requires_password_change: bool,

    /// Consecutive failed login attempts since the last full success.
    pub failed_attempts: u32,

    /// Lockout horizon. `None` or elapsed means unlocked.
    pub locked_until: Option<DateTime<Utc>>,

    /// Whether a TOTP code is required at login.
    pub two_factor_enabled: bool,

    /// TOTP secret (base32). Present iff enrolled or enrollment pending.
    #[serde(skip_serializing, default)]
    pub two_factor_secret: Option<String>,

    /// Most recent successful full authentication.
    pub last_login_at: Option<DateTime<Utc>>,

    /// Number of successful full authentications.
    pub login_count: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn builder() -> AccountBuilder {
        AccountBuilder::default()
    }

    /// Whether the account is locked at `now`.
    ///
    /// Locked state is always computed from `locked_until` at read time,
    /// never cached: an elapsed horizon reads as unlocked (lazy expiry).
    pub fn is_locked(&self, now: DateTime<Utc>) -> bool {
        self.locked_until.is_some_and(|until| until > now)
    }

    /// Wire-safe summary of this account.
    pub fn summary(&self) -> AccountSummary {
        AccountSummary {
            id: self.id.clone(),
            email: self.email.clone(),
            name: self.name.clone(),
            level: self.level,
            two_factor_enabled: self.two_factor_enabled,
            requires_password_change: self.requires_password_change,
            last_login_at: self.last_login_at,
        }
    }
}

/// The subset of account fields safe to return to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSummary {
    pub id: AccountId,
    pub email: String,
    pub name: Option<String>,
    pub level: PrivilegeLevel,
    pub two_factor_enabled: bool,
    pub requires_password_change: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct AccountBuilder {
    id: Option<AccountId>,
    email: Option<String>,
    name: Option<String>,
    level: Option<PrivilegeLevel>,
    password_hash: Option<String>,
    password_changed_at: Option<DateTime<Utc>>,
    requires_password_change: bool,
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
    two_factor_enabled: bool,
    two_factor_secret: Option<String>,
    last_login_at: Option<DateTime<Utc>>,
    login_count: i64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl AccountBuilder {
    pub fn id(mut self, id: AccountId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn email(mut self, email: String) -> Self {
        self.email = Some(email);
        self
    }

    pub fn name(mut self, name: Option<String>) -> Self {
        self.name = name;
        self
    }

    pub fn level(mut self, level: PrivilegeLevel) -> Self {
        self.level = Some(level);
        self
    }

    pub fn password_hash(mut self, password_hash: String) -> Self {
        self.password_hash = Some(password_hash);
        self
    }

    pub fn password_changed_at(mut self, at: DateTime<Utc>) -> Self {
        self.password_changed_at = Some(at);
        self
    }

    pub fn requires_password_change(mut self, required: bool) -> Self {
        self.requires_password_change = required;
        self
    }

    pub fn failed_attempts(mut self, failed_attempts: u32) -> Self {
        self.failed_attempts = failed_attempts;
        self
    }

    pub fn locked_until(mut self, locked_until: Option<DateTime<Utc>>) -> Self {
        self.locked_until = locked_until;
        self
    }

    pub fn two_factor_enabled(mut self, enabled: bool) -> Self {
        self.two_factor_enabled = enabled;
        self
    }

    pub fn two_factor_secret(mut self, secret: Option<String>) -> Self {
        self.two_factor_secret = secret;
        self
    }

    pub fn last_login_at(mut self, at: Option<DateTime<Utc>>) -> Self {
        self.last_login_at = at;
        self
    }

    pub fn login_count(mut self, count: i64) -> Self {
        self.login_count = count;
        self
    }

    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = Some(updated_at);
        self
    }

    pub fn build(self) -> Result<Account, Error> {
        let now = Utc::now();
        Ok(Account {
            id: self.id.unwrap_or_default(),
            email: self.email.ok_or(ValidationError::MissingField(
                "Email is required".to_string(),
            ))?,
            name: self.name,
            level: self.level.unwrap_or_default(),
            password_hash: self.password_hash.ok_or(ValidationError::MissingField(
                "Password hash is required".to_string(),
            ))?,
            password_changed_at: self.password_changed_at.unwrap_or(now),
            requires_password_change: self.requires_password_change,
            failed_attempts: self.failed_attempts,
            locked_until: self.locked_until,
            two_factor_enabled: self.two_factor_enabled,
            two_factor_secret: self.two_factor_secret,
            last_login_at: self.last_login_at,
            login_count: self.login_count,
            created_at: self.created_at.unwrap_or(now),
            updated_at: self.updated_at.unwrap_or(now),
        })
    }
}

/// Input for creating a new account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub id: AccountId,
    pub email: String,
    pub name: Option<String>,
    pub level: PrivilegeLevel,
    pub password_hash: String,
}

impl NewAccount {
    pub fn new(email: String, password_hash: String) -> Self {
        Self {
            id: AccountId::new_random(),
            email,
            name: None,
            level: PrivilegeLevel::default(),
            password_hash,
        }
    }

    pub fn with_name(mut self, name: String) -> Self {
        self.name = Some(name);
        self
    }

    pub fn with_level(mut self, level: PrivilegeLevel) -> Self {
        self.level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn test_account() -> Account {
        Account::builder()
            .email("admin@example.com".to_string())
            .password_hash("$argon2id$stub".to_string())
            .build()
            .unwrap()
    }

    #[test]
    fn test_account_id_prefixed() {
        let id = AccountId::new_random();
        assert!(id.as_str().starts_with("acct_"));
        assert!(id.is_valid());

        let id2 = AccountId::new_random();
        assert_ne!(id, id2);

        assert!(!AccountId::new("invalid").is_valid());
    }

    #[test]
    fn test_privilege_level_ordering() {
        assert!(PrivilegeLevel::Viewer < PrivilegeLevel::Moderator);
        assert!(PrivilegeLevel::Moderator < PrivilegeLevel::Admin);
        assert!(PrivilegeLevel::Admin < PrivilegeLevel::SuperAdmin);
        assert!(PrivilegeLevel::SuperAdmin >= PrivilegeLevel::Admin);
    }

    #[test]
    fn test_privilege_level_round_trip() {
        for level in [
            PrivilegeLevel::Viewer,
            PrivilegeLevel::Moderator,
            PrivilegeLevel::Admin,
            PrivilegeLevel::SuperAdmin,
        ] {
            let parsed: PrivilegeLevel = level.as_str().parse().unwrap();
            assert_eq!(parsed, level);
        }

        assert!("superuser".parse::<PrivilegeLevel>().is_err());
    }

    #[test]
    fn test_is_locked_lazy_expiry() {
        let now = Utc::now();
        let mut account = test_account();

        assert!(!account.is_locked(now));

        account.locked_until = Some(now + Duration::minutes(30));
        assert!(account.is_locked(now));

        // An elapsed horizon reads as unlocked without any write
        account.locked_until = Some(now - Duration::seconds(1));
        assert!(!account.is_locked(now));
    }

    #[test]
    fn test_builder_requires_email_and_hash() {
        let missing_email = Account::builder()
            .password_hash("hash".to_string())
            .build();
        assert!(missing_email.is_err());

        let missing_hash = Account::builder()
            .email("a@example.com".to_string())
            .build();
        assert!(missing_hash.is_err());
    }

    #[test]
    fn test_summary_excludes_secrets() {
        let mut account = test_account();
        account.two_factor_secret = Some("JBSWY3DPEHPK3PXP".to_string());

        let summary = account.summary();
        let json = serde_json::to_value(&summary).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("two_factor_secret").is_none());
        assert_eq!(json["email"], "admin@example.com");
    }
}
