//! Repository trait for account data access.
//!
//! Besides plain CRUD, this trait carries the security-state mutations the
//! authentication state machine and two-factor service depend on. Those
//! operations have atomicity requirements spelled out per method: two
//! concurrent failed-login requests for the same account must not race into
//! an inconsistent counter, and a backup code must never be accepted twice.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    account::{Account, AccountId, NewAccount},
};

/// Repository for account data access.
#[async_trait]
pub trait AccountRepository: Send + Sync + 'static {
    /// Create a new account
    async fn create(&self, account: NewAccount) -> Result<Account, Error>;

    /// Find an account by ID
    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, Error>;

    /// Find an account by email
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, Error>;

    /// Update an existing account's identity fields
    async fn update(&self, account: &Account) -> Result<Account, Error>;

    /// Record a failed login attempt.
    ///
    /// Must be a single atomic read-modify-write: the returned value is the
    /// post-increment `failed_attempts` as this caller observed it, so
    /// concurrent callers each see a distinct count.
    async fn record_failed_attempt(&self, id: &AccountId) -> Result<u32, Error>;

    /// Attempt the lockout transition.
    ///
    /// Compare-and-set: the account is locked only if it is not already
    /// locked at `now`. Returns `true` iff this caller performed the
    /// transition, so exactly one of any set of concurrent callers wins and
    /// exactly one lockout event is emitted per episode.
    async fn try_lock(
        &self,
        id: &AccountId,
        locked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Record a successful full authentication.
    ///
    /// Resets `failed_attempts` to 0, clears `locked_until`, sets
    /// `last_login_at` and increments `login_count` in one statement.
    async fn record_success(&self, id: &AccountId, now: DateTime<Utc>) -> Result<(), Error>;

    /// Clear lockout state and the attempt counter unconditionally.
    async fn clear_lockout(&self, id: &AccountId) -> Result<(), Error>;

    /// Replace the password hash, stamping `password_changed_at` and
    /// clearing `requires_password_change`. The superseded hash must be
    /// pushed onto the history in the same operation.
    async fn set_password_hash(
        &self,
        id: &AccountId,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// The most recent `limit` superseded password hashes, newest first.
    async fn password_history(&self, id: &AccountId, limit: u32) -> Result<Vec<String>, Error>;

    /// Flag or clear the forced-rotation bit.
    async fn set_requires_password_change(
        &self,
        id: &AccountId,
        required: bool,
    ) -> Result<(), Error>;

    /// Store a pending (not yet confirmed) two-factor secret.
    async fn set_two_factor_secret(
        &self,
        id: &AccountId,
        secret: Option<&str>,
    ) -> Result<(), Error>;

    /// Mark two-factor as enabled once enrollment is confirmed.
    async fn set_two_factor_enabled(&self, id: &AccountId, enabled: bool) -> Result<(), Error>;

    /// Disable two-factor entirely: clears the enabled flag, the secret and
    /// every remaining backup code together. No partial disable state may
    /// be observable.
    async fn disable_two_factor(&self, id: &AccountId) -> Result<(), Error>;

    /// Replace the account's backup codes with the given hashes.
    async fn replace_backup_codes(&self, id: &AccountId, hashes: &[String]) -> Result<(), Error>;

    /// Consume a backup code by hash.
    ///
    /// Must be a single atomic delete: `true` means this caller removed the
    /// code, and no other caller (concurrent or later) can ever match it
    /// again. The deletion IS the authentication decision.
    async fn consume_backup_code(&self, id: &AccountId, hash: &str) -> Result<bool, Error>;

    /// Number of unused backup codes remaining.
    async fn backup_code_count(&self, id: &AccountId) -> Result<u32, Error>;
}
