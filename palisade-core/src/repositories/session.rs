//! Repository trait for session data access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    account::AccountId,
    session::{DeviceFingerprint, EndReason, Session},
};

/// Repository for session data access.
///
/// Sessions are looked up by token hash; plaintext tokens never reach
/// storage. Ended rows are kept (with `ended_at`/`ended_reason`) rather
/// than deleted, so eviction and expiry stay visible to reporting.
#[async_trait]
pub trait SessionRepository: Send + Sync + 'static {
    /// Persist a new session, enforcing the concurrent-session cap.
    ///
    /// When `max_standard` is set and the account already holds that many
    /// active non-remember-me sessions, the implementation must end the
    /// chronologically oldest one with
    /// [`EndReason::EvictedSessionLimit`] and return it. Keeping the
    /// count, the eviction and the insert in one transaction is what
    /// stops two concurrent creations from both slipping under the cap.
    /// `None` skips the cap check entirely (remember-me sessions).
    async fn create(
        &self,
        session: Session,
        max_standard: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, Error>;

    /// Find a session by its token hash.
    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, Error>;

    /// Update `last_activity_at` for an active session.
    async fn touch(&self, token_hash: &str, at: DateTime<Utc>) -> Result<(), Error>;

    /// End a session with the given reason. Idempotent: an already ended
    /// session keeps its original reason and timestamp.
    async fn end(
        &self,
        token_hash: &str,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<(), Error>;

    /// End every active session for an account, optionally sparing one.
    ///
    /// Returns the number of sessions ended.
    async fn end_all_for_account(
        &self,
        account_id: &AccountId,
        except_token_hash: Option<&str>,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Count of active non-remember-me sessions for the account.
    ///
    /// This is the number the concurrent-session cap is checked against.
    async fn active_standard_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error>;

    /// Count of all active sessions (remember-me included), for reporting.
    async fn active_count(&self, account_id: &AccountId, now: DateTime<Utc>)
    -> Result<u32, Error>;

    /// All active sessions for an account, newest first.
    async fn find_active_for_account(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error>;

    /// Whether the fingerprint has been seen on any session for this
    /// account created since `since`. Used for new-device detection.
    async fn fingerprint_seen(
        &self,
        account_id: &AccountId,
        fingerprint: &DeviceFingerprint,
        since: DateTime<Utc>,
    ) -> Result<bool, Error>;

    /// Mark every session past its expiry as ended with
    /// [`EndReason::Expired`]. Idempotent, safe concurrent with live
    /// traffic. Returns the number of rows transitioned.
    async fn end_expired(&self, now: DateTime<Utc>) -> Result<u64, Error>;
}
