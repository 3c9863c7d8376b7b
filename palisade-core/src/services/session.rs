//! Session lifecycle service.
//!
//! Creation, renewal, expiry and revocation of sessions, plus the
//! max-concurrent-sessions policy. Expiry is absolute: `expires_at` is
//! fixed at creation and renewal only records activity, so a session can
//! never be kept alive indefinitely through use. Expired rows are marked
//! ended lazily when touched and swept by a periodic cleanup task.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Error,
    account::AccountId,
    error::SessionError,
    events::{SecurityEvent, SecurityEventType},
    repositories::SessionRepository,
    session::{DeviceFingerprint, EndReason, Session, SessionToken},
    services::audit::AuditLogger,
};

/// Policy knobs for session lifetime and concurrency.
#[derive(Debug, Clone)]
pub struct SessionPolicy {
    /// Absolute lifetime of a standard session.
    pub session_ttl: chrono::Duration,
    /// Absolute lifetime of a "remember me" session.
    pub remember_me_ttl: chrono::Duration,
    /// Maximum concurrently active standard sessions per account.
    pub max_concurrent: u32,
    /// Optional salt mixed into device fingerprints.
    pub fingerprint_salt: Option<String>,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            session_ttl: chrono::Duration::hours(12),
            remember_me_ttl: chrono::Duration::days(30),
            max_concurrent: 5,
            fingerprint_salt: None,
        }
    }
}

impl SessionPolicy {
    pub fn with_session_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_remember_me_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.remember_me_ttl = ttl;
        self
    }

    pub fn with_max_concurrent(mut self, max: u32) -> Self {
        self.max_concurrent = max;
        self
    }

    pub fn with_fingerprint_salt(mut self, salt: impl Into<String>) -> Self {
        self.fingerprint_salt = Some(salt.into());
        self
    }
}

/// Service for session management operations.
pub struct SessionService<S: SessionRepository> {
    repository: Arc<S>,
    audit: AuditLogger,
    policy: SessionPolicy,
}

impl<S: SessionRepository> SessionService<S> {
    pub fn new(repository: Arc<S>, audit: AuditLogger, policy: SessionPolicy) -> Self {
        Self {
            repository,
            audit,
            policy,
        }
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    /// Derive the device fingerprint for a connection under this policy's
    /// salt.
    pub fn fingerprint(&self, user_agent: Option<&str>, ip_address: Option<&str>) -> DeviceFingerprint {
        DeviceFingerprint::derive(
            user_agent.unwrap_or(""),
            ip_address.unwrap_or(""),
            self.policy.fingerprint_salt.as_deref(),
        )
    }

    /// Create a new session for an account.
    ///
    /// When the account already holds `max_concurrent` active standard
    /// sessions, the chronologically oldest one is ended with
    /// `evicted_session_limit` in the same transaction that inserts the
    /// new row. Remember-me sessions bypass the eviction trigger (they get
    /// the long TTL and never cause an eviction) but still count in
    /// reporting.
    pub async fn create_session(
        &self,
        account_id: &AccountId,
        ip_address: Option<String>,
        user_agent: Option<String>,
        remember_me: bool,
    ) -> Result<Session, Error> {
        let now = Utc::now();
        let ttl = if remember_me {
            self.policy.remember_me_ttl
        } else {
            self.policy.session_ttl
        };

        let fingerprint = self.fingerprint(user_agent.as_deref(), ip_address.as_deref());

        let session = Session::builder()
            .token(SessionToken::new_random())
            .account_id(account_id.clone())
            .fingerprint(fingerprint)
            .ip_address(ip_address.clone())
            .user_agent(user_agent.clone())
            .remember_me(remember_me)
            .created_at(now)
            .last_activity_at(now)
            .expires_at(now + ttl)
            .build()?;

        // Remember-me sessions skip the cap check but are still counted
        // in reporting
        let max_standard = (!remember_me).then_some(self.policy.max_concurrent);

        let evicted = self
            .repository
            .create(session.clone(), max_standard, now)
            .await?;

        if let Some(evicted) = evicted {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::SessionEvicted)
                    .account(account_id.clone())
                    .detail(serde_json::json!({
                        "evicted_created_at": evicted.created_at,
                        "reason": EndReason::EvictedSessionLimit.as_str(),
                    })),
            );
        }

        self.audit.log(
            SecurityEvent::new(SecurityEventType::SessionCreated)
                .account(account_id.clone())
                .ip_address(ip_address)
                .user_agent(user_agent)
                .detail(serde_json::json!({ "remember_me": remember_me })),
        );

        Ok(session)
    }

    /// Resolve a presented token into its active session.
    ///
    /// Any check against an expired or ended session yields
    /// [`SessionError::Expired`]; an expired row is marked ended with
    /// reason `expired` as a side effect (lazy cleanup).
    pub async fn authenticate(&self, token: &SessionToken) -> Result<Session, Error> {
        let now = Utc::now();
        let session = self
            .repository
            .find_by_token_hash(&token.token_hash())
            .await?
            .ok_or(SessionError::NotFound)?;

        if session.ended_at.is_some() {
            return Err(SessionError::Expired.into());
        }

        if session.is_expired(now) {
            self.repository
                .end(&session.token_hash, EndReason::Expired, now)
                .await?;
            self.audit.log(
                SecurityEvent::new(SecurityEventType::SessionExpired)
                    .account(session.account_id.clone()),
            );
            return Err(SessionError::Expired.into());
        }

        Ok(session)
    }

    /// Renew a session: updates `last_activity_at` only.
    ///
    /// There is no sliding window; `expires_at` is never extended.
    pub async fn renew(&self, token: &SessionToken) -> Result<Session, Error> {
        let mut session = self.authenticate(token).await?;

        let now = Utc::now();
        self.repository.touch(&session.token_hash, now).await?;
        session.last_activity_at = now;

        Ok(session)
    }

    /// End a session with the given reason.
    pub async fn revoke(&self, token: &SessionToken, reason: EndReason) -> Result<(), Error> {
        let now = Utc::now();
        let token_hash = token.token_hash();

        let session = self
            .repository
            .find_by_token_hash(&token_hash)
            .await?
            .ok_or(SessionError::NotFound)?;

        self.repository.end(&token_hash, reason, now).await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::SessionRevoked)
                .account(session.account_id.clone())
                .detail(serde_json::json!({ "reason": reason.as_str() })),
        );

        Ok(())
    }

    /// End every active session for an account, optionally sparing one.
    /// Returns the number of sessions ended.
    pub async fn revoke_all(
        &self,
        account_id: &AccountId,
        except: Option<&SessionToken>,
    ) -> Result<u64, Error> {
        let now = Utc::now();
        let except_hash = except.map(|t| t.token_hash());

        let ended = self
            .repository
            .end_all_for_account(account_id, except_hash.as_deref(), EndReason::Revoked, now)
            .await?;

        if ended > 0 {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::SessionRevoked)
                    .account(account_id.clone())
                    .detail(serde_json::json!({
                        "reason": EndReason::Revoked.as_str(),
                        "count": ended,
                    })),
            );
        }

        Ok(ended)
    }

    /// All active sessions for an account, newest first. Remember-me
    /// sessions are included.
    pub async fn active_sessions(&self, account_id: &AccountId) -> Result<Vec<Session>, Error> {
        self.repository
            .find_active_for_account(account_id, Utc::now())
            .await
    }

    /// Count of all active sessions for reporting.
    pub async fn active_count(&self, account_id: &AccountId) -> Result<u32, Error> {
        self.repository.active_count(account_id, Utc::now()).await
    }

    /// Whether this fingerprint has been seen for the account since the
    /// cutoff. Consulted by the risk engine.
    pub async fn fingerprint_seen(
        &self,
        account_id: &AccountId,
        fingerprint: &DeviceFingerprint,
        since: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.repository
            .fingerprint_seen(account_id, fingerprint, since)
            .await
    }

    /// Start the periodic expiry sweep.
    ///
    /// Marks sessions past `expires_at` as ended. Idempotent and safe to
    /// run concurrently with live traffic.
    pub fn start_cleanup_task(
        &self,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);

        const CLEANUP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(900);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(CLEANUP_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match repository.end_expired(Utc::now()).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Marked expired sessions as ended");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to sweep expired sessions");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down session cleanup task");
                        break;
                    }
                }
            }
        })
    }
}
