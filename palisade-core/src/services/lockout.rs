//! Account lockout state machine.
//!
//! This module implements attempt-indexed account lockout: an account moves
//! from Active to Locked when its consecutive failed-attempt counter
//! reaches the threshold, and back to Active either lazily (the lockout
//! horizon elapses) or explicitly (admin unlock). Attempt-indexed rather
//! than time-window-indexed lockout defeats slow brute-force; lazy unlock
//! avoids a background sweep, which means locked state is always computed
//! from `locked_until` at read time and never cached.
//!
//! # Example
//!
//! ```rust,ignore
//! use palisade_core::services::{LockoutConfig, LockoutService};
//!
//! let service = LockoutService::new(accounts, threats, audit, LockoutConfig::default());
//!
//! // Reject early when the account is locked
//! service.ensure_unlocked(&account, Utc::now())?;
//!
//! // Record a failed attempt after an authentication failure
//! let status = service.record_failure(&account, Some("192.0.2.1"), None).await?;
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::{
    Error,
    account::{Account, AccountId},
    error::AuthError,
    events::{SecurityEvent, SecurityEventType, ThreatLevel, ThreatType},
    repositories::{AccountRepository, ThreatRepository},
    services::audit::AuditLogger,
};

/// Configuration for lockout behavior.
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Consecutive failed attempts that trigger a lockout.
    pub threshold: u32,
    /// How long a lockout lasts.
    pub lockout_duration: chrono::Duration,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_duration: chrono::Duration::minutes(30),
        }
    }
}

impl LockoutConfig {
    pub fn with_threshold(mut self, threshold: u32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_lockout_duration(mut self, duration: chrono::Duration) -> Self {
        self.lockout_duration = duration;
        self
    }
}

/// The lockout state of an account as observed at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockoutStatus {
    pub failed_attempts: u32,
    pub is_locked: bool,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    /// Seconds until the lockout expires, if locked.
    pub fn retry_after_seconds(&self) -> Option<i64> {
        self.locked_until
            .filter(|_| self.is_locked)
            .map(|until| (until - Utc::now()).num_seconds().max(0))
    }
}

/// Service owning the per-account failure counter and lockout transitions.
///
/// # Thread Safety
///
/// The service is shareable across tasks; counter increments and the
/// lock transition are atomic at the repository layer, so concurrent
/// failed-login requests cannot double-lock an account or skip the
/// threshold.
pub struct LockoutService<A: AccountRepository, T: ThreatRepository> {
    accounts: Arc<A>,
    threats: Arc<T>,
    audit: AuditLogger,
    config: LockoutConfig,
}

impl<A: AccountRepository, T: ThreatRepository> LockoutService<A, T> {
    pub fn new(accounts: Arc<A>, threats: Arc<T>, audit: AuditLogger, config: LockoutConfig) -> Self {
        Self {
            accounts,
            threats,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    /// The lockout state of an account at `now`.
    ///
    /// An elapsed `locked_until` reads as Active with a zero counter: the
    /// lazy unlock happens in the observer's view before any write.
    pub fn status(&self, account: &Account, now: DateTime<Utc>) -> LockoutStatus {
        if account.is_locked(now) {
            LockoutStatus {
                failed_attempts: account.failed_attempts,
                is_locked: true,
                locked_until: account.locked_until,
            }
        } else if account.locked_until.is_some() {
            // Horizon elapsed: lazily unlocked, counter reads as reset
            LockoutStatus {
                failed_attempts: 0,
                is_locked: false,
                locked_until: None,
            }
        } else {
            LockoutStatus {
                failed_attempts: account.failed_attempts,
                is_locked: false,
                locked_until: None,
            }
        }
    }

    /// Reject with [`AuthError::AccountLocked`] when the account is locked
    /// at `now`.
    pub fn ensure_unlocked(&self, account: &Account, now: DateTime<Utc>) -> Result<(), Error> {
        match account.locked_until {
            Some(locked_until) if locked_until > now => Err(AuthError::AccountLocked {
                locked_until,
            }
            .into()),
            _ => Ok(()),
        }
    }

    /// Record a failed login attempt.
    ///
    /// Rejects immediately (without incrementing) when the account is
    /// currently locked. Otherwise increments the counter atomically; the
    /// caller whose post-increment count reaches the threshold performs the
    /// lockout transition, emits the single `account_locked` audit event
    /// for the episode, and registers a brute-force threat for the source
    /// IP.
    pub async fn record_failure(
        &self,
        account: &Account,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<LockoutStatus, Error> {
        let now = Utc::now();

        if account.is_locked(now) {
            return Err(AuthError::AccountLocked {
                locked_until: account.locked_until.unwrap_or(now),
            }
            .into());
        }

        // A stale lockout that has elapsed resets the counter before the
        // new failure lands (lazy unlock).
        if account.locked_until.is_some() {
            self.accounts.clear_lockout(&account.id).await?;
        }

        let failed_attempts = self.accounts.record_failed_attempt(&account.id).await?;

        if failed_attempts < self.config.threshold {
            return Ok(LockoutStatus {
                failed_attempts,
                is_locked: false,
                locked_until: None,
            });
        }

        let locked_until = now + self.config.lockout_duration;
        let transitioned = self.accounts.try_lock(&account.id, locked_until, now).await?;

        if transitioned {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::AccountLocked)
                    .account(account.id.clone())
                    .ip_address(ip_address.map(String::from))
                    .user_agent(user_agent.map(String::from))
                    .detail(serde_json::json!({
                        "failed_attempts": failed_attempts,
                        "locked_until": locked_until,
                    })),
            );

            if let Some(ip) = ip_address {
                if let Err(e) = self
                    .threats
                    .upsert(ip, ThreatType::BruteForce, ThreatLevel::Medium)
                    .await
                {
                    tracing::warn!(error = %e, ip = %ip, "Failed to record brute force threat");
                }
            }
        }

        Ok(LockoutStatus {
            failed_attempts,
            is_locked: true,
            locked_until: Some(locked_until),
        })
    }

    /// Record a successful full authentication.
    ///
    /// Resets the counter to 0, clears the lockout horizon and bumps the
    /// login bookkeeping, regardless of prior state.
    pub async fn record_success(&self, account_id: &AccountId) -> Result<(), Error> {
        self.accounts.record_success(account_id, Utc::now()).await
    }

    /// Explicit admin override: clears lockout and counter immediately,
    /// independent of elapsed time. Always audited with the acting admin.
    pub async fn unlock(&self, account_id: &AccountId, admin_id: &AccountId) -> Result<(), Error> {
        self.accounts.clear_lockout(account_id).await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::AccountUnlocked)
                .account(account_id.clone())
                .detail(serde_json::json!({ "unlocked_by": admin_id.as_str() })),
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::AuditLogger;
    use crate::services::testing::{MockAccountRepository, MockThreatRepository};
    use chrono::Duration;

    fn service(
        accounts: Arc<MockAccountRepository>,
        threats: Arc<MockThreatRepository>,
        config: LockoutConfig,
    ) -> LockoutService<MockAccountRepository, MockThreatRepository> {
        LockoutService::new(accounts, threats, AuditLogger::disconnected(), config)
    }

    async fn seeded_account(accounts: &MockAccountRepository) -> Account {
        accounts
            .seed("target@example.com", "$argon2id$stub")
            .await
    }

    #[tokio::test]
    async fn test_single_failure_not_locked() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let service = service(accounts.clone(), threats, LockoutConfig::default());

        let status = service
            .record_failure(&account, Some("192.0.2.1"), None)
            .await
            .unwrap();

        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_lockout_at_threshold() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default().with_threshold(3);
        let service = service(accounts.clone(), threats.clone(), config);

        for _ in 0..2 {
            let status = service.record_failure(&account, None, None).await.unwrap();
            assert!(!status.is_locked);
        }

        let status = service
            .record_failure(&account, Some("192.0.2.9"), None)
            .await
            .unwrap();
        assert!(status.is_locked);
        assert_eq!(status.failed_attempts, 3);
        assert!(status.locked_until.is_some());

        // Brute force threat registered for the source IP
        assert_eq!(threats.upsert_count("192.0.2.9").await, 1);
    }

    #[tokio::test]
    async fn test_locked_account_rejects_without_increment() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default().with_threshold(2);
        let service = service(accounts.clone(), threats, config);

        for _ in 0..2 {
            service.record_failure(&account, None, None).await.unwrap();
        }

        let locked = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        let result = service.record_failure(&locked, None, None).await;

        assert!(matches!(
            result,
            Err(Error::Auth(AuthError::AccountLocked { .. }))
        ));
        // Counter stays at the threshold
        let after = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(after.failed_attempts, 2);
    }

    #[tokio::test]
    async fn test_lazy_unlock_resets_counter() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default().with_threshold(2);
        let service = service(accounts.clone(), threats, config);

        for _ in 0..2 {
            service.record_failure(&account, None, None).await.unwrap();
        }

        // Simulate the horizon elapsing
        accounts
            .set_locked_until(&account.id, Some(Utc::now() - Duration::seconds(1)))
            .await;

        let stale = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        let status = service.status(&stale, Utc::now());
        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 0);

        // A new failure starts from a clean counter
        let status = service.record_failure(&stale, None, None).await.unwrap();
        assert!(!status.is_locked);
        assert_eq!(status.failed_attempts, 1);
    }

    #[tokio::test]
    async fn test_record_success_resets_state() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let service = service(accounts.clone(), threats, LockoutConfig::default());

        for _ in 0..3 {
            service.record_failure(&account, None, None).await.unwrap();
        }

        service.record_success(&account.id).await.unwrap();

        let after = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        assert_eq!(after.failed_attempts, 0);
        assert!(after.locked_until.is_none());
        assert_eq!(after.login_count, 1);
        assert!(after.last_login_at.is_some());
    }

    #[tokio::test]
    async fn test_admin_unlock_clears_immediately() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default().with_threshold(1);
        let service = service(accounts.clone(), threats, config);

        service.record_failure(&account, None, None).await.unwrap();
        let locked = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        assert!(locked.is_locked(Utc::now()));

        let admin = AccountId::new_random();
        service.unlock(&account.id, &admin).await.unwrap();

        let after = accounts.find_by_id(&account.id).await.unwrap().unwrap();
        assert!(!after.is_locked(Utc::now()));
        assert_eq!(after.failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_exactly_one_lockout_transition() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default().with_threshold(2);
        let service = Arc::new(service(accounts.clone(), threats, config));

        // Drive the counter past the threshold from several callers; the
        // CAS in try_lock lets exactly one perform the transition.
        for _ in 0..4 {
            let _ = service.record_failure(&account, None, None).await;
        }

        assert_eq!(accounts.lock_transition_count(&account.id).await, 1);
    }

    #[tokio::test]
    async fn test_retry_after_seconds() {
        let accounts = Arc::new(MockAccountRepository::default());
        let threats = Arc::new(MockThreatRepository::default());
        let account = seeded_account(&accounts).await;
        let config = LockoutConfig::default()
            .with_threshold(1)
            .with_lockout_duration(Duration::minutes(30));
        let service = service(accounts.clone(), threats, config);

        let status = service.record_failure(&account, None, None).await.unwrap();
        assert!(status.is_locked);

        let retry_after = status.retry_after_seconds().unwrap();
        // Roughly 30 minutes out, allow some slack for test execution
        assert!(retry_after > 1790 && retry_after <= 1800);
    }
}
