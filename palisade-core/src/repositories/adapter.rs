//! Adapters that wrap a [`RepositoryProvider`] and implement the
//! individual repository traits by delegation.
//!
//! Services are generic over single repositories; the top-level
//! coordinator holds one provider. These adapters bridge the two without
//! the provider having to hand out `Arc`s per repository.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::{
    Error,
    account::{Account, AccountId, NewAccount},
    events::{
        MitigationAction, SecurityEvent, SecurityEventType, ThreatLevel, ThreatRecord, ThreatType,
    },
    repositories::{
        AccountRepository, AuditQuery, AuditRepository, IpReputation, RepositoryProvider,
        SecureToken, SessionRepository, ThreatRepository, TokenPurpose, TokenRepository,
    },
    session::{DeviceFingerprint, EndReason, Session},
};

pub struct AccountRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AccountRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AccountRepository for AccountRepositoryAdapter<R> {
    async fn create(&self, account: NewAccount) -> Result<Account, Error> {
        self.provider.account().create(account).await
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, Error> {
        self.provider.account().find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        self.provider.account().find_by_email(email).await
    }

    async fn update(&self, account: &Account) -> Result<Account, Error> {
        self.provider.account().update(account).await
    }

    async fn record_failed_attempt(&self, id: &AccountId) -> Result<u32, Error> {
        self.provider.account().record_failed_attempt(id).await
    }

    async fn try_lock(
        &self,
        id: &AccountId,
        locked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.provider.account().try_lock(id, locked_until, now).await
    }

    async fn record_success(&self, id: &AccountId, now: DateTime<Utc>) -> Result<(), Error> {
        self.provider.account().record_success(id, now).await
    }

    async fn clear_lockout(&self, id: &AccountId) -> Result<(), Error> {
        self.provider.account().clear_lockout(id).await
    }

    async fn set_password_hash(
        &self,
        id: &AccountId,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.provider
            .account()
            .set_password_hash(id, hash, changed_at)
            .await
    }

    async fn password_history(&self, id: &AccountId, limit: u32) -> Result<Vec<String>, Error> {
        self.provider.account().password_history(id, limit).await
    }

    async fn set_requires_password_change(
        &self,
        id: &AccountId,
        required: bool,
    ) -> Result<(), Error> {
        self.provider
            .account()
            .set_requires_password_change(id, required)
            .await
    }

    async fn set_two_factor_secret(
        &self,
        id: &AccountId,
        secret: Option<&str>,
    ) -> Result<(), Error> {
        self.provider.account().set_two_factor_secret(id, secret).await
    }

    async fn set_two_factor_enabled(&self, id: &AccountId, enabled: bool) -> Result<(), Error> {
        self.provider
            .account()
            .set_two_factor_enabled(id, enabled)
            .await
    }

    async fn disable_two_factor(&self, id: &AccountId) -> Result<(), Error> {
        self.provider.account().disable_two_factor(id).await
    }

    async fn replace_backup_codes(&self, id: &AccountId, hashes: &[String]) -> Result<(), Error> {
        self.provider.account().replace_backup_codes(id, hashes).await
    }

    async fn consume_backup_code(&self, id: &AccountId, hash: &str) -> Result<bool, Error> {
        self.provider.account().consume_backup_code(id, hash).await
    }

    async fn backup_code_count(&self, id: &AccountId) -> Result<u32, Error> {
        self.provider.account().backup_code_count(id).await
    }
}

pub struct SessionRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> SessionRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> SessionRepository for SessionRepositoryAdapter<R> {
    async fn create(
        &self,
        session: Session,
        max_standard: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, Error> {
        self.provider
            .session()
            .create(session, max_standard, now)
            .await
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, Error> {
        self.provider.session().find_by_token_hash(token_hash).await
    }

    async fn touch(&self, token_hash: &str, at: DateTime<Utc>) -> Result<(), Error> {
        self.provider.session().touch(token_hash, at).await
    }

    async fn end(
        &self,
        token_hash: &str,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        self.provider.session().end(token_hash, reason, at).await
    }

    async fn end_all_for_account(
        &self,
        account_id: &AccountId,
        except_token_hash: Option<&str>,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.provider
            .session()
            .end_all_for_account(account_id, except_token_hash, reason, at)
            .await
    }

    async fn active_standard_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.provider
            .session()
            .active_standard_count(account_id, now)
            .await
    }

    async fn active_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        self.provider.session().active_count(account_id, now).await
    }

    async fn find_active_for_account(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        self.provider
            .session()
            .find_active_for_account(account_id, now)
            .await
    }

    async fn fingerprint_seen(
        &self,
        account_id: &AccountId,
        fingerprint: &DeviceFingerprint,
        since: DateTime<Utc>,
    ) -> Result<bool, Error> {
        self.provider
            .session()
            .fingerprint_seen(account_id, fingerprint, since)
            .await
    }

    async fn end_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.session().end_expired(now).await
    }
}

pub struct AuditRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> AuditRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> AuditRepository for AuditRepositoryAdapter<R> {
    async fn append(&self, event: &SecurityEvent) -> Result<(), Error> {
        self.provider.audit().append(event).await
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.provider.audit().query(query).await
    }

    async fn count_for_account(
        &self,
        account_id: &AccountId,
        event_types: &[SecurityEventType],
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.provider
            .audit()
            .count_for_account(account_id, event_types, since)
            .await
    }

    async fn purge_before(&self, horizon: DateTime<Utc>) -> Result<u64, Error> {
        self.provider.audit().purge_before(horizon).await
    }
}

pub struct ThreatRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> ThreatRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> ThreatRepository for ThreatRepositoryAdapter<R> {
    async fn upsert(
        &self,
        ip_address: &str,
        threat_type: ThreatType,
        level: ThreatLevel,
    ) -> Result<ThreatRecord, Error> {
        self.provider.threat().upsert(ip_address, threat_type, level).await
    }

    async fn find_by_ip(&self, ip_address: &str) -> Result<Vec<ThreatRecord>, Error> {
        self.provider.threat().find_by_ip(ip_address).await
    }

    async fn mitigate(&self, id: &str, action: MitigationAction) -> Result<(), Error> {
        self.provider.threat().mitigate(id, action).await
    }

    async fn add_to_blacklist(&self, ip_address: &str, reason: &str) -> Result<(), Error> {
        self.provider.threat().add_to_blacklist(ip_address, reason).await
    }

    async fn is_blacklisted(&self, ip_address: &str) -> Result<bool, Error> {
        self.provider.threat().is_blacklisted(ip_address).await
    }

    async fn reputation(&self, ip_address: &str) -> Result<IpReputation, Error> {
        self.provider.threat().reputation(ip_address).await
    }
}

pub struct TokenRepositoryAdapter<R: RepositoryProvider> {
    provider: Arc<R>,
}

impl<R: RepositoryProvider> TokenRepositoryAdapter<R> {
    pub fn new(provider: Arc<R>) -> Self {
        Self { provider }
    }
}

#[async_trait]
impl<R: RepositoryProvider> TokenRepository for TokenRepositoryAdapter<R> {
    async fn create_token(
        &self,
        account_id: &AccountId,
        purpose: TokenPurpose,
        expires_in: Duration,
    ) -> Result<SecureToken, Error> {
        self.provider
            .token()
            .create_token(account_id, purpose, expires_in)
            .await
    }

    async fn verify_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<SecureToken>, Error> {
        self.provider.token().verify_token(token, purpose).await
    }

    async fn check_token(&self, token: &str, purpose: TokenPurpose) -> Result<bool, Error> {
        self.provider.token().check_token(token, purpose).await
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        self.provider.token().cleanup_expired().await
    }
}
