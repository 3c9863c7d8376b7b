//! In-memory mock repositories shared by the service unit tests.
//!
//! The mocks honor the same atomicity contracts as a real backend (single
//! critical section per counter mutation, delete-as-decision for backup
//! codes) so concurrency-sensitive assertions are meaningful.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use crate::{
    Error,
    account::{Account, AccountId, NewAccount, PrivilegeLevel},
    crypto,
    error::StorageError,
    events::{
        MitigationAction, SecurityEvent, SecurityEventType, ThreatLevel, ThreatRecord, ThreatType,
    },
    repositories::{
        AccountRepository, AuditQuery, AuditRepository, IpReputation, SecureToken,
        SessionRepository, ThreatRepository, TokenPurpose, TokenRepository,
    },
    services::notify::{NotifyError, SecurityNotice, SecurityNotifier},
    services::risk::ReputationLookup,
    session::{DeviceFingerprint, EndReason, Session},
};

// ============================================================================
// Accounts
// ============================================================================

#[derive(Default)]
pub struct MockAccountRepository {
    accounts: Mutex<HashMap<AccountId, Account>>,
    by_email: Mutex<HashMap<String, AccountId>>,
    history: Mutex<HashMap<AccountId, Vec<String>>>,
    backup_codes: Mutex<HashMap<AccountId, Vec<String>>>,
    lock_transitions: Mutex<HashMap<AccountId, u32>>,
}

impl MockAccountRepository {
    pub async fn seed(&self, email: &str, password_hash: &str) -> Account {
        self.create(NewAccount::new(email.to_string(), password_hash.to_string()))
            .await
            .unwrap()
    }

    pub async fn set_locked_until(&self, id: &AccountId, locked_until: Option<DateTime<Utc>>) {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).unwrap();
        account.locked_until = locked_until;
    }

    pub async fn set_level(&self, id: &AccountId, level: PrivilegeLevel) {
        let mut accounts = self.accounts.lock().await;
        accounts.get_mut(id).unwrap().level = level;
    }

    pub async fn lock_transition_count(&self, id: &AccountId) -> u32 {
        *self.lock_transitions.lock().await.get(id).unwrap_or(&0)
    }
}

#[async_trait]
impl AccountRepository for MockAccountRepository {
    async fn create(&self, new_account: NewAccount) -> Result<Account, Error> {
        let account = Account::builder()
            .id(new_account.id.clone())
            .email(new_account.email.clone())
            .name(new_account.name)
            .level(new_account.level)
            .password_hash(new_account.password_hash)
            .build()?;

        self.accounts
            .lock()
            .await
            .insert(account.id.clone(), account.clone());
        self.by_email
            .lock()
            .await
            .insert(new_account.email, account.id.clone());
        Ok(account)
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, Error> {
        Ok(self.accounts.lock().await.get(id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        let by_email = self.by_email.lock().await;
        let Some(id) = by_email.get(email) else {
            return Ok(None);
        };
        Ok(self.accounts.lock().await.get(id).cloned())
    }

    async fn update(&self, account: &Account) -> Result<Account, Error> {
        let mut accounts = self.accounts.lock().await;
        accounts.insert(account.id.clone(), account.clone());
        Ok(account.clone())
    }

    async fn record_failed_attempt(&self, id: &AccountId) -> Result<u32, Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.failed_attempts += 1;
        Ok(account.failed_attempts)
    }

    async fn try_lock(
        &self,
        id: &AccountId,
        locked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;

        if account.is_locked(now) {
            return Ok(false);
        }

        account.locked_until = Some(locked_until);
        drop(accounts);

        *self
            .lock_transitions
            .lock()
            .await
            .entry(id.clone())
            .or_insert(0) += 1;
        Ok(true)
    }

    async fn record_success(&self, id: &AccountId, now: DateTime<Utc>) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.failed_attempts = 0;
        account.locked_until = None;
        account.last_login_at = Some(now);
        account.login_count += 1;
        Ok(())
    }

    async fn clear_lockout(&self, id: &AccountId) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.failed_attempts = 0;
        account.locked_until = None;
        Ok(())
    }

    async fn set_password_hash(
        &self,
        id: &AccountId,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;

        let old_hash = std::mem::replace(&mut account.password_hash, hash.to_string());
        account.password_changed_at = changed_at;
        account.requires_password_change = false;
        drop(accounts);

        self.history
            .lock()
            .await
            .entry(id.clone())
            .or_default()
            .insert(0, old_hash);
        Ok(())
    }

    async fn password_history(&self, id: &AccountId, limit: u32) -> Result<Vec<String>, Error> {
        let history = self.history.lock().await;
        Ok(history
            .get(id)
            .map(|hashes| hashes.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default())
    }

    async fn set_requires_password_change(
        &self,
        id: &AccountId,
        required: bool,
    ) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.requires_password_change = required;
        Ok(())
    }

    async fn set_two_factor_secret(
        &self,
        id: &AccountId,
        secret: Option<&str>,
    ) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.two_factor_secret = secret.map(String::from);
        Ok(())
    }

    async fn set_two_factor_enabled(&self, id: &AccountId, enabled: bool) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.two_factor_enabled = enabled;
        Ok(())
    }

    async fn disable_two_factor(&self, id: &AccountId) -> Result<(), Error> {
        let mut accounts = self.accounts.lock().await;
        let account = accounts.get_mut(id).ok_or(StorageError::NotFound)?;
        account.two_factor_enabled = false;
        account.two_factor_secret = None;
        drop(accounts);

        self.backup_codes.lock().await.remove(id);
        Ok(())
    }

    async fn replace_backup_codes(&self, id: &AccountId, hashes: &[String]) -> Result<(), Error> {
        self.backup_codes
            .lock()
            .await
            .insert(id.clone(), hashes.to_vec());
        Ok(())
    }

    async fn consume_backup_code(&self, id: &AccountId, hash: &str) -> Result<bool, Error> {
        let mut codes = self.backup_codes.lock().await;
        let Some(account_codes) = codes.get_mut(id) else {
            return Ok(false);
        };
        let before = account_codes.len();
        account_codes.retain(|stored| stored != hash);
        Ok(account_codes.len() < before)
    }

    async fn backup_code_count(&self, id: &AccountId) -> Result<u32, Error> {
        let codes = self.backup_codes.lock().await;
        Ok(codes.get(id).map(|c| c.len() as u32).unwrap_or(0))
    }
}

// ============================================================================
// Sessions
// ============================================================================

#[derive(Default)]
pub struct MockSessionRepository {
    sessions: Mutex<Vec<Session>>,
}

#[async_trait]
impl SessionRepository for MockSessionRepository {
    async fn create(
        &self,
        session: Session,
        max_standard: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, Error> {
        // One critical section covers the count, the eviction and the
        // insert, mirroring the single-transaction contract
        let mut sessions = self.sessions.lock().await;

        let evicted = match max_standard {
            Some(cap) => {
                let active: u32 = sessions
                    .iter()
                    .filter(|s| {
                        s.account_id == session.account_id && !s.remember_me && s.is_active(now)
                    })
                    .count() as u32;
                if active >= cap {
                    let oldest = sessions
                        .iter_mut()
                        .filter(|s| {
                            s.account_id == session.account_id
                                && !s.remember_me
                                && s.is_active(now)
                        })
                        .min_by_key(|s| s.created_at);
                    oldest.map(|oldest| {
                        oldest.ended_at = Some(now);
                        oldest.ended_reason = Some(EndReason::EvictedSessionLimit);
                        oldest.clone()
                    })
                } else {
                    None
                }
            }
            None => None,
        };

        sessions.push(session);
        Ok(evicted)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, Error> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.iter().find(|s| s.token_hash == token_hash).cloned())
    }

    async fn touch(&self, token_hash: &str, at: DateTime<Utc>) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions.iter_mut().find(|s| s.token_hash == token_hash) {
            session.last_activity_at = at;
        }
        Ok(())
    }

    async fn end(
        &self,
        token_hash: &str,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut sessions = self.sessions.lock().await;
        if let Some(session) = sessions
            .iter_mut()
            .find(|s| s.token_hash == token_hash && s.ended_at.is_none())
        {
            session.ended_at = Some(at);
            session.ended_reason = Some(reason);
        }
        Ok(())
    }

    async fn end_all_for_account(
        &self,
        account_id: &AccountId,
        except_token_hash: Option<&str>,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let mut sessions = self.sessions.lock().await;
        let mut ended = 0u64;
        for session in sessions.iter_mut() {
            if session.account_id == *account_id
                && session.ended_at.is_none()
                && Some(session.token_hash.as_str()) != except_token_hash
            {
                session.ended_at = Some(at);
                session.ended_reason = Some(reason);
                ended += 1;
            }
        }
        Ok(ended)
    }

    async fn active_standard_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .filter(|s| s.account_id == *account_id && !s.remember_me && s.is_active(now))
            .count() as u32)
    }

    async fn active_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let sessions = self.sessions.lock().await;
        Ok(sessions
            .iter()
            .filter(|s| s.account_id == *account_id && s.is_active(now))
            .count() as u32)
    }

    async fn find_active_for_account(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        let sessions = self.sessions.lock().await;
        let mut active: Vec<Session> = sessions
            .iter()
            .filter(|s| s.account_id == *account_id && s.is_active(now))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(active)
    }

    async fn fingerprint_seen(
        &self,
        account_id: &AccountId,
        fingerprint: &DeviceFingerprint,
        since: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let sessions = self.sessions.lock().await;
        Ok(sessions.iter().any(|s| {
            s.account_id == *account_id && s.fingerprint == *fingerprint && s.created_at >= since
        }))
    }

    async fn end_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let mut sessions = self.sessions.lock().await;
        let mut ended = 0u64;
        for session in sessions.iter_mut() {
            if session.ended_at.is_none() && session.is_expired(now) {
                session.ended_at = Some(now);
                session.ended_reason = Some(EndReason::Expired);
                ended += 1;
            }
        }
        Ok(ended)
    }
}

// ============================================================================
// Audit
// ============================================================================

#[derive(Default)]
pub struct MockAuditRepository {
    events: Mutex<Vec<SecurityEvent>>,
    fail_remaining: Mutex<u32>,
}

impl MockAuditRepository {
    pub async fn events(&self) -> Vec<SecurityEvent> {
        self.events.lock().await.clone()
    }

    pub async fn fail_next_appends(&self, count: u32) {
        *self.fail_remaining.lock().await = count;
    }

    pub async fn count_of_type(&self, event_type: SecurityEventType) -> usize {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl AuditRepository for MockAuditRepository {
    async fn append(&self, event: &SecurityEvent) -> Result<(), Error> {
        let mut fail_remaining = self.fail_remaining.lock().await;
        if *fail_remaining > 0 {
            *fail_remaining -= 1;
            return Err(StorageError::Database("injected failure".to_string()).into());
        }
        drop(fail_remaining);

        self.events.lock().await.push(event.clone());
        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error> {
        let events = self.events.lock().await;
        let mut matching: Vec<SecurityEvent> = events
            .iter()
            .filter(|e| {
                query
                    .account_id
                    .as_ref()
                    .is_none_or(|id| e.account_id.as_ref() == Some(id))
                    && query.event_type.is_none_or(|t| e.event_type == t)
                    && query.severity.is_none_or(|s| e.severity == s)
                    && query.since.is_none_or(|since| e.created_at >= since)
                    && query.until.is_none_or(|until| e.created_at < until)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.unwrap_or(u32::MAX) as usize;
        Ok(matching.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_for_account(
        &self,
        account_id: &AccountId,
        event_types: &[SecurityEventType],
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let events = self.events.lock().await;
        Ok(events
            .iter()
            .filter(|e| {
                e.account_id.as_ref() == Some(account_id)
                    && event_types.contains(&e.event_type)
                    && e.created_at >= since
            })
            .count() as u64)
    }

    async fn purge_before(&self, horizon: DateTime<Utc>) -> Result<u64, Error> {
        let mut events = self.events.lock().await;
        let before = events.len();
        events.retain(|e| e.created_at >= horizon);
        Ok((before - events.len()) as u64)
    }
}

// ============================================================================
// Threats
// ============================================================================

#[derive(Default)]
pub struct MockThreatRepository {
    records: Mutex<Vec<ThreatRecord>>,
    blacklist: Mutex<HashSet<String>>,
}

impl MockThreatRepository {
    pub async fn upsert_count(&self, ip_address: &str) -> u32 {
        self.records
            .lock()
            .await
            .iter()
            .filter(|r| r.ip_address == ip_address)
            .map(|r| r.frequency)
            .sum()
    }

    pub async fn blacklist_ip(&self, ip_address: &str) {
        self.blacklist.lock().await.insert(ip_address.to_string());
    }
}

#[async_trait]
impl ThreatRepository for MockThreatRepository {
    async fn upsert(
        &self,
        ip_address: &str,
        threat_type: ThreatType,
        level: ThreatLevel,
    ) -> Result<ThreatRecord, Error> {
        let mut records = self.records.lock().await;
        if let Some(record) = records
            .iter_mut()
            .find(|r| r.ip_address == ip_address && r.threat_type == threat_type)
        {
            record.frequency += 1;
            record.last_seen = Utc::now();
            record.level = record.level.max(level);
            return Ok(record.clone());
        }

        let record = ThreatRecord::new(ip_address.to_string(), threat_type, level);
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_ip(&self, ip_address: &str) -> Result<Vec<ThreatRecord>, Error> {
        let records = self.records.lock().await;
        let mut matching: Vec<ThreatRecord> = records
            .iter()
            .filter(|r| r.ip_address == ip_address)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        Ok(matching)
    }

    async fn mitigate(&self, id: &str, action: MitigationAction) -> Result<(), Error> {
        let mut records = self.records.lock().await;
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or(StorageError::NotFound)?;
        record.mitigated = true;
        record.mitigation = Some(action);
        Ok(())
    }

    async fn add_to_blacklist(&self, ip_address: &str, _reason: &str) -> Result<(), Error> {
        self.blacklist.lock().await.insert(ip_address.to_string());
        Ok(())
    }

    async fn is_blacklisted(&self, ip_address: &str) -> Result<bool, Error> {
        Ok(self.blacklist.lock().await.contains(ip_address))
    }

    async fn reputation(&self, ip_address: &str) -> Result<IpReputation, Error> {
        let blacklisted = self.is_blacklisted(ip_address).await?;
        let records = self.records.lock().await;
        let active_threats = records
            .iter()
            .filter(|r| r.ip_address == ip_address && !r.mitigated)
            .count() as u32;
        Ok(IpReputation {
            blacklisted,
            active_threats,
        })
    }
}

// ============================================================================
// Tokens
// ============================================================================

#[derive(Default)]
pub struct MockTokenRepository {
    tokens: Mutex<Vec<(String, SecureToken)>>,
}

impl MockTokenRepository {
    /// Tokens as issued, plaintext included.
    pub async fn issued(&self) -> Vec<SecureToken> {
        self.tokens
            .lock()
            .await
            .iter()
            .map(|(_, token)| token.clone())
            .collect()
    }

    pub async fn expire_all(&self) {
        let mut tokens = self.tokens.lock().await;
        for (_, token) in tokens.iter_mut() {
            token.expires_at = Utc::now() - Duration::seconds(1);
        }
    }
}

#[async_trait]
impl TokenRepository for MockTokenRepository {
    async fn create_token(
        &self,
        account_id: &AccountId,
        purpose: TokenPurpose,
        expires_in: Duration,
    ) -> Result<SecureToken, Error> {
        let plaintext = crypto::generate_secure_token();
        let now = Utc::now();
        let token = SecureToken {
            account_id: account_id.clone(),
            token: plaintext.clone(),
            purpose,
            used_at: None,
            expires_at: now + expires_in,
            created_at: now,
        };

        self.tokens
            .lock()
            .await
            .push((crypto::hash_token(&plaintext), token.clone()));
        Ok(token)
    }

    async fn verify_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<SecureToken>, Error> {
        let hash = crypto::hash_token(token);
        let now = Utc::now();
        let mut tokens = self.tokens.lock().await;

        for (stored_hash, stored) in tokens.iter_mut() {
            if *stored_hash == hash
                && stored.purpose == purpose
                && stored.used_at.is_none()
                && !stored.is_expired(now)
            {
                stored.used_at = Some(now);
                return Ok(Some(stored.clone()));
            }
        }
        Ok(None)
    }

    async fn check_token(&self, token: &str, purpose: TokenPurpose) -> Result<bool, Error> {
        let hash = crypto::hash_token(token);
        let now = Utc::now();
        let tokens = self.tokens.lock().await;
        Ok(tokens.iter().any(|(stored_hash, stored)| {
            *stored_hash == hash
                && stored.purpose == purpose
                && stored.used_at.is_none()
                && !stored.is_expired(now)
        }))
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        let now = Utc::now();
        let mut tokens = self.tokens.lock().await;
        let before = tokens.len();
        tokens.retain(|(_, token)| !token.is_expired(now));
        Ok((before - tokens.len()) as u64)
    }
}

// ============================================================================
// Notifier and reputation stubs
// ============================================================================

#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<SecurityNotice>>,
    fail: bool,
}

impl MockNotifier {
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub async fn sent(&self) -> Vec<SecurityNotice> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl SecurityNotifier for MockNotifier {
    async fn send(&self, notice: SecurityNotice) -> Result<(), NotifyError> {
        if self.fail {
            return Err(NotifyError::Delivery("injected failure".to_string()));
        }
        self.sent.lock().await.push(notice);
        Ok(())
    }
}

/// Reputation stub returning a fixed answer for every IP.
pub struct StaticReputation {
    reputation: IpReputation,
}

impl StaticReputation {
    pub fn clean() -> Self {
        Self {
            reputation: IpReputation::default(),
        }
    }

    pub fn blacklisted() -> Self {
        Self {
            reputation: IpReputation {
                blacklisted: true,
                active_threats: 0,
            },
        }
    }
}

#[async_trait]
impl ReputationLookup for StaticReputation {
    async fn lookup(&self, _ip_address: &str) -> Result<IpReputation, Error> {
        Ok(self.reputation.clone())
    }
}

/// Reputation stub whose collaborator is always down.
pub struct FailingReputation;

#[async_trait]
impl ReputationLookup for FailingReputation {
    async fn lookup(&self, _ip_address: &str) -> Result<IpReputation, Error> {
        Err(StorageError::Connection("reputation service unavailable".to_string()).into())
    }
}
