//! Login orchestration.
//!
//! Wires the pipeline: credential check, lockout state machine, two-factor
//! challenge, session issuance, risk scoring, audit. Each stage is its own
//! service; this one only sequences them and owns the enumeration-safe
//! error mapping (an unknown account and a wrong password are
//! indistinguishable to the caller).

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error,
    account::{Account, AccountId, PrivilegeLevel},
    error::AuthError,
    events::{SecurityEvent, SecurityEventType, ThreatLevel, ThreatType},
    repositories::{AccountRepository, AuditRepository, SessionRepository, ThreatRepository},
    services::{
        audit::AuditLogger,
        credential::{AccountContext, CredentialValidator},
        lockout::LockoutService,
        notify::{self, SecurityNotice, SecurityNotifier},
        risk::{LoginEvent, ReputationLookup, RiskAssessment, RiskEngine},
        session::SessionService,
        two_factor::TwoFactorService,
    },
    session::{EndReason, Session, SessionToken},
};

/// Connection attributes captured at the HTTP boundary.
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// The second authentication factor supplied with a login.
#[derive(Debug, Clone)]
pub enum SecondFactor {
    Totp(String),
    BackupCode(String),
}

/// One login attempt as received from the transport layer.
#[derive(Debug, Clone)]
pub struct LoginAttempt {
    pub email: String,
    pub password: String,
    pub second_factor: Option<SecondFactor>,
    pub remember_me: bool,
    pub client: ClientInfo,
}

/// A completed login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub account: Account,
    pub session: Session,
    pub risk: RiskAssessment,
}

/// Service sequencing the authentication pipeline.
pub struct AuthService<A, S, E, T, R, N>
where
    A: AccountRepository,
    S: SessionRepository,
    E: AuditRepository,
    T: ThreatRepository,
    R: ReputationLookup,
    N: SecurityNotifier,
{
    accounts: Arc<A>,
    threats: Arc<T>,
    validator: Arc<CredentialValidator>,
    lockout: Arc<LockoutService<A, T>>,
    two_factor: Arc<TwoFactorService<A>>,
    sessions: Arc<SessionService<S>>,
    risk: Arc<RiskEngine<S, E, R>>,
    notifier: Arc<N>,
    audit: AuditLogger,
}

impl<A, S, E, T, R, N> AuthService<A, S, E, T, R, N>
where
    A: AccountRepository,
    S: SessionRepository,
    E: AuditRepository,
    T: ThreatRepository,
    R: ReputationLookup,
    N: SecurityNotifier,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        accounts: Arc<A>,
        threats: Arc<T>,
        validator: Arc<CredentialValidator>,
        lockout: Arc<LockoutService<A, T>>,
        two_factor: Arc<TwoFactorService<A>>,
        sessions: Arc<SessionService<S>>,
        risk: Arc<RiskEngine<S, E, R>>,
        notifier: Arc<N>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            accounts,
            threats,
            validator,
            lockout,
            two_factor,
            sessions,
            risk,
            notifier,
            audit,
        }
    }

    /// Authenticate and issue a session.
    pub async fn login(&self, attempt: LoginAttempt) -> Result<LoginOutcome, Error> {
        let account = self.authenticate_credentials(&attempt).await?;
        self.finish_login(account, &attempt).await
    }

    /// Authenticate with a minimum privilege requirement.
    ///
    /// The privilege gate runs after full credential verification so a 403
    /// is only ever produced for a caller who proved who they are.
    pub async fn admin_login(
        &self,
        attempt: LoginAttempt,
        min_level: PrivilegeLevel,
    ) -> Result<LoginOutcome, Error> {
        let account = self.authenticate_credentials(&attempt).await?;

        if account.level < min_level {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::PrivilegeDenied)
                    .account(account.id.clone())
                    .ip_address(attempt.client.ip_address.clone())
                    .user_agent(attempt.client.user_agent.clone())
                    .detail(serde_json::json!({
                        "required": min_level.as_str(),
                        "actual": account.level.as_str(),
                    })),
            );
            return Err(AuthError::InsufficientPrivilege.into());
        }

        self.finish_login(account, &attempt).await
    }

    /// End the session behind a presented token.
    pub async fn logout(&self, token: &SessionToken) -> Result<(), Error> {
        self.sessions.revoke(token, EndReason::LoggedOut).await
    }

    /// Change the password of an authenticated account.
    ///
    /// Verifies the current password, applies the policy (including the
    /// reuse check against the current hash and history), rotates the
    /// hash, and revokes every other session.
    pub async fn change_password(
        &self,
        account: &Account,
        current_password: &str,
        new_password: &str,
        keep_session: Option<&SessionToken>,
    ) -> Result<(), Error> {
        if !CredentialValidator::verify_password_strict(current_password, &account.password_hash)? {
            return Err(AuthError::InvalidCredentials.into());
        }

        let mut recent_hashes = vec![account.password_hash.clone()];
        recent_hashes.extend(
            self.accounts
                .password_history(&account.id, self.validator.policy().history_depth)
                .await?,
        );

        let context = AccountContext {
            name: account.name.as_deref(),
            email: Some(&account.email),
            recent_hashes: &recent_hashes,
        };
        let check = self.validator.validate(new_password, &context);
        if !check.valid {
            let reasons = check
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(crate::error::ValidationError::PasswordPolicy(reasons).into());
        }

        let hash = CredentialValidator::hash_password(new_password)?;
        self.accounts
            .set_password_hash(&account.id, &hash, Utc::now())
            .await?;

        self.sessions.revoke_all(&account.id, keep_session).await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::PasswordChanged).account(account.id.clone()),
        );

        Ok(())
    }

    /// Admin override unlocking a locked account.
    pub async fn unlock_account(
        &self,
        admin: &Account,
        target: &AccountId,
    ) -> Result<(), Error> {
        if admin.level < PrivilegeLevel::Admin {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::PrivilegeDenied)
                    .account(admin.id.clone())
                    .detail(serde_json::json!({
                        "required": PrivilegeLevel::Admin.as_str(),
                        "actual": admin.level.as_str(),
                        "operation": "unlock_account",
                    })),
            );
            return Err(AuthError::InsufficientPrivilege.into());
        }

        self.lockout.unlock(target, &admin.id).await
    }

    /// Password and two-factor verification, with lockout bookkeeping.
    async fn authenticate_credentials(&self, attempt: &LoginAttempt) -> Result<Account, Error> {
        let now = Utc::now();

        let Some(account) = self.accounts.find_by_email(&attempt.email).await? else {
            // Unknown account: indistinguishable from a wrong password
            self.audit.log(
                SecurityEvent::new(SecurityEventType::LoginFailure)
                    .ip_address(attempt.client.ip_address.clone())
                    .user_agent(attempt.client.user_agent.clone())
                    .detail(serde_json::json!({ "reason": "unknown_account" })),
            );
            return Err(AuthError::InvalidCredentials.into());
        };

        self.lockout.ensure_unlocked(&account, now)?;

        if !CredentialValidator::verify_password_strict(&attempt.password, &account.password_hash)?
        {
            self.lockout
                .record_failure(
                    &account,
                    attempt.client.ip_address.as_deref(),
                    attempt.client.user_agent.as_deref(),
                )
                .await?;

            self.audit.log(
                SecurityEvent::new(SecurityEventType::LoginFailure)
                    .account(account.id.clone())
                    .ip_address(attempt.client.ip_address.clone())
                    .user_agent(attempt.client.user_agent.clone())
                    .detail(serde_json::json!({ "reason": "wrong_password" })),
            );

            return Err(AuthError::InvalidCredentials.into());
        }

        if account.two_factor_enabled {
            // A second-factor failure is not a password failure: the
            // lockout counter stays untouched.
            match &attempt.second_factor {
                None => return Err(AuthError::TwoFactorRequired.into()),
                Some(SecondFactor::Totp(code)) => {
                    let secret = account
                        .two_factor_secret
                        .as_deref()
                        .ok_or(AuthError::TwoFactorNotEnabled)?;
                    if !self.two_factor.verify_code(secret, code, &account.email)? {
                        self.audit.log(
                            SecurityEvent::new(SecurityEventType::TwoFactorFailure)
                                .account(account.id.clone())
                                .ip_address(attempt.client.ip_address.clone())
                                .detail(serde_json::json!({ "factor": "totp" })),
                        );
                        return Err(AuthError::InvalidTwoFactor.into());
                    }
                }
                Some(SecondFactor::BackupCode(code)) => {
                    if !self.two_factor.consume_backup_code(&account, code).await? {
                        self.audit.log(
                            SecurityEvent::new(SecurityEventType::TwoFactorFailure)
                                .account(account.id.clone())
                                .ip_address(attempt.client.ip_address.clone())
                                .detail(serde_json::json!({ "factor": "backup_code" })),
                        );
                        return Err(AuthError::InvalidTwoFactor.into());
                    }
                }
            }
        }

        // One successful full authentication resets the counter
        self.lockout.record_success(&account.id).await?;

        self.accounts
            .find_by_id(&account.id)
            .await?
            .ok_or_else(|| AuthError::InvalidCredentials.into())
    }

    /// Session issuance, risk scoring and audit for a verified account.
    async fn finish_login(
        &self,
        account: Account,
        attempt: &LoginAttempt,
    ) -> Result<LoginOutcome, Error> {
        let session = self
            .sessions
            .create_session(
                &account.id,
                attempt.client.ip_address.clone(),
                attempt.client.user_agent.clone(),
                attempt.remember_me,
            )
            .await?;

        let risk = self
            .risk
            .score(&LoginEvent {
                account_id: account.id.clone(),
                fingerprint: session.fingerprint.clone(),
                ip_address: attempt.client.ip_address.clone(),
                user_agent: attempt.client.user_agent.clone(),
            })
            .await;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::LoginSuccess)
                .account(account.id.clone())
                .ip_address(attempt.client.ip_address.clone())
                .user_agent(attempt.client.user_agent.clone())
                .risk_score(risk.score)
                .detail(serde_json::json!({
                    "remember_me": attempt.remember_me,
                    "indicators": risk
                        .indicators
                        .iter()
                        .map(|i| i.as_str())
                        .collect::<Vec<_>>(),
                })),
        );

        if risk.is_high() {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::SuspiciousActivity)
                    .account(account.id.clone())
                    .ip_address(attempt.client.ip_address.clone())
                    .risk_score(risk.score),
            );

            if let Some(ip) = attempt.client.ip_address.as_deref() {
                if let Err(e) = self
                    .threats
                    .upsert(ip, ThreatType::SuspiciousLogin, ThreatLevel::High)
                    .await
                {
                    tracing::warn!(error = %e, ip = %ip, "Failed to record suspicious login threat");
                }
            }

            notify::dispatch(
                Arc::clone(&self.notifier),
                SecurityNotice::SuspiciousLogin {
                    email: account.email.clone(),
                    ip_address: attempt.client.ip_address.clone(),
                    risk_score: risk.score,
                },
            );
        }

        Ok(LoginOutcome {
            account,
            session,
            risk,
        })
    }
}
