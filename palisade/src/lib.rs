//! # Palisade
//!
//! Palisade is the authentication and session security core for an admin
//! backend: credential verification, account lockout, two-factor
//! challenges, session lifecycle with a concurrent-session cap, heuristic
//! risk scoring and an append-only security audit trail.
//!
//! [`Palisade`] is the central coordinator: it wires every service over a
//! single [`RepositoryProvider`] and exposes the operations the transport
//! layer calls. Services are explicitly constructed; there is no global
//! state, and tests can build isolated instances over in-memory storage.
//!
//! ## Example
//!
//! ```rust,no_run
//! use palisade::Palisade;
//! use palisade_storage_sqlite::SqliteRepositoryProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
//!     let repositories = Arc::new(SqliteRepositoryProvider::new(pool));
//!
//!     let palisade = Palisade::new(repositories);
//!     palisade.migrate().await.unwrap();
//! }
//! ```

use std::sync::Arc;

use palisade_core::{
    repositories::{
        AccountRepository, AccountRepositoryAdapter, AuditQuery, AuditRepositoryAdapter,
        SessionRepositoryAdapter, ThreatRepositoryAdapter, TokenRepositoryAdapter,
    },
    services::{
        AuditService, AuthService, CredentialValidator, LockoutConfig, LockoutService,
        PasswordPolicy, PasswordResetConfig, PasswordResetService, RetentionConfig, RiskConfig,
        RiskEngine, SessionPolicy, SessionService, ThreatStoreReputation, TracingNotifier,
        TwoFactorConfig, TwoFactorEnrollment, TwoFactorService,
    },
};

/// Re-export core types from palisade_core
///
/// These types are commonly used when working with the Palisade API.
pub use palisade_core::{
    Account, AccountId, AccountSummary, DeviceFingerprint, EndReason, Error, NewAccount,
    PrivilegeLevel, RepositoryProvider, SecurityEvent, SecurityEventType, Session, SessionToken,
    Severity, ThreatLevel, ThreatRecord, ThreatType,
    error::{AuthError, SessionError, StorageError, ValidationError},
    services::{
        ClientInfo, LoginAttempt, LoginOutcome, RiskAssessment, RiskLevel, SecondFactor,
        SecurityNotice, SecurityNotifier,
    },
    validation,
};

/// Re-export storage backends
#[cfg(feature = "sqlite")]
pub use palisade_storage_sqlite::SqliteRepositoryProvider;

type Accounts<R> = AccountRepositoryAdapter<R>;
type Sessions<R> = SessionRepositoryAdapter<R>;
type Audits<R> = AuditRepositoryAdapter<R>;
type Threats<R> = ThreatRepositoryAdapter<R>;
type Tokens<R> = TokenRepositoryAdapter<R>;
type Reputation<R> = ThreatStoreReputation<Threats<R>>;

/// Configuration for every palisade service, with sensible defaults.
#[derive(Debug, Clone, Default)]
pub struct PalisadeConfig {
    pub password_policy: PasswordPolicy,
    pub lockout: LockoutConfig,
    pub sessions: SessionPolicy,
    pub two_factor: TwoFactorConfig,
    pub risk: RiskConfig,
    pub reset: PasswordResetConfig,
    pub retention: RetentionConfig,
}

impl PalisadeConfig {
    pub fn with_password_policy(mut self, policy: PasswordPolicy) -> Self {
        self.password_policy = policy;
        self
    }

    pub fn with_lockout(mut self, lockout: LockoutConfig) -> Self {
        self.lockout = lockout;
        self
    }

    pub fn with_sessions(mut self, sessions: SessionPolicy) -> Self {
        self.sessions = sessions;
        self
    }

    pub fn with_two_factor(mut self, two_factor: TwoFactorConfig) -> Self {
        self.two_factor = two_factor;
        self
    }

    pub fn with_risk(mut self, risk: RiskConfig) -> Self {
        self.risk = risk;
        self
    }

    pub fn with_reset(mut self, reset: PasswordResetConfig) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_retention(mut self, retention: RetentionConfig) -> Self {
        self.retention = retention;
        self
    }
}

/// The central coordinator for authentication and session security.
///
/// Generic over the storage [`RepositoryProvider`] and the notification
/// collaborator; defaults to the tracing-only notifier.
pub struct Palisade<R: RepositoryProvider, N: SecurityNotifier = TracingNotifier> {
    repositories: Arc<R>,
    config: PalisadeConfig,
    accounts: Arc<Accounts<R>>,
    validator: Arc<CredentialValidator>,
    audit: AuditService<Audits<R>>,
    lockout: Arc<LockoutService<Accounts<R>, Threats<R>>>,
    two_factor: Arc<TwoFactorService<Accounts<R>>>,
    sessions: Arc<SessionService<Sessions<R>>>,
    auth: AuthService<Accounts<R>, Sessions<R>, Audits<R>, Threats<R>, Reputation<R>, N>,
    reset: PasswordResetService<Accounts<R>, Sessions<R>, Tokens<R>, N>,
}

impl<R: RepositoryProvider> Palisade<R, TracingNotifier> {
    /// Create a coordinator with default configuration and the built-in
    /// tracing notifier.
    pub fn new(repositories: Arc<R>) -> Self {
        Self::with_notifier(repositories, Arc::new(TracingNotifier), PalisadeConfig::default())
    }

    /// Create a coordinator with custom configuration.
    pub fn with_config(repositories: Arc<R>, config: PalisadeConfig) -> Self {
        Self::with_notifier(repositories, Arc::new(TracingNotifier), config)
    }
}

impl<R: RepositoryProvider, N: SecurityNotifier> Palisade<R, N> {
    /// Create a coordinator with a custom notification collaborator.
    ///
    /// Must be called within a tokio runtime (the audit writer task is
    /// spawned here).
    pub fn with_notifier(repositories: Arc<R>, notifier: Arc<N>, config: PalisadeConfig) -> Self {
        let accounts = Arc::new(Accounts::new(Arc::clone(&repositories)));
        let sessions_repo = Arc::new(Sessions::new(Arc::clone(&repositories)));
        let audits = Arc::new(Audits::new(Arc::clone(&repositories)));
        let threats = Arc::new(Threats::new(Arc::clone(&repositories)));
        let tokens = Arc::new(Tokens::new(Arc::clone(&repositories)));

        let validator = Arc::new(CredentialValidator::new(config.password_policy.clone()));
        let audit = AuditService::new(Arc::clone(&audits));
        let logger = audit.logger();

        let lockout = Arc::new(LockoutService::new(
            Arc::clone(&accounts),
            Arc::clone(&threats),
            logger.clone(),
            config.lockout.clone(),
        ));
        let two_factor = Arc::new(TwoFactorService::new(
            Arc::clone(&accounts),
            logger.clone(),
            config.two_factor.clone(),
        ));
        let sessions = Arc::new(SessionService::new(
            Arc::clone(&sessions_repo),
            logger.clone(),
            config.sessions.clone(),
        ));
        let risk = Arc::new(RiskEngine::new(
            Arc::clone(&sessions_repo),
            Arc::clone(&audits),
            Arc::new(Reputation::<R>::new(Arc::clone(&threats))),
            config.risk.clone(),
        ));

        let auth = AuthService::new(
            Arc::clone(&accounts),
            Arc::clone(&threats),
            Arc::clone(&validator),
            Arc::clone(&lockout),
            Arc::clone(&two_factor),
            Arc::clone(&sessions),
            risk,
            Arc::clone(&notifier),
            logger.clone(),
        );

        let reset = PasswordResetService::new(
            Arc::clone(&accounts),
            Arc::clone(&sessions),
            tokens,
            Arc::clone(&validator),
            notifier,
            logger,
            config.reset.clone(),
        );

        Self {
            repositories,
            config,
            accounts,
            validator,
            audit,
            lockout,
            two_factor,
            sessions,
            auth,
            reset,
        }
    }

    /// Run storage migrations.
    pub async fn migrate(&self) -> Result<(), Error> {
        self.repositories.migrate().await
    }

    /// Check that storage is reachable.
    pub async fn health_check(&self) -> Result<(), Error> {
        self.repositories.health_check().await
    }

    // ------------------------------------------------------------------
    // Accounts
    // ------------------------------------------------------------------

    /// Create an account, enforcing email format and the password policy.
    pub async fn create_account(
        &self,
        email: &str,
        password: &str,
        name: Option<String>,
        level: PrivilegeLevel,
    ) -> Result<Account, Error> {
        validation::validate_email(email)?;
        validation::validate_name(name.as_deref())?;

        let context = palisade_core::services::AccountContext {
            name: name.as_deref(),
            email: Some(email),
            recent_hashes: &[],
        };
        let check = self.validator.validate(password, &context);
        if !check.valid {
            let reasons = check
                .violations
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(ValidationError::PasswordPolicy(reasons).into());
        }

        let hash = CredentialValidator::hash_password(password)?;
        let mut new_account = NewAccount::new(email.to_string(), hash).with_level(level);
        if let Some(name) = name {
            new_account = new_account.with_name(name);
        }

        self.accounts.create(new_account).await
    }

    /// Get an account by ID.
    pub async fn get_account(&self, id: &AccountId) -> Result<Option<Account>, Error> {
        self.accounts.find_by_id(id).await
    }

    /// Get an account by email.
    pub async fn get_account_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        self.accounts.find_by_email(email).await
    }

    // ------------------------------------------------------------------
    // Authentication
    // ------------------------------------------------------------------

    /// Authenticate and issue a session.
    pub async fn login(&self, attempt: LoginAttempt) -> Result<LoginOutcome, Error> {
        self.auth.login(attempt).await
    }

    /// Authenticate with a minimum privilege requirement.
    pub async fn admin_login(
        &self,
        attempt: LoginAttempt,
        min_level: PrivilegeLevel,
    ) -> Result<LoginOutcome, Error> {
        self.auth.admin_login(attempt, min_level).await
    }

    /// End the session behind a presented token.
    pub async fn logout(&self, token: &SessionToken) -> Result<(), Error> {
        self.auth.logout(token).await
    }

    /// Resolve a presented token into its active session.
    pub async fn get_session(&self, token: &SessionToken) -> Result<Session, Error> {
        self.sessions.authenticate(token).await
    }

    /// Renew a session (activity only; expiry never moves).
    pub async fn renew_session(&self, token: &SessionToken) -> Result<Session, Error> {
        self.sessions.renew(token).await
    }

    /// Resolve a token into the session and its owning account.
    pub async fn account_for_session(
        &self,
        token: &SessionToken,
    ) -> Result<(Account, Session), Error> {
        let session = self.sessions.authenticate(token).await?;
        let account = self
            .accounts
            .find_by_id(&session.account_id)
            .await?
            .ok_or(SessionError::NotFound)?;
        Ok((account, session))
    }

    /// Revoke every other session of the token's account. Returns the
    /// number of sessions ended.
    pub async fn revoke_other_sessions(&self, token: &SessionToken) -> Result<u64, Error> {
        let session = self.sessions.authenticate(token).await?;
        self.sessions
            .revoke_all(&session.account_id, Some(token))
            .await
    }

    /// All active sessions for an account, newest first.
    pub async fn active_sessions(&self, account_id: &AccountId) -> Result<Vec<Session>, Error> {
        self.sessions.active_sessions(account_id).await
    }

    /// Change the password of the session's account.
    pub async fn change_password(
        &self,
        token: &SessionToken,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), Error> {
        let (account, _) = self.account_for_session(token).await?;
        self.auth
            .change_password(&account, current_password, new_password, Some(token))
            .await
    }

    /// Admin override unlocking a locked account.
    pub async fn unlock_account(
        &self,
        admin_token: &SessionToken,
        target: &AccountId,
    ) -> Result<(), Error> {
        let (admin, _) = self.account_for_session(admin_token).await?;
        self.auth.unlock_account(&admin, target).await
    }

    // ------------------------------------------------------------------
    // Two-factor
    // ------------------------------------------------------------------

    /// Begin two-factor enrollment for the session's account. Requires a
    /// fresh password confirmation.
    pub async fn setup_two_factor(
        &self,
        token: &SessionToken,
        password: &str,
    ) -> Result<TwoFactorEnrollment, Error> {
        let (account, _) = self.account_for_session(token).await?;
        self.two_factor.start_enrollment(&account, password).await
    }

    /// Confirm enrollment with a first valid code, enabling the factor.
    pub async fn verify_two_factor(&self, token: &SessionToken, code: &str) -> Result<(), Error> {
        let (account, _) = self.account_for_session(token).await?;
        self.two_factor.confirm_enrollment(&account, code).await
    }

    /// Disable two-factor authentication for the session's account.
    pub async fn disable_two_factor(
        &self,
        token: &SessionToken,
        password: &str,
        backup_code: Option<&str>,
    ) -> Result<(), Error> {
        let (account, _) = self.account_for_session(token).await?;
        self.two_factor.disable(&account, password, backup_code).await
    }

    // ------------------------------------------------------------------
    // Password reset
    // ------------------------------------------------------------------

    /// Request a password reset. Always succeeds for well-formed input,
    /// whether or not the account exists.
    pub async fn forgot_password(&self, email: &str) -> Result<(), Error> {
        validation::validate_email(email)?;
        self.reset.request_reset(email).await
    }

    /// Check a reset token without consuming it.
    pub async fn check_reset_token(&self, token: &str) -> Result<bool, Error> {
        self.reset.check_token(token).await
    }

    /// Complete a password reset.
    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<Account, Error> {
        self.reset.reset(token, new_password).await
    }

    // ------------------------------------------------------------------
    // Audit and maintenance
    // ------------------------------------------------------------------

    /// Query the security audit log.
    pub async fn query_events(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.audit.query(query).await
    }

    /// Wait for every audit event enqueued so far to be persisted.
    pub async fn flush_audit(&self) {
        self.audit.logger().flush().await;
    }

    /// Lockout status helper for reporting surfaces.
    pub async fn lockout_status(
        &self,
        account_id: &AccountId,
    ) -> Result<Option<palisade_core::services::LockoutStatus>, Error> {
        let account = self.accounts.find_by_id(account_id).await?;
        Ok(account.map(|a| self.lockout.status(&a, chrono::Utc::now())))
    }

    /// Start the periodic maintenance tasks: session expiry sweep, audit
    /// retention purge and reset-token cleanup. All are idempotent and
    /// safe to run alongside live traffic.
    pub fn start_maintenance_tasks(
        &self,
        shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> Vec<tokio::task::JoinHandle<()>> {
        let session_sweep = self.sessions.start_cleanup_task(shutdown.clone());
        let retention = self
            .audit
            .start_retention_task(self.config.retention.clone(), shutdown.clone());

        let tokens = Arc::new(Tokens::new(Arc::clone(&self.repositories)));
        let mut shutdown = shutdown;
        let token_cleanup = tokio::spawn(async move {
            use palisade_core::repositories::TokenRepository;
            let mut interval_timer =
                tokio::time::interval(std::time::Duration::from_secs(3600));
            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        match tokens.cleanup_expired().await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Removed expired reset tokens");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to clean up reset tokens");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down token cleanup task");
                        break;
                    }
                }
            }
        });

        vec![session_sweep, retention, token_cleanup]
    }
}
