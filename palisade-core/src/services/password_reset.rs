//! Password reset flow.
//!
//! Requesting a reset never reveals whether the email exists: the request
//! path returns success either way, and the token only travels through the
//! notifier. Completing a reset consumes the token, applies the password
//! policy, clears lockout state and revokes every session.

use std::sync::Arc;

use chrono::Utc;

use crate::{
    Error,
    account::Account,
    error::ValidationError,
    events::{SecurityEvent, SecurityEventType},
    repositories::{AccountRepository, SessionRepository, TokenPurpose, TokenRepository},
    services::{
        audit::AuditLogger,
        credential::{AccountContext, CredentialValidator},
        notify::{self, SecurityNotice, SecurityNotifier},
        session::SessionService,
    },
};

/// Configuration for the reset flow.
#[derive(Debug, Clone)]
pub struct PasswordResetConfig {
    /// How long a reset token stays valid.
    pub token_ttl: chrono::Duration,
}

impl Default for PasswordResetConfig {
    fn default() -> Self {
        Self {
            token_ttl: chrono::Duration::hours(1),
        }
    }
}

/// Service for password reset operations.
pub struct PasswordResetService<A, S, K, N>
where
    A: AccountRepository,
    S: SessionRepository,
    K: TokenRepository,
    N: SecurityNotifier,
{
    accounts: Arc<A>,
    sessions: Arc<SessionService<S>>,
    tokens: Arc<K>,
    validator: Arc<CredentialValidator>,
    notifier: Arc<N>,
    audit: AuditLogger,
    config: PasswordResetConfig,
}

impl<A, S, K, N> PasswordResetService<A, S, K, N>
where
    A: AccountRepository,
    S: SessionRepository,
    K: TokenRepository,
    N: SecurityNotifier,
{
    pub fn new(
        accounts: Arc<A>,
        sessions: Arc<SessionService<S>>,
        tokens: Arc<K>,
        validator: Arc<CredentialValidator>,
        notifier: Arc<N>,
        audit: AuditLogger,
        config: PasswordResetConfig,
    ) -> Self {
        Self {
            accounts,
            sessions,
            tokens,
            validator,
            notifier,
            audit,
            config,
        }
    }

    /// Request a password reset for an email address.
    ///
    /// Always returns `Ok` for well-formed requests, whether or not the
    /// account exists, to avoid account enumeration. When it does exist, a
    /// single-use token is minted and handed to the notifier
    /// fire-and-forget.
    pub async fn request_reset(&self, email: &str) -> Result<(), Error> {
        let Some(account) = self.accounts.find_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };

        let token = self
            .tokens
            .create_token(&account.id, TokenPurpose::PasswordReset, self.config.token_ttl)
            .await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::PasswordResetRequested)
                .account(account.id.clone()),
        );

        notify::dispatch(
            Arc::clone(&self.notifier),
            SecurityNotice::PasswordReset {
                email: account.email.clone(),
                token: token.token,
                expires_at: token.expires_at,
            },
        );

        Ok(())
    }

    /// Check a reset token without consuming it.
    pub async fn check_token(&self, token: &str) -> Result<bool, Error> {
        self.tokens
            .check_token(token, TokenPurpose::PasswordReset)
            .await
    }

    /// Complete a password reset.
    ///
    /// Verifies and consumes the token (expired or already-used tokens are
    /// rejected even when the token string matches), applies the password
    /// policy, sets the new password, clears lockout state and revokes all
    /// sessions.
    pub async fn reset(&self, token: &str, new_password: &str) -> Result<Account, Error> {
        let secure_token = self
            .tokens
            .verify_token(token, TokenPurpose::PasswordReset)
            .await?
            .ok_or(ValidationError::InvalidToken)?;

        let account = self
            .accounts
            .find_by_id(&secure_token.account_id)
            .await?
            .ok_or(ValidationError::InvalidToken)?;

        self.apply_new_password(&account, new_password).await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::PasswordResetCompleted)
                .account(account.id.clone()),
        );

        self.accounts
            .find_by_id(&account.id)
            .await?
            .ok_or_else(|| ValidationError::InvalidToken.into())
    }

    async fn apply_new_password(&self, account: &Account, new_password: &str) -> Result<(), Error> {
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
            return Err(ValidationError::PasswordPolicy(reasons).into());
        }

        let hash = CredentialValidator::hash_password(new_password)?;
        self.accounts
            .set_password_hash(&account.id, &hash, Utc::now())
            .await?;

        // A reset is a full proof of account control: lockout state clears
        // and every session is revoked.
        self.accounts.clear_lockout(&account.id).await?;
        self.sessions.revoke_all(&account.id, None).await?;

        Ok(())
    }

    /// Remove expired reset tokens.
    pub async fn cleanup_expired_tokens(&self) -> Result<u64, Error> {
        self.tokens.cleanup_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::audit::AuditLogger;
    use crate::services::session::SessionPolicy;
    use crate::services::testing::{
        MockAccountRepository, MockNotifier, MockSessionRepository, MockTokenRepository,
    };

    const OLD_PASSWORD: &str = "Old!Harbor9Sunrise";
    const NEW_PASSWORD: &str = "New!Valley7Moonset";

    struct Fixture {
        accounts: Arc<MockAccountRepository>,
        sessions: Arc<MockSessionRepository>,
        tokens: Arc<MockTokenRepository>,
        notifier: Arc<MockNotifier>,
        service: PasswordResetService<
            MockAccountRepository,
            MockSessionRepository,
            MockTokenRepository,
            MockNotifier,
        >,
    }

    fn fixture() -> Fixture {
        let accounts = Arc::new(MockAccountRepository::default());
        let sessions = Arc::new(MockSessionRepository::default());
        let tokens = Arc::new(MockTokenRepository::default());
        let notifier = Arc::new(MockNotifier::default());

        let session_service = Arc::new(SessionService::new(
            sessions.clone(),
            AuditLogger::disconnected(),
            SessionPolicy::default(),
        ));

        let service = PasswordResetService::new(
            accounts.clone(),
            session_service,
            tokens.clone(),
            Arc::new(CredentialValidator::default()),
            notifier.clone(),
            AuditLogger::disconnected(),
            PasswordResetConfig::default(),
        );

        Fixture {
            accounts,
            sessions,
            tokens,
            notifier,
            service,
        }
    }

    async fn seeded_account(fixture: &Fixture) -> Account {
        let hash = CredentialValidator::hash_password(OLD_PASSWORD).unwrap();
        fixture.accounts.seed("reset@example.com", &hash).await
    }

    #[tokio::test]
    async fn test_request_is_silent_for_unknown_email() {
        let fixture = fixture();

        let result = fixture.service.request_reset("ghost@example.com").await;
        assert!(result.is_ok());
        assert!(fixture.tokens.issued().await.is_empty());
    }

    #[tokio::test]
    async fn test_request_mints_token_for_known_email() {
        let fixture = fixture();
        let account = seeded_account(&fixture).await;

        fixture.service.request_reset(&account.email).await.unwrap();

        let issued = fixture.tokens.issued().await;
        assert_eq!(issued.len(), 1);
        assert_eq!(issued[0].account_id, account.id);

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(fixture.notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_reset_consumes_token_and_sets_password() {
        let fixture = fixture();
        let account = seeded_account(&fixture).await;

        fixture.service.request_reset(&account.email).await.unwrap();
        let token = fixture.tokens.issued().await[0].token.clone();

        let reset = fixture.service.reset(&token, NEW_PASSWORD).await.unwrap();
        assert!(CredentialValidator::verify_password(
            NEW_PASSWORD,
            &reset.password_hash
        ));

        // Token is single-use
        let replay = fixture.service.reset(&token, "Another!Pass7Word").await;
        assert!(matches!(
            replay,
            Err(Error::Validation(ValidationError::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_expired_token_rejected_even_if_string_matches() {
        let fixture = fixture();
        let account = seeded_account(&fixture).await;

        fixture.service.request_reset(&account.email).await.unwrap();
        let token = fixture.tokens.issued().await[0].token.clone();
        fixture.tokens.expire_all().await;

        let result = fixture.service.reset(&token, NEW_PASSWORD).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::InvalidToken))
        ));
    }

    #[tokio::test]
    async fn test_reset_enforces_password_policy() {
        let fixture = fixture();
        let account = seeded_account(&fixture).await;

        fixture.service.request_reset(&account.email).await.unwrap();
        let token = fixture.tokens.issued().await[0].token.clone();

        let weak = fixture.service.reset(&token, "weak").await;
        assert!(matches!(
            weak,
            Err(Error::Validation(ValidationError::PasswordPolicy(_)))
        ));

        // Reusing the current password is also a policy violation
        fixture.service.request_reset(&account.email).await.unwrap();
        let token = fixture.tokens.issued().await[1].token.clone();
        let reused = fixture.service.reset(&token, OLD_PASSWORD).await;
        assert!(matches!(
            reused,
            Err(Error::Validation(ValidationError::PasswordPolicy(_)))
        ));
    }

    #[tokio::test]
    async fn test_reset_clears_lockout_and_sessions() {
        let fixture = fixture();
        let account = seeded_account(&fixture).await;

        // Lock the account and give it a session
        fixture
            .accounts
            .set_locked_until(&account.id, Some(Utc::now() + chrono::Duration::minutes(30)))
            .await;
        let session = crate::session::Session::builder()
            .account_id(account.id.clone())
            .fingerprint(crate::session::DeviceFingerprint::new("fp"))
            .expires_at(Utc::now() + chrono::Duration::hours(1))
            .build()
            .unwrap();
        fixture
            .sessions
            .create(session.clone(), None, Utc::now())
            .await
            .unwrap();

        fixture.service.request_reset(&account.email).await.unwrap();
        let token = fixture.tokens.issued().await[0].token.clone();
        fixture.service.reset(&token, NEW_PASSWORD).await.unwrap();

        let after = fixture
            .accounts
            .find_by_id(&account.id)
            .await
            .unwrap()
            .unwrap();
        assert!(after.locked_until.is_none());
        assert_eq!(after.failed_attempts, 0);

        let row = fixture
            .sessions
            .find_by_token_hash(&session.token_hash)
            .await
            .unwrap()
            .unwrap();
        assert!(row.ended_at.is_some());
    }
}
