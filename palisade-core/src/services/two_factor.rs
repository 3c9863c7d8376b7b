//! Two-factor challenge service.
//!
//! TOTP enrollment and verification plus single-use backup codes.
//!
//! State coupling rules:
//! - enrolling requires a fresh password confirmation, so a hijacked
//!   session cannot silently add a second factor it controls;
//! - disabling requires the password (a backup code may serve as the
//!   second factor) and clears the secret and every remaining backup code
//!   together, leaving no partial disable state;
//! - a backup code is removed by the same atomic operation that accepts
//!   it, so it can never be replayed.

use std::sync::Arc;

use rand::{TryRngCore, rngs::OsRng};
use totp_rs::{Algorithm, Secret, TOTP};

use crate::{
    Error,
    account::Account,
    crypto,
    error::{AuthError, ValidationError},
    events::{SecurityEvent, SecurityEventType},
    repositories::AccountRepository,
    services::{audit::AuditLogger, credential::CredentialValidator},
};

/// Characters used in backup codes. Lowercase alphanumerics without the
/// easily-confused `0/o` and `1/l`.
const BACKUP_CODE_ALPHABET: &[u8] = b"abcdefghijkmnpqrstuvwxyz23456789";

/// Configuration for the two-factor challenge.
#[derive(Debug, Clone)]
pub struct TwoFactorConfig {
    /// Issuer shown in authenticator apps.
    pub issuer: String,
    /// Number of backup codes handed out at enrollment.
    pub backup_code_count: usize,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            issuer: "palisade".to_string(),
            backup_code_count: 8,
        }
    }
}

impl TwoFactorConfig {
    pub fn with_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = issuer.into();
        self
    }

    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }
}

/// Everything the client needs to finish enrollment. Plaintext backup
/// codes appear here exactly once; only their hashes are stored.
#[derive(Debug, Clone)]
pub struct TwoFactorEnrollment {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

/// Service for TOTP and backup-code operations.
pub struct TwoFactorService<A: AccountRepository> {
    accounts: Arc<A>,
    audit: AuditLogger,
    config: TwoFactorConfig,
}

impl<A: AccountRepository> TwoFactorService<A> {
    pub fn new(accounts: Arc<A>, audit: AuditLogger, config: TwoFactorConfig) -> Self {
        Self {
            accounts,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &TwoFactorConfig {
        &self.config
    }

    /// Begin enrollment: generate a secret and backup codes, store both
    /// (secret pending, codes hashed), return the client-facing material.
    ///
    /// Requires a fresh password confirmation.
    pub async fn start_enrollment(
        &self,
        account: &Account,
        password: &str,
    ) -> Result<TwoFactorEnrollment, Error> {
        if !CredentialValidator::verify_password(password, &account.password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }

        if account.two_factor_enabled {
            return Err(ValidationError::InvalidField(
                "Two-factor authentication is already enabled".to_string(),
            )
            .into());
        }

        let secret_bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|e| ValidationError::InvalidField(format!("Secret generation error: {e}")))?;

        let totp = self.build_totp(secret_bytes, &account.email)?;
        let secret = totp.get_secret_base32();
        let provisioning_uri = totp.get_url();

        let backup_codes = generate_backup_codes(self.config.backup_code_count);
        let hashes: Vec<String> = backup_codes
            .iter()
            .map(|code| crypto::hash_token(&normalize_backup_code(code)))
            .collect();

        self.accounts
            .set_two_factor_secret(&account.id, Some(&secret))
            .await?;
        self.accounts
            .replace_backup_codes(&account.id, &hashes)
            .await?;

        Ok(TwoFactorEnrollment {
            secret,
            provisioning_uri,
            backup_codes,
        })
    }

    /// Confirm enrollment with a first valid code, enabling the factor.
    pub async fn confirm_enrollment(&self, account: &Account, code: &str) -> Result<(), Error> {
        let secret = account
            .two_factor_secret
            .as_deref()
            .ok_or(AuthError::TwoFactorNotEnabled)?;

        if !self.verify_code(secret, code, &account.email)? {
            self.audit.log(
                SecurityEvent::new(SecurityEventType::TwoFactorFailure)
                    .account(account.id.clone())
                    .detail(serde_json::json!({ "phase": "enrollment" })),
            );
            return Err(AuthError::InvalidTwoFactor.into());
        }

        self.accounts
            .set_two_factor_enabled(&account.id, true)
            .await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::TwoFactorEnabled).account(account.id.clone()),
        );

        Ok(())
    }

    /// Verify a TOTP code against a stored secret with a ±1 time-step
    /// window to tolerate clock drift.
    pub fn verify_code(&self, secret: &str, code: &str, label: &str) -> Result<bool, Error> {
        let secret_bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| ValidationError::InvalidField(format!("Invalid TOTP secret: {e}")))?;

        let totp = self.build_totp(secret_bytes, label)?;
        Ok(totp.check_current(code).unwrap_or(false))
    }

    /// Consume a backup code.
    ///
    /// The repository delete is the authentication decision: `true` means
    /// this call removed the code and no replay can ever match it again.
    pub async fn consume_backup_code(&self, account: &Account, code: &str) -> Result<bool, Error> {
        let hash = crypto::hash_token(&normalize_backup_code(code));
        let consumed = self.accounts.consume_backup_code(&account.id, &hash).await?;

        if consumed {
            let remaining = self.accounts.backup_code_count(&account.id).await?;
            self.audit.log(
                SecurityEvent::new(SecurityEventType::BackupCodeUsed)
                    .account(account.id.clone())
                    .detail(serde_json::json!({ "remaining": remaining })),
            );
        }

        Ok(consumed)
    }

    /// Disable two-factor authentication.
    ///
    /// The password is required; when a backup code is supplied it must
    /// also be valid (and is consumed). The secret and all remaining
    /// backup codes are cleared together.
    pub async fn disable(
        &self,
        account: &Account,
        password: &str,
        backup_code: Option<&str>,
    ) -> Result<(), Error> {
        if !CredentialValidator::verify_password(password, &account.password_hash) {
            return Err(AuthError::InvalidCredentials.into());
        }

        if !account.two_factor_enabled {
            return Err(AuthError::TwoFactorNotEnabled.into());
        }

        if let Some(code) = backup_code {
            if !self.consume_backup_code(account, code).await? {
                return Err(AuthError::InvalidTwoFactor.into());
            }
        }

        self.accounts.disable_two_factor(&account.id).await?;

        self.audit.log(
            SecurityEvent::new(SecurityEventType::TwoFactorDisabled).account(account.id.clone()),
        );

        Ok(())
    }

    /// Number of unused backup codes remaining for an account.
    pub async fn backup_codes_remaining(&self, account: &Account) -> Result<u32, Error> {
        self.accounts.backup_code_count(&account.id).await
    }

    fn build_totp(&self, secret_bytes: Vec<u8>, label: &str) -> Result<TOTP, Error> {
        TOTP::new(
            Algorithm::SHA1,
            6,
            1, // skew: accept the previous and next time step
            30,
            secret_bytes,
            Some(self.config.issuer.clone()),
            label.to_string(),
        )
        .map_err(|e| ValidationError::InvalidField(format!("TOTP init error: {e}")).into())
    }
}

/// Generate `count` independent single-use backup codes in
/// `xxxxx-xxxxx` form.
pub fn generate_backup_codes(count: usize) -> Vec<String> {
    (0..count)
        .map(|_| {
            let mut bytes = [0u8; 10];
            OsRng
                .try_fill_bytes(&mut bytes)
                .expect("OS RNG failure - system entropy source unavailable");

            let chars: String = bytes
                .iter()
                .map(|b| BACKUP_CODE_ALPHABET[(*b as usize) % BACKUP_CODE_ALPHABET.len()] as char)
                .collect();

            format!("{}-{}", &chars[..5], &chars[5..])
        })
        .collect()
}

/// Canonical form used for hashing and matching: lowercase, separators
/// stripped.
fn normalize_backup_code(code: &str) -> String {
    code.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_lowercase()
}
