use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// Wrong password or unknown account. Deliberately a single variant:
    /// callers must not be able to tell the two apart.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// The account is locked. Unlike credential failures, lockout is
    /// explicit and carries the unlock time: the account's existence is
    /// already implied by the lockout having happened.
    #[error("Account locked until {locked_until}")]
    AccountLocked { locked_until: DateTime<Utc> },

    #[error("Two-factor code required")]
    TwoFactorRequired,

    #[error("Invalid two-factor code")]
    InvalidTwoFactor,

    #[error("Two-factor authentication is not enabled")]
    TwoFactorNotEnabled,

    #[error("Insufficient privilege")]
    InsufficientPrivilege,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Password hash error: {0}")]
    PasswordHash(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,

    #[error("Session expired")]
    Expired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid email format: {0}")]
    InvalidEmail(String),

    #[error("Password policy violation: {0}")]
    PasswordPolicy(String),

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid or expired token")]
    InvalidToken,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Record not found")]
    NotFound,

    #[error("Constraint violation: {0}")]
    Constraint(String),
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Audit writer unavailable: {0}")]
    WriterUnavailable(String),

    #[error("Audit query failed: {0}")]
    Query(String),
}

impl Error {
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    pub fn is_validation_error(&self) -> bool {
        matches!(self, Error::Validation(_))
    }

    pub fn is_storage_error(&self) -> bool {
        matches!(self, Error::Storage(_))
    }

    pub fn is_session_error(&self) -> bool {
        matches!(self, Error::Session(_))
    }

    /// Unlock time for a lockout rejection, if this is one.
    pub fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self {
            Error::Auth(AuthError::AccountLocked { locked_until }) => Some(*locked_until),
            _ => None,
        }
    }
}
