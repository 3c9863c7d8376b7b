//! Service layer for the authentication core
//!
//! Concrete service implementations for each subsystem: credential
//! validation, lockout, two-factor, sessions, risk scoring, audit, login
//! orchestration and password reset. Services are explicitly constructed
//! with their repositories and configuration; there is no process-global
//! state.

pub mod audit;
pub mod auth;
pub mod credential;
pub mod lockout;
pub mod notify;
pub mod password_reset;
pub mod risk;
pub mod session;
pub mod two_factor;

#[cfg(test)]
pub(crate) mod testing;

pub use audit::{AuditLogger, AuditService, RetentionConfig};
pub use auth::{AuthService, ClientInfo, LoginAttempt, LoginOutcome, SecondFactor};
pub use credential::{
    AccountContext, CredentialValidator, PasswordCheck, PasswordPolicy, PolicyViolation,
};
pub use lockout::{LockoutConfig, LockoutService, LockoutStatus};
pub use notify::{NotifyError, SecurityNotice, SecurityNotifier, TracingNotifier};
pub use password_reset::{PasswordResetConfig, PasswordResetService};
pub use risk::{
    LoginEvent, ReputationLookup, RiskAssessment, RiskConfig, RiskEngine, RiskIndicator,
    RiskLevel, ThreatStoreReputation,
};
pub use session::{SessionPolicy, SessionService};
pub use two_factor::{TwoFactorConfig, TwoFactorEnrollment, TwoFactorService};
