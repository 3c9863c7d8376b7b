//! Security notification seam.
//!
//! Email/notification delivery belongs to an external collaborator; the
//! auth core only knows this trait. Every send is fire-and-forget: a
//! delivery failure is logged and never surfaces as an authentication
//! failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Delivery failed: {0}")]
    Delivery(String),
}

/// A security-relevant notice for the account holder.
#[derive(Debug, Clone)]
pub enum SecurityNotice {
    /// A login scored high risk.
    SuspiciousLogin {
        email: String,
        ip_address: Option<String>,
        risk_score: u8,
    },
    /// The account was locked after repeated failures.
    AccountLocked {
        email: String,
        locked_until: DateTime<Utc>,
    },
    /// A password reset was requested; `token` goes into the reset link.
    PasswordReset {
        email: String,
        token: String,
        expires_at: DateTime<Utc>,
    },
}

impl SecurityNotice {
    pub fn kind(&self) -> &'static str {
        match self {
            SecurityNotice::SuspiciousLogin { .. } => "suspicious_login",
            SecurityNotice::AccountLocked { .. } => "account_locked",
            SecurityNotice::PasswordReset { .. } => "password_reset",
        }
    }
}

/// The external notification collaborator.
#[async_trait]
pub trait SecurityNotifier: Send + Sync + 'static {
    async fn send(&self, notice: SecurityNotice) -> Result<(), NotifyError>;
}

/// Built-in notifier that only records the notice in the log stream.
/// Useful as a default and in development.
pub struct TracingNotifier;

#[async_trait]
impl SecurityNotifier for TracingNotifier {
    async fn send(&self, notice: SecurityNotice) -> Result<(), NotifyError> {
        tracing::info!(kind = notice.kind(), "Security notice (not delivered)");
        Ok(())
    }
}

/// Dispatch a notice without awaiting delivery.
///
/// The send runs on its own task; failures are logged, never returned.
pub fn dispatch<N: SecurityNotifier>(notifier: Arc<N>, notice: SecurityNotice) {
    tokio::spawn(async move {
        let kind = notice.kind();
        if let Err(e) = notifier.send(notice).await {
            tracing::warn!(error = %e, kind = kind, "Security notice delivery failed");
        }
    });
}
