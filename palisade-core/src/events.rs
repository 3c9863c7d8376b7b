//! Security event and threat record types
//!
//! Every security-relevant action in the system produces a
//! [`SecurityEvent`], an append-only audit row. Events are never mutated or
//! deleted on the request path; only the retention job purges rows past the
//! configured horizon.
//!
//! Repeated malicious patterns from one source IP aggregate into a
//! [`ThreatRecord`], which is updated in place (frequency, last seen) and
//! closed by an explicit mitigation, never deleted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{account::AccountId, error::ValidationError, id::generate_prefixed_id};

/// The closed set of auditable security events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    LoginSuccess,
    LoginFailure,
    AccountLocked,
    AccountUnlocked,
    TwoFactorEnabled,
    TwoFactorDisabled,
    TwoFactorFailure,
    BackupCodeUsed,
    SessionCreated,
    SessionRevoked,
    SessionEvicted,
    SessionExpired,
    PasswordChanged,
    PasswordResetRequested,
    PasswordResetCompleted,
    SuspiciousActivity,
    PrivilegeDenied,
    RateLimited,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::LoginSuccess => "login_success",
            SecurityEventType::LoginFailure => "login_failure",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::AccountUnlocked => "account_unlocked",
            SecurityEventType::TwoFactorEnabled => "two_factor_enabled",
            SecurityEventType::TwoFactorDisabled => "two_factor_disabled",
            SecurityEventType::TwoFactorFailure => "two_factor_failure",
            SecurityEventType::BackupCodeUsed => "backup_code_used",
            SecurityEventType::SessionCreated => "session_created",
            SecurityEventType::SessionRevoked => "session_revoked",
            SecurityEventType::SessionEvicted => "session_evicted",
            SecurityEventType::SessionExpired => "session_expired",
            SecurityEventType::PasswordChanged => "password_changed",
            SecurityEventType::PasswordResetRequested => "password_reset_requested",
            SecurityEventType::PasswordResetCompleted => "password_reset_completed",
            SecurityEventType::SuspiciousActivity => "suspicious_activity",
            SecurityEventType::PrivilegeDenied => "privilege_denied",
            SecurityEventType::RateLimited => "rate_limited",
        }
    }
}

impl std::str::FromStr for SecurityEventType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "login_success" => Ok(SecurityEventType::LoginSuccess),
            "login_failure" => Ok(SecurityEventType::LoginFailure),
            "account_locked" => Ok(SecurityEventType::AccountLocked),
            "account_unlocked" => Ok(SecurityEventType::AccountUnlocked),
            "two_factor_enabled" => Ok(SecurityEventType::TwoFactorEnabled),
            "two_factor_disabled" => Ok(SecurityEventType::TwoFactorDisabled),
            "two_factor_failure" => Ok(SecurityEventType::TwoFactorFailure),
            "backup_code_used" => Ok(SecurityEventType::BackupCodeUsed),
            "session_created" => Ok(SecurityEventType::SessionCreated),
            "session_revoked" => Ok(SecurityEventType::SessionRevoked),
            "session_evicted" => Ok(SecurityEventType::SessionEvicted),
            "session_expired" => Ok(SecurityEventType::SessionExpired),
            "password_changed" => Ok(SecurityEventType::PasswordChanged),
            "password_reset_requested" => Ok(SecurityEventType::PasswordResetRequested),
            "password_reset_completed" => Ok(SecurityEventType::PasswordResetCompleted),
            "suspicious_activity" => Ok(SecurityEventType::SuspiciousActivity),
            "privilege_denied" => Ok(SecurityEventType::PrivilegeDenied),
            "rate_limited" => Ok(SecurityEventType::RateLimited),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown security event type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for SecurityEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Event severity for reporting and alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown severity: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One append-only audit row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub id: String,
    pub event_type: SecurityEventType,
    pub severity: Severity,

    /// Subject account. `None` for anonymous/unauthenticated events.
    pub account_id: Option<AccountId>,

    pub ip_address: Option<String>,
    pub user_agent: Option<String>,

    /// Structured detail payload.
    pub detail: serde_json::Value,

    /// Risk score attached by the risk engine, when one was computed.
    pub risk_score: Option<u8>,

    pub created_at: DateTime<Utc>,
}

impl SecurityEvent {
    /// Start building an event of the given type at its default severity.
    pub fn new(event_type: SecurityEventType) -> Self {
        let severity = match event_type {
            SecurityEventType::AccountLocked
            | SecurityEventType::SuspiciousActivity
            | SecurityEventType::RateLimited => Severity::Critical,
            SecurityEventType::LoginFailure
            | SecurityEventType::TwoFactorFailure
            | SecurityEventType::SessionEvicted
            | SecurityEventType::PrivilegeDenied => Severity::Warning,
            _ => Severity::Info,
        };

        Self {
            id: generate_prefixed_id("evt"),
            event_type,
            severity,
            account_id: None,
            ip_address: None,
            user_agent: None,
            detail: serde_json::Value::Null,
            risk_score: None,
            created_at: Utc::now(),
        }
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn account(mut self, account_id: AccountId) -> Self {
        self.account_id = Some(account_id);
        self
    }

    pub fn ip_address(mut self, ip_address: Option<String>) -> Self {
        self.ip_address = ip_address;
        self
    }

    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.user_agent = user_agent;
        self
    }

    pub fn detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn risk_score(mut self, risk_score: u8) -> Self {
        self.risk_score = Some(risk_score);
        self
    }
}

/// Classification of a repeated malicious pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatType {
    BruteForce,
    CredentialStuffing,
    SuspiciousLogin,
}

impl ThreatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatType::BruteForce => "brute_force",
            ThreatType::CredentialStuffing => "credential_stuffing",
            ThreatType::SuspiciousLogin => "suspicious_login",
        }
    }
}

impl std::str::FromStr for ThreatType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brute_force" => Ok(ThreatType::BruteForce),
            "credential_stuffing" => Ok(ThreatType::CredentialStuffing),
            "suspicious_login" => Ok(ThreatType::SuspiciousLogin),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown threat type: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Low => "low",
            ThreatLevel::Medium => "medium",
            ThreatLevel::High => "high",
            ThreatLevel::Critical => "critical",
        }
    }
}

impl std::str::FromStr for ThreatLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(ThreatLevel::Low),
            "medium" => Ok(ThreatLevel::Medium),
            "high" => Ok(ThreatLevel::High),
            "critical" => Ok(ThreatLevel::Critical),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown threat level: {other}"
            ))),
        }
    }
}

/// The action taken to close a threat record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MitigationAction {
    IpBlocked,
    AccountDisabled,
}

impl MitigationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            MitigationAction::IpBlocked => "ip_blocked",
            MitigationAction::AccountDisabled => "account_disabled",
        }
    }
}

impl std::str::FromStr for MitigationAction {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ip_blocked" => Ok(MitigationAction::IpBlocked),
            "account_disabled" => Ok(MitigationAction::AccountDisabled),
            other => Err(ValidationError::InvalidField(format!(
                "Unknown mitigation action: {other}"
            ))),
        }
    }
}

/// Aggregate of repeated malicious activity from one source IP.
///
/// Created on first detection, updated on repeats, closed by an explicit
/// mitigation recorded on the record itself. Never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatRecord {
    pub id: String,
    pub ip_address: String,
    pub threat_type: ThreatType,
    pub level: ThreatLevel,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub frequency: u32,
    pub mitigated: bool,
    pub mitigation: Option<MitigationAction>,
}

impl ThreatRecord {
    pub fn new(ip_address: String, threat_type: ThreatType, level: ThreatLevel) -> Self {
        let now = Utc::now();
        Self {
            id: generate_prefixed_id("thr"),
            ip_address,
            threat_type,
            level,
            first_seen: now,
            last_seen: now,
            frequency: 1,
            mitigated: false,
            mitigation: None,
        }
    }
}
