use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use palisade::{AccountSummary, RiskLevel, Session};

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub totp_code: Option<String>,
    pub backup_code: Option<String>,
    #[serde(default)]
    pub remember_me: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetupTwoFactorRequest {
    pub password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VerifyTwoFactorRequest {
    pub code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisableTwoFactorRequest {
    pub password: Option<String>,
    pub backup_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub new_password: Option<String>,
}

/// Session facts safe to return to the client. The opaque token travels
/// separately (cookie and `session_token`), never inside this struct.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub remember_me: bool,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            created_at: session.created_at,
            last_activity_at: session.last_activity_at,
            expires_at: session.expires_at,
            remember_me: session.remember_me,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub account: AccountSummary,
    /// For Bearer-token clients; cookie clients can ignore it.
    pub session_token: String,
    pub session: SessionInfo,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionResponse {
    pub account: AccountSummary,
    pub session: SessionInfo,
}

#[derive(Debug, Clone, Serialize)]
pub struct TwoFactorSetupResponse {
    pub secret: String,
    pub provisioning_uri: String,
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RevokedSessionsResponse {
    pub revoked: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub http_only: bool,
    pub secure: bool,
    pub same_site: CookieSameSite,
    pub path: String,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "palisade_session".to_string(),
            http_only: true,
            secure: true,
            same_site: CookieSameSite::Lax,
            path: "/".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub enum CookieSameSite {
    Strict,
    #[default]
    Lax,
    None,
}

impl CookieConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn development() -> Self {
        Self {
            secure: false,
            ..Default::default()
        }
    }
}
