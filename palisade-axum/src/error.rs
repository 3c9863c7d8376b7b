use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use thiserror::Error;

use palisade::{AuthError, SessionError, ValidationError};

#[derive(Debug, Error)]
pub enum ApiError {
    /// Credential and second-factor failures are deliberately collapsed
    /// into one message so the API cannot be used as an account oracle.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Two-factor code required")]
    TwoFactorRequired,

    /// Lockout, by contrast, is explicit: the transition already implies
    /// the account exists, so the unlock time is returned.
    #[error("Account locked")]
    AccountLocked { locked_until: DateTime<Utc> },

    #[error("Insufficient privilege")]
    Forbidden,

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Internal server error")]
    InternalError(String),
}

impl From<palisade::Error> for ApiError {
    fn from(err: palisade::Error) -> Self {
        match err {
            palisade::Error::Auth(auth) => match auth {
                AuthError::InvalidCredentials
                | AuthError::InvalidTwoFactor
                | AuthError::TwoFactorNotEnabled => ApiError::InvalidCredentials,
                // A malformed stored hash is a data bug, not a client error
                AuthError::PasswordHash(e) => {
                    tracing::error!(error = %e, "Password hash failure on request path");
                    ApiError::InternalError("password_hash".to_string())
                }
                AuthError::TwoFactorRequired => ApiError::TwoFactorRequired,
                AuthError::AccountLocked { locked_until } => {
                    ApiError::AccountLocked { locked_until }
                }
                AuthError::InsufficientPrivilege => ApiError::Forbidden,
                AuthError::RateLimitExceeded => ApiError::RateLimited,
            },
            palisade::Error::Session(session) => match session {
                SessionError::NotFound | SessionError::Expired | SessionError::InvalidToken(_) => {
                    ApiError::Unauthorized
                }
            },
            palisade::Error::Validation(validation) => match validation {
                ValidationError::InvalidToken => {
                    ApiError::BadRequest("Invalid or expired token".to_string())
                }
                other => ApiError::BadRequest(other.to_string()),
            },
            palisade::Error::Storage(e) => {
                tracing::error!(error = %e, "Storage failure on request path");
                ApiError::InternalError("storage".to_string())
            }
            palisade::Error::Audit(e) => {
                tracing::error!(error = %e, "Audit failure on request path");
                ApiError::InternalError("audit".to_string())
            }
        }
    }
}

impl ApiError {
    /// Stable machine-readable code for the response body.
    fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidCredentials => "invalid_credentials",
            ApiError::TwoFactorRequired => "two_factor_required",
            ApiError::AccountLocked { .. } => "account_locked",
            ApiError::Forbidden => "insufficient_privilege",
            ApiError::Unauthorized => "unauthorized",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::RateLimited => "rate_limit_exceeded",
            ApiError::InternalError(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials
            | ApiError::TwoFactorRequired
            | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::AccountLocked { .. } => StatusCode::LOCKED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let error_message = match &self {
            // Never leak internals to the client
            ApiError::InternalError(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let mut body = json!({
            "error": error_message,
            "code": self.code(),
        });

        if let ApiError::AccountLocked { locked_until } = &self {
            body["locked_until"] = json!(locked_until);
        }

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
