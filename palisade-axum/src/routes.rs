use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{delete, get, post},
};
use axum_extra::extract::cookie::{Cookie, SameSite};

use palisade::{
    ClientInfo, LoginAttempt, LoginOutcome, Palisade, PrivilegeLevel, RepositoryProvider,
    SecondFactor, SecurityNotifier,
};

use crate::{
    error::{ApiError, Result},
    extractors::{AuthAccount, AuthSession, SessionTokenFromRequest},
    middleware::{AuthState, auth_middleware},
    types::*,
};

/// Build the authentication router.
///
/// The admin login route requires at least [`PrivilegeLevel::Moderator`];
/// use [`create_router_with_admin_level`] to raise or lower the floor.
pub fn create_router<R, N>(palisade: Arc<Palisade<R, N>>, cookie_config: CookieConfig) -> Router
where
    R: RepositoryProvider + 'static,
    N: SecurityNotifier + 'static,
{
    create_router_with_admin_level(palisade, cookie_config, PrivilegeLevel::Moderator)
}

/// Build the authentication router with an explicit admin-login privilege
/// floor.
pub fn create_router_with_admin_level<R, N>(
    palisade: Arc<Palisade<R, N>>,
    cookie_config: CookieConfig,
    admin_min_level: PrivilegeLevel,
) -> Router
where
    R: RepositoryProvider + 'static,
    N: SecurityNotifier + 'static,
{
    let state = AuthState {
        palisade,
        admin_min_level,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/auth/admin/login", post(admin_login_handler))
        .route("/auth/logout", post(logout_handler))
        .route("/auth/setup-2fa", post(setup_two_factor_handler))
        .route("/auth/verify-2fa", post(verify_two_factor_handler))
        .route("/auth/disable-2fa", post(disable_two_factor_handler))
        .route("/auth/change-password", post(change_password_handler))
        .route("/auth/forgot-password", post(forgot_password_handler))
        .route("/auth/reset-password", post(reset_password_handler))
        .route("/auth/session", get(session_handler))
        .route("/auth/sessions", delete(revoke_sessions_handler))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_middleware::<R, N>,
        ))
        .with_state(state)
        .layer(axum::Extension(cookie_config))
}

fn require(field: Option<String>, name: &str) -> Result<String> {
    field
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(format!("{name} is required")))
}

fn build_attempt(payload: LoginRequest, connection: ConnectionInfo) -> Result<LoginAttempt> {
    let email = require(payload.email, "email")?;
    let password = require(payload.password, "password")?;

    let second_factor = match (payload.totp_code, payload.backup_code) {
        (Some(code), _) if !code.trim().is_empty() => Some(SecondFactor::Totp(code)),
        (_, Some(code)) if !code.trim().is_empty() => Some(SecondFactor::BackupCode(code)),
        _ => None,
    };

    Ok(LoginAttempt {
        email,
        password,
        second_factor,
        remember_me: payload.remember_me,
        client: ClientInfo {
            ip_address: connection.ip,
            user_agent: connection.user_agent,
        },
    })
}

fn session_cookie(config: &CookieConfig, token: &str) -> Cookie<'static> {
    let same_site = match config.same_site {
        CookieSameSite::Strict => SameSite::Strict,
        CookieSameSite::Lax => SameSite::Lax,
        CookieSameSite::None => SameSite::None,
    };

    Cookie::build((config.name.clone(), token.to_string()))
        .path(config.path.clone())
        .http_only(config.http_only)
        .secure(config.secure)
        .same_site(same_site)
        .build()
}

fn login_response(
    cookie_config: &CookieConfig,
    outcome: LoginOutcome,
) -> (StatusCode, [(header::HeaderName, String); 1], Json<LoginResponse>) {
    let cookie = session_cookie(cookie_config, outcome.session.token.as_str());

    (
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.to_string())],
        Json(LoginResponse {
            account: outcome.account.summary(),
            session_token: outcome.session.token.to_string(),
            session: SessionInfo::from(&outcome.session),
            risk_level: outcome.risk.level,
        }),
    )
}

async fn health_handler<R, N>(State(state): State<AuthState<R, N>>) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    state
        .palisade
        .health_check()
        .await
        .map_err(|e| ApiError::InternalError(e.to_string()))?;

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn login_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    axum::Extension(cookie_config): axum::Extension<CookieConfig>,
    connection: ConnectionInfo,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let attempt = build_attempt(payload, connection)?;
    let outcome = state.palisade.login(attempt).await?;

    Ok(login_response(&cookie_config, outcome))
}

async fn admin_login_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    axum::Extension(cookie_config): axum::Extension<CookieConfig>,
    connection: ConnectionInfo,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let attempt = build_attempt(payload, connection)?;
    let outcome = state
        .palisade
        .admin_login(attempt, state.admin_min_level)
        .await?;

    Ok(login_response(&cookie_config, outcome))
}

async fn logout_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    axum::Extension(cookie_config): axum::Extension<CookieConfig>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    state
        .palisade
        .logout(&token)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    let mut removal = Cookie::build((cookie_config.name.clone(), ""))
        .path(cookie_config.path.clone())
        .build();
    removal.make_removal();

    Ok((
        [(header::SET_COOKIE, removal.to_string())],
        Json(MessageResponse {
            message: "Successfully logged out".to_string(),
        }),
    ))
}

async fn session_handler<R, N>(
    State(_state): State<AuthState<R, N>>,
    AuthAccount(account): AuthAccount,
    AuthSession(session): AuthSession,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    Ok(Json(SessionResponse {
        account: account.summary(),
        session: SessionInfo::from(&session),
    }))
}

async fn revoke_sessions_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    let revoked = state.palisade.revoke_other_sessions(&token).await?;

    Ok(Json(RevokedSessionsResponse { revoked }))
}

async fn setup_two_factor_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
    Json(payload): Json<SetupTwoFactorRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    let password = require(payload.password, "password")?;

    let enrollment = state.palisade.setup_two_factor(&token, &password).await?;

    Ok(Json(TwoFactorSetupResponse {
        secret: enrollment.secret,
        provisioning_uri: enrollment.provisioning_uri,
        backup_codes: enrollment.backup_codes,
    }))
}

async fn verify_two_factor_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
    Json(payload): Json<VerifyTwoFactorRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    state
        .palisade
        .verify_two_factor(&token, &payload.code)
        .await?;

    Ok(Json(MessageResponse {
        message: "Two-factor authentication enabled".to_string(),
    }))
}

async fn disable_two_factor_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
    Json(payload): Json<DisableTwoFactorRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    let password = require(payload.password, "password")?;

    state
        .palisade
        .disable_two_factor(&token, &password, payload.backup_code.as_deref())
        .await?;

    Ok(Json(MessageResponse {
        message: "Two-factor authentication disabled".to_string(),
    }))
}

async fn change_password_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    SessionTokenFromRequest(token): SessionTokenFromRequest,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = token.ok_or(ApiError::Unauthorized)?;
    let current = require(payload.current_password, "current_password")?;
    let new = require(payload.new_password, "new_password")?;

    state.palisade.change_password(&token, &current, &new).await?;

    Ok(Json(MessageResponse {
        message: "Password changed".to_string(),
    }))
}

async fn forgot_password_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let email = require(payload.email, "email")?;
    state.palisade.forgot_password(&email).await?;

    // Identical response whether or not the account exists
    Ok(Json(MessageResponse {
        message: "If an account with that email exists, a password reset link has been sent."
            .to_string(),
    }))
}

async fn reset_password_handler<R, N>(
    State(state): State<AuthState<R, N>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = require(payload.token, "token")?;
    let new_password = require(payload.new_password, "new_password")?;

    state.palisade.reset_password(&token, &new_password).await?;

    Ok(Json(MessageResponse {
        message: "Password has been reset".to_string(),
    }))
}
