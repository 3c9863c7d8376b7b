use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use palisade::{Palisade, PrivilegeLevel, RepositoryProvider, SecurityNotifier, SessionToken};

use crate::error::ApiError;

pub struct AuthState<R: RepositoryProvider, N: SecurityNotifier> {
    pub palisade: Arc<Palisade<R, N>>,
    /// Minimum level for the admin login route.
    pub admin_min_level: PrivilegeLevel,
}

impl<R: RepositoryProvider, N: SecurityNotifier> Clone for AuthState<R, N> {
    fn clone(&self) -> Self {
        Self {
            palisade: self.palisade.clone(),
            admin_min_level: self.admin_min_level,
        }
    }
}

fn extract_token(request: &Request) -> Option<SessionToken> {
    // Bearer token first, then the session cookie
    let bearer = request
        .headers()
        .get("Authorization")
        .and_then(|header| header.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
        .map(SessionToken::new);
    if bearer.is_some() {
        return bearer;
    }

    request
        .headers()
        .get(axum::http::header::COOKIE)
        .and_then(|header| header.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|pair| {
                let (name, value) = pair.trim().split_once('=')?;
                (name == crate::extractors::SESSION_COOKIE).then(|| SessionToken::new(value))
            })
        })
}

/// Resolves the session token into the account and session, inserting both
/// into request extensions. Requests without a valid session pass through
/// unauthenticated; handlers decide whether that is acceptable.
pub async fn auth_middleware<R, N>(
    State(state): State<AuthState<R, N>>,
    mut request: Request,
    next: Next,
) -> Response
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    if let Some(token) = extract_token(&request) {
        match state.palisade.account_for_session(&token).await {
            Ok((account, session)) => {
                request.extensions_mut().insert(account);
                request.extensions_mut().insert(session);
                request.extensions_mut().insert(token);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request carried an unusable session token");
            }
        }
    }

    next.run(request).await
}

/// Rejects requests whose session account does not meet the minimum
/// privilege level.
///
/// The level is part of the layer's state, so an admin sub-router declares
/// its floor explicitly:
///
/// ```rust,ignore
/// let admin_routes = Router::new()
///     .route("/admin/unlock", post(unlock_handler))
///     .layer(axum::middleware::from_fn_with_state(
///         (state.clone(), PrivilegeLevel::Admin),
///         privilege_middleware::<R, N>,
///     ));
/// ```
pub async fn privilege_middleware<R, N>(
    State((state, min_level)): State<(AuthState<R, N>, PrivilegeLevel)>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = extract_token(&request).ok_or(ApiError::Unauthorized)?;

    let (account, _session) = state
        .palisade
        .account_for_session(&token)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    if account.level < min_level {
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}

/// Rejects unauthenticated requests without a privilege check.
pub async fn require_auth<R, N>(
    State(state): State<AuthState<R, N>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError>
where
    R: RepositoryProvider,
    N: SecurityNotifier,
{
    let token = extract_token(&request).ok_or(ApiError::Unauthorized)?;

    state
        .palisade
        .get_session(&token)
        .await
        .map_err(|_| ApiError::Unauthorized)?;

    Ok(next.run(request).await)
}
