use std::net::SocketAddr;

use axum::{
    Extension, RequestPartsExt,
    extract::{ConnectInfo, FromRequestParts},
    http::{StatusCode, request::Parts},
};
use axum_extra::{TypedHeader, extract::CookieJar, headers::UserAgent};

use palisade::{Account, Session, SessionToken};

use crate::{error::ApiError, types::ConnectionInfo};

/// Name of the session cookie, shared with the router configuration.
pub(crate) const SESSION_COOKIE: &str = "palisade_session";

impl<S> FromRequestParts<S> for ConnectionInfo
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_agent = parts
            .extract::<Option<TypedHeader<UserAgent>>>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid user agent header"))?
            .map(|ua| ua.to_string());

        let ip = parts
            .extract::<ConnectInfo<SocketAddr>>()
            .await
            .ok()
            .map(|addr| addr.ip().to_string());

        Ok(ConnectionInfo { ip, user_agent })
    }
}

/// The authenticated account, inserted by the auth middleware.
pub struct AuthAccount(pub Account);

impl<S> FromRequestParts<S> for AuthAccount
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(account): Extension<Account> = parts
            .extract()
            .await
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthAccount(account))
    }
}

/// The authenticated account when present, `None` otherwise.
pub struct OptionalAuthAccount(pub Option<Account>);

impl<S> FromRequestParts<S> for OptionalAuthAccount
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuthAccount(parts.extensions.get::<Account>().cloned()))
    }
}

/// The resolved session, inserted by the auth middleware.
pub struct AuthSession(pub Session);

impl<S> FromRequestParts<S> for AuthSession
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Extension(session): Extension<Session> = parts
            .extract()
            .await
            .map_err(|_| ApiError::Unauthorized)?;

        Ok(AuthSession(session))
    }
}

pub struct SessionTokenFromCookie(pub Option<SessionToken>);

impl<S> FromRequestParts<S> for SessionTokenFromCookie
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jar = parts
            .extract::<CookieJar>()
            .await
            .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid cookie header"))?;

        let session_token = jar
            .get(SESSION_COOKIE)
            .map(|cookie| SessionToken::new(cookie.value()));

        Ok(SessionTokenFromCookie(session_token))
    }
}

pub struct SessionTokenFromBearer(pub Option<SessionToken>);

impl<S> FromRequestParts<S> for SessionTokenFromBearer
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let session_token = parts
            .headers
            .get("Authorization")
            .and_then(|header| header.to_str().ok())
            .and_then(|header| header.strip_prefix("Bearer "))
            .map(SessionToken::new);

        Ok(SessionTokenFromBearer(session_token))
    }
}

/// Bearer token first, session cookie as the fallback.
pub struct SessionTokenFromRequest(pub Option<SessionToken>);

impl<S> FromRequestParts<S> for SessionTokenFromRequest
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let SessionTokenFromBearer(bearer) =
            SessionTokenFromBearer::from_request_parts(parts, state).await?;
        if bearer.is_some() {
            return Ok(SessionTokenFromRequest(bearer));
        }

        let SessionTokenFromCookie(cookie) =
            SessionTokenFromCookie::from_request_parts(parts, state).await?;
        Ok(SessionTokenFromRequest(cookie))
    }
}
