//! Ready-to-use Axum routes and middleware for the palisade
//! authentication subsystem.
//!
//! Mounts the full HTTP surface: login (regular and admin), logout,
//! two-factor setup/verify/disable, password change, the enumeration-safe
//! forgot/reset flow, session introspection and bulk revocation. Sessions
//! travel as an HttpOnly cookie or a Bearer token.
//!
//! ```rust,ignore
//! use palisade_axum::{CookieConfig, create_router};
//!
//! let router = create_router(palisade, CookieConfig::default());
//! axum::serve(listener, router).await?;
//! ```

pub mod error;
pub mod extractors;
pub mod middleware;
pub mod routes;
pub mod types;

pub use error::ApiError;
pub use extractors::{AuthAccount, AuthSession, OptionalAuthAccount, SessionTokenFromRequest};
pub use middleware::{AuthState, auth_middleware, privilege_middleware, require_auth};
pub use routes::{create_router, create_router_with_admin_level};
pub use types::{CookieConfig, CookieSameSite};
