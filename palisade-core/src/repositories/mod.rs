//! Repository traits for data access layer
//!
//! This module defines the repository interfaces that services use to
//! interact with storage. These traits provide a clean abstraction over the
//! underlying storage implementation.
//!
//! # Trait Hierarchy
//!
//! The repository system uses a composable trait hierarchy:
//!
//! - Individual `*Repository` traits define the operations for each data domain
//! - Individual `*RepositoryProvider` traits provide access to each repository type
//! - [`RepositoryProvider`] is a supertrait combining all provider traits plus lifecycle methods
//!
//! This design allows storage backends to implement only the repositories
//! they need and expose a unified interface through the full
//! `RepositoryProvider` trait.

pub mod account;
pub mod adapter;
pub mod audit;
pub mod session;
pub mod threat;
pub mod token;

pub use account::AccountRepository;
pub use adapter::{
    AccountRepositoryAdapter, AuditRepositoryAdapter, SessionRepositoryAdapter,
    ThreatRepositoryAdapter, TokenRepositoryAdapter,
};
pub use audit::{AuditQuery, AuditRepository};
pub use session::SessionRepository;
pub use threat::{IpReputation, ThreatRepository};
pub use token::{SecureToken, TokenPurpose, TokenRepository};

use async_trait::async_trait;

use crate::Error;

/// Provider trait for account repository access.
pub trait AccountRepositoryProvider: Send + Sync + 'static {
    /// The account repository implementation type
    type AccountRepo: AccountRepository;

    /// Get the account repository
    fn account(&self) -> &Self::AccountRepo;
}

/// Provider trait for session repository access.
pub trait SessionRepositoryProvider: Send + Sync + 'static {
    /// The session repository implementation type
    type SessionRepo: SessionRepository;

    /// Get the session repository
    fn session(&self) -> &Self::SessionRepo;
}

/// Provider trait for audit repository access.
pub trait AuditRepositoryProvider: Send + Sync + 'static {
    /// The audit repository implementation type
    type AuditRepo: AuditRepository;

    /// Get the audit repository
    fn audit(&self) -> &Self::AuditRepo;
}

/// Provider trait for threat repository access.
pub trait ThreatRepositoryProvider: Send + Sync + 'static {
    /// The threat repository implementation type
    type ThreatRepo: ThreatRepository;

    /// Get the threat repository
    fn threat(&self) -> &Self::ThreatRepo;
}

/// Provider trait for secure token repository access.
pub trait TokenRepositoryProvider: Send + Sync + 'static {
    /// The token repository implementation type
    type TokenRepo: TokenRepository;

    /// Get the token repository
    fn token(&self) -> &Self::TokenRepo;
}

/// Provider trait that storage implementations must implement to provide
/// all repositories.
///
/// This trait is a supertrait combining all individual repository provider
/// traits, plus lifecycle methods for migrations and health checks.
#[async_trait]
pub trait RepositoryProvider:
    AccountRepositoryProvider
    + SessionRepositoryProvider
    + AuditRepositoryProvider
    + ThreatRepositoryProvider
    + TokenRepositoryProvider
{
    /// Run migrations for all repositories
    async fn migrate(&self) -> Result<(), Error>;

    /// Health check for all repositories
    async fn health_check(&self) -> Result<(), Error>;
}
