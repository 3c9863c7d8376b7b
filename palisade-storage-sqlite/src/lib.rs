//! SQLite storage backend for the palisade authentication subsystem
//!
//! Implements every repository trait from `palisade-core` over a
//! `sqlx::SqlitePool`, with embedded migrations.
//!
//! ```rust,ignore
//! use palisade_storage_sqlite::SqliteRepositoryProvider;
//! use palisade_core::RepositoryProvider;
//!
//! let pool = sqlx::SqlitePool::connect("sqlite::memory:").await?;
//! let repositories = SqliteRepositoryProvider::new(pool);
//! repositories.migrate().await?;
//! ```

pub mod migrations;
pub mod repositories;

pub use repositories::{
    SqliteAccountRepository, SqliteAuditRepository, SqliteRepositoryProvider,
    SqliteSessionRepository, SqliteThreatRepository, SqliteTokenRepository,
};
