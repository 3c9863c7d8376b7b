//! Repository implementations for SQLite storage

pub mod account;
pub mod audit;
pub mod session;
pub mod threat;
pub mod token;

pub use account::SqliteAccountRepository;
pub use audit::SqliteAuditRepository;
pub use session::SqliteSessionRepository;
pub use threat::SqliteThreatRepository;
pub use token::SqliteTokenRepository;

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::sync::Arc;

use palisade_core::{
    Error,
    error::StorageError,
    repositories::{
        AccountRepositoryProvider, AuditRepositoryProvider, RepositoryProvider,
        SessionRepositoryProvider, ThreatRepositoryProvider, TokenRepositoryProvider,
    },
};

/// Repository provider implementation for SQLite
///
/// This struct implements all the individual repository provider traits
/// as well as the unified `RepositoryProvider` trait.
pub struct SqliteRepositoryProvider {
    pool: SqlitePool,
    account: Arc<SqliteAccountRepository>,
    session: Arc<SqliteSessionRepository>,
    audit: Arc<SqliteAuditRepository>,
    threat: Arc<SqliteThreatRepository>,
    token: Arc<SqliteTokenRepository>,
}

impl SqliteRepositoryProvider {
    pub fn new(pool: SqlitePool) -> Self {
        let account = Arc::new(SqliteAccountRepository::new(pool.clone()));
        let session = Arc::new(SqliteSessionRepository::new(pool.clone()));
        let audit = Arc::new(SqliteAuditRepository::new(pool.clone()));
        let threat = Arc::new(SqliteThreatRepository::new(pool.clone()));
        let token = Arc::new(SqliteTokenRepository::new(pool.clone()));

        Self {
            pool,
            account,
            session,
            audit,
            threat,
            token,
        }
    }
}

// Implement individual provider traits

impl AccountRepositoryProvider for SqliteRepositoryProvider {
    type AccountRepo = SqliteAccountRepository;

    fn account(&self) -> &Self::AccountRepo {
        &self.account
    }
}

impl SessionRepositoryProvider for SqliteRepositoryProvider {
    type SessionRepo = SqliteSessionRepository;

    fn session(&self) -> &Self::SessionRepo {
        &self.session
    }
}

impl AuditRepositoryProvider for SqliteRepositoryProvider {
    type AuditRepo = SqliteAuditRepository;

    fn audit(&self) -> &Self::AuditRepo {
        &self.audit
    }
}

impl ThreatRepositoryProvider for SqliteRepositoryProvider {
    type ThreatRepo = SqliteThreatRepository;

    fn threat(&self) -> &Self::ThreatRepo {
        &self.threat
    }
}

impl TokenRepositoryProvider for SqliteRepositoryProvider {
    type TokenRepo = SqliteTokenRepository;

    fn token(&self) -> &Self::TokenRepo {
        &self.token
    }
}

// Implement the unified RepositoryProvider trait

#[async_trait]
impl RepositoryProvider for SqliteRepositoryProvider {
    async fn migrate(&self) -> Result<(), Error> {
        use crate::migrations::{
            CreateAccountsTable, CreateBackupCodesTable, CreateIndexes, CreateIpBlacklistTable,
            CreatePasswordHistoryTable, CreateSecureTokensTable, CreateSecurityEventsTable,
            CreateSessionsTable, CreateThreatRecordsTable, Migration, SqliteMigrationManager,
        };

        let manager = SqliteMigrationManager::new(self.pool.clone());
        manager.initialize().await.map_err(|e| {
            tracing::error!(error = %e, "Failed to initialize migrations");
            Error::Storage(StorageError::Migration(
                "Failed to initialize migrations".to_string(),
            ))
        })?;

        let migrations: Vec<Box<dyn Migration>> = vec![
            Box::new(CreateAccountsTable),
            Box::new(CreatePasswordHistoryTable),
            Box::new(CreateBackupCodesTable),
            Box::new(CreateSessionsTable),
            Box::new(CreateSecurityEventsTable),
            Box::new(CreateThreatRecordsTable),
            Box::new(CreateIpBlacklistTable),
            Box::new(CreateSecureTokensTable),
            Box::new(CreateIndexes),
        ];
        manager.up(&migrations).await.map_err(|e| {
            tracing::error!(error = %e, "Failed to run migrations");
            Error::Storage(StorageError::Migration(
                "Failed to run migrations".to_string(),
            ))
        })?;

        Ok(())
    }

    async fn health_check(&self) -> Result<(), Error> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;
        Ok(())
    }
}
