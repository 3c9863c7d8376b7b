//! Embedded schema migrations.
//!
//! Each migration is a versioned pair of SQL steps applied inside its own
//! transaction, with bookkeeping in `_palisade_migrations`. Applying is
//! idempotent: already-recorded versions are skipped.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use thiserror::Error;

const MIGRATION_TABLE: &str = "_palisade_migrations";

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("Migration failed: {0}")]
    Migration(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// One versioned schema change.
#[async_trait]
pub trait Migration: Send + Sync {
    /// Execute the migration
    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError>;

    /// Rollback the migration
    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError>;

    /// Unique version number for ordering migrations
    fn version(&self) -> i64;

    /// Human readable name of the migration
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct MigrationRecord {
    pub version: i64,
    pub name: String,
    pub applied_at: i64, // unix timestamp since no database can agree on a datetime type
}

/// Applies and rolls back migrations against one pool.
pub struct SqliteMigrationManager {
    pool: SqlitePool,
}

impl SqliteMigrationManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Initialize the migration bookkeeping table.
    pub async fn initialize(&self) -> Result<(), MigrationError> {
        sqlx::query(
            format!(
                r#"
            CREATE TABLE IF NOT EXISTS {MIGRATION_TABLE} (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
            )
            .as_str(),
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Apply every migration not yet recorded, in order.
    pub async fn up(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if !self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    "Applying migration {} ({})",
                    migration.name(),
                    migration.version()
                );

                migration.up(&mut *tx).await?;

                sqlx::query(
                    format!("INSERT INTO {MIGRATION_TABLE} (version, name, applied_at) VALUES (?, ?, ?)")
                        .as_str(),
                )
                .bind(migration.version())
                .bind(migration.name())
                .bind(Utc::now().timestamp())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// Roll back every applied migration in the given list.
    pub async fn down(&self, migrations: &[Box<dyn Migration>]) -> Result<(), MigrationError> {
        for migration in migrations {
            if self.is_applied(migration.version()).await? {
                let mut tx = self.pool.begin().await?;

                tracing::info!(
                    "Rolling back migration {} ({})",
                    migration.name(),
                    migration.version()
                );

                migration.down(&mut *tx).await?;

                sqlx::query(
                    format!("DELETE FROM {MIGRATION_TABLE} WHERE version = ?").as_str(),
                )
                .bind(migration.version())
                .execute(&mut *tx)
                .await?;

                tx.commit().await?;
            }
        }
        Ok(())
    }

    /// The applied-migration log.
    pub async fn applied(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let records = sqlx::query_as::<_, MigrationRecord>(
            format!("SELECT version, name, applied_at FROM {MIGRATION_TABLE}").as_str(),
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(records)
    }

    async fn is_applied(&self, version: i64) -> Result<bool, MigrationError> {
        let result: bool = sqlx::query_scalar(
            format!("SELECT EXISTS(SELECT 1 FROM {MIGRATION_TABLE} WHERE version = ?)").as_str(),
        )
        .bind(version)
        .fetch_one(&self.pool)
        .await?;
        Ok(result)
    }
}

pub struct CreateAccountsTable;

#[async_trait]
impl Migration for CreateAccountsTable {
    fn version(&self) -> i64 {
        1
    }

    fn name(&self) -> &str {
        "CreateAccountsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS accounts (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                name TEXT,
                level TEXT NOT NULL DEFAULT 'viewer',
                password_hash TEXT NOT NULL,
                password_changed_at INTEGER NOT NULL DEFAULT (unixepoch()),
                requires_password_change INTEGER NOT NULL DEFAULT 0,
                failed_attempts INTEGER NOT NULL DEFAULT 0,
                locked_until INTEGER,
                two_factor_enabled INTEGER NOT NULL DEFAULT 0,
                two_factor_secret TEXT,
                last_login_at INTEGER,
                login_count INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                updated_at INTEGER NOT NULL DEFAULT (unixepoch()),
                UNIQUE(email)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS accounts")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreatePasswordHistoryTable;

#[async_trait]
impl Migration for CreatePasswordHistoryTable {
    fn version(&self) -> i64 {
        2
    }

    fn name(&self) -> &str {
        "CreatePasswordHistoryTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS password_history (
                id INTEGER PRIMARY KEY,
                account_id TEXT NOT NULL,
                password_hash TEXT NOT NULL,
                superseded_at INTEGER NOT NULL DEFAULT (unixepoch()),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS password_history")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateBackupCodesTable;

#[async_trait]
impl Migration for CreateBackupCodesTable {
    fn version(&self) -> i64 {
        3
    }

    fn name(&self) -> &str {
        "CreateBackupCodesTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS backup_codes (
                account_id TEXT NOT NULL,
                code_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL DEFAULT (unixepoch()),
                PRIMARY KEY (account_id, code_hash),
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS backup_codes")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateSessionsTable;

#[async_trait]
impl Migration for CreateSessionsTable {
    fn version(&self) -> i64 {
        4
    }

    fn name(&self) -> &str {
        "CreateSessionsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                token TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                ip_address TEXT,
                user_agent TEXT,
                remember_me INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                last_activity_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                ended_at INTEGER,
                ended_reason TEXT,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS sessions")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateSecurityEventsTable;

#[async_trait]
impl Migration for CreateSecurityEventsTable {
    fn version(&self) -> i64 {
        5
    }

    fn name(&self) -> &str {
        "CreateSecurityEventsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS security_events (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                severity TEXT NOT NULL,
                account_id TEXT,
                ip_address TEXT,
                user_agent TEXT,
                detail TEXT NOT NULL DEFAULT 'null',
                risk_score INTEGER,
                created_at INTEGER NOT NULL
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS security_events")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateThreatRecordsTable;

#[async_trait]
impl Migration for CreateThreatRecordsTable {
    fn version(&self) -> i64 {
        6
    }

    fn name(&self) -> &str {
        "CreateThreatRecordsTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS threat_records (
                id TEXT PRIMARY KEY,
                ip_address TEXT NOT NULL,
                threat_type TEXT NOT NULL,
                level TEXT NOT NULL,
                first_seen INTEGER NOT NULL,
                last_seen INTEGER NOT NULL,
                frequency INTEGER NOT NULL DEFAULT 1,
                mitigated INTEGER NOT NULL DEFAULT 0,
                mitigation TEXT,
                UNIQUE(ip_address, threat_type)
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS threat_records")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIpBlacklistTable;

#[async_trait]
impl Migration for CreateIpBlacklistTable {
    fn version(&self) -> i64 {
        7
    }

    fn name(&self) -> &str {
        "CreateIpBlacklistTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ip_blacklist (
                ip_address TEXT PRIMARY KEY,
                reason TEXT,
                created_at INTEGER NOT NULL DEFAULT (unixepoch())
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS ip_blacklist")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateSecureTokensTable;

#[async_trait]
impl Migration for CreateSecureTokensTable {
    fn version(&self) -> i64 {
        8
    }

    fn name(&self) -> &str {
        "CreateSecureTokensTable"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS secure_tokens (
                token_hash TEXT PRIMARY KEY,
                account_id TEXT NOT NULL,
                purpose TEXT NOT NULL,
                used_at INTEGER,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (account_id) REFERENCES accounts(id) ON DELETE CASCADE
            );"#,
        )
        .execute(conn)
        .await?;
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        sqlx::query("DROP TABLE IF EXISTS secure_tokens")
            .execute(conn)
            .await?;
        Ok(())
    }
}

pub struct CreateIndexes;

#[async_trait]
impl Migration for CreateIndexes {
    fn version(&self) -> i64 {
        9
    }

    fn name(&self) -> &str {
        "CreateIndexes"
    }

    async fn up(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_sessions_account_id ON sessions(account_id)",
            "CREATE INDEX IF NOT EXISTS idx_sessions_expires_at ON sessions(expires_at)",
            "CREATE INDEX IF NOT EXISTS idx_security_events_account_id ON security_events(account_id)",
            "CREATE INDEX IF NOT EXISTS idx_security_events_created_at ON security_events(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_threat_records_ip ON threat_records(ip_address)",
            "CREATE INDEX IF NOT EXISTS idx_password_history_account ON password_history(account_id)",
            "CREATE INDEX IF NOT EXISTS idx_secure_tokens_expires_at ON secure_tokens(expires_at)",
        ] {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn down(&self, conn: &mut SqliteConnection) -> Result<(), MigrationError> {
        for statement in [
            "DROP INDEX IF EXISTS idx_sessions_account_id",
            "DROP INDEX IF EXISTS idx_sessions_expires_at",
            "DROP INDEX IF EXISTS idx_security_events_account_id",
            "DROP INDEX IF EXISTS idx_security_events_created_at",
            "DROP INDEX IF EXISTS idx_threat_records_ip",
            "DROP INDEX IF EXISTS idx_password_history_account",
            "DROP INDEX IF EXISTS idx_secure_tokens_expires_at",
        ] {
            sqlx::query(statement).execute(&mut *conn).await?;
        }
        Ok(())
    }
}
