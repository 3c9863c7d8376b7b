//! SQLite implementation of the account repository.
//!
//! Security-state mutations are single statements (or single
//! transactions), so two concurrent failed-login requests for the same
//! account cannot race into an inconsistent counter and a backup code can
//! only ever be consumed once.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use palisade_core::{
    Error,
    account::{Account, AccountId, NewAccount},
    error::StorageError,
    repositories::AccountRepository,
};

pub struct SqliteAccountRepository {
    pool: SqlitePool,
}

impl SqliteAccountRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteAccount {
    id: String,
    email: String,
    name: Option<String>,
    level: String,
    password_hash: String,
    password_changed_at: i64,
    requires_password_change: bool,
    failed_attempts: i64,
    locked_until: Option<i64>,
    two_factor_enabled: bool,
    two_factor_secret: Option<String>,
    last_login_at: Option<i64>,
    login_count: i64,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<SqliteAccount> for Account {
    type Error = Error;

    fn try_from(row: SqliteAccount) -> Result<Self, Error> {
        Ok(Account {
            id: AccountId::new(&row.id),
            email: row.email,
            name: row.name,
            level: row.level.parse()?,
            password_hash: row.password_hash,
            password_changed_at: DateTime::from_timestamp(row.password_changed_at, 0)
                .expect("Invalid timestamp"),
            requires_password_change: row.requires_password_change,
            failed_attempts: row.failed_attempts as u32,
            locked_until: row
                .locked_until
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            two_factor_enabled: row.two_factor_enabled,
            two_factor_secret: row.two_factor_secret,
            last_login_at: row
                .last_login_at
                .and_then(|ts| DateTime::from_timestamp(ts, 0)),
            login_count: row.login_count,
            created_at: DateTime::from_timestamp(row.created_at, 0).expect("Invalid timestamp"),
            updated_at: DateTime::from_timestamp(row.updated_at, 0).expect("Invalid timestamp"),
        })
    }
}

const ACCOUNT_COLUMNS: &str = "id, email, name, level, password_hash, password_changed_at, \
     requires_password_change, failed_attempts, locked_until, two_factor_enabled, \
     two_factor_secret, last_login_at, login_count, created_at, updated_at";

#[async_trait]
impl AccountRepository for SqliteAccountRepository {
    async fn create(&self, account: NewAccount) -> Result<Account, Error> {
        let now = Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO accounts (id, email, name, level, password_hash, password_changed_at, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?6)
            "#,
        )
        .bind(account.id.as_str())
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.level.as_str())
        .bind(&account.password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create account");
            StorageError::Database("Failed to create account".to_string())
        })?;

        self.find_by_id(&account.id)
            .await?
            .ok_or_else(|| StorageError::NotFound.into())
    }

    async fn find_by_id(&self, id: &AccountId) -> Result<Option<Account>, Error> {
        let row = sqlx::query_as::<_, SqliteAccount>(
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = ?1").as_str(),
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        row.map(Account::try_from).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, Error> {
        let row = sqlx::query_as::<_, SqliteAccount>(
            format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = ?1").as_str(),
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        row.map(Account::try_from).transpose()
    }

    async fn update(&self, account: &Account) -> Result<Account, Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET email = ?2, name = ?3, level = ?4, requires_password_change = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(account.id.as_str())
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.level.as_str())
        .bind(account.requires_password_change)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        self.find_by_id(&account.id)
            .await?
            .ok_or_else(|| StorageError::NotFound.into())
    }

    async fn record_failed_attempt(&self, id: &AccountId) -> Result<u32, Error> {
        // Single-statement read-modify-write: each caller observes its own
        // post-increment count
        let failed_attempts: i64 = sqlx::query_scalar(
            r#"
            UPDATE accounts
            SET failed_attempts = failed_attempts + 1, updated_at = ?2
            WHERE id = ?1
            RETURNING failed_attempts
            "#,
        )
        .bind(id.as_str())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to record failed attempt");
            StorageError::Database("Failed to record failed attempt".to_string())
        })?;

        Ok(failed_attempts as u32)
    }

    async fn try_lock(
        &self,
        id: &AccountId,
        locked_until: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool, Error> {
        // Compare-and-set: only an unlocked row takes the new horizon, so
        // one of any set of concurrent callers wins
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET locked_until = ?2, updated_at = ?3
            WHERE id = ?1 AND (locked_until IS NULL OR locked_until <= ?3)
            "#,
        )
        .bind(id.as_str())
        .bind(locked_until.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected() == 1)
    }

    async fn record_success(&self, id: &AccountId, now: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET failed_attempts = 0,
                locked_until = NULL,
                last_login_at = ?2,
                login_count = login_count + 1,
                updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn clear_lockout(&self, id: &AccountId) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET failed_attempts = 0, locked_until = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn set_password_hash(
        &self,
        id: &AccountId,
        hash: &str,
        changed_at: DateTime<Utc>,
    ) -> Result<(), Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        // Superseded hash moves to the history in the same transaction
        sqlx::query(
            r#"
            INSERT INTO password_history (account_id, password_hash, superseded_at)
            SELECT id, password_hash, ?2 FROM accounts WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(changed_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = ?2,
                password_changed_at = ?3,
                requires_password_change = 0,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(hash)
        .bind(changed_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn password_history(&self, id: &AccountId, limit: u32) -> Result<Vec<String>, Error> {
        let hashes: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT password_hash FROM password_history
            WHERE account_id = ?1
            ORDER BY superseded_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(hashes)
    }

    async fn set_requires_password_change(
        &self,
        id: &AccountId,
        required: bool,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE accounts SET requires_password_change = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.as_str())
            .bind(required)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn set_two_factor_secret(
        &self,
        id: &AccountId,
        secret: Option<&str>,
    ) -> Result<(), Error> {
        sqlx::query("UPDATE accounts SET two_factor_secret = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.as_str())
            .bind(secret)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn set_two_factor_enabled(&self, id: &AccountId, enabled: bool) -> Result<(), Error> {
        sqlx::query("UPDATE accounts SET two_factor_enabled = ?2, updated_at = ?3 WHERE id = ?1")
            .bind(id.as_str())
            .bind(enabled)
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn disable_two_factor(&self, id: &AccountId) -> Result<(), Error> {
        // Flag, secret and backup codes clear together; a crash cannot
        // leave a partial disable state visible
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        sqlx::query(
            r#"
            UPDATE accounts
            SET two_factor_enabled = 0, two_factor_secret = NULL, updated_at = ?2
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .bind(Utc::now().timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        sqlx::query("DELETE FROM backup_codes WHERE account_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn replace_backup_codes(&self, id: &AccountId, hashes: &[String]) -> Result<(), Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        sqlx::query("DELETE FROM backup_codes WHERE account_id = ?1")
            .bind(id.as_str())
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        let now = Utc::now().timestamp();
        for hash in hashes {
            sqlx::query(
                "INSERT INTO backup_codes (account_id, code_hash, created_at) VALUES (?1, ?2, ?3)",
            )
            .bind(id.as_str())
            .bind(hash)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;
        }

        tx.commit()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn consume_backup_code(&self, id: &AccountId, hash: &str) -> Result<bool, Error> {
        // The delete IS the accept decision: at most one caller ever sees
        // rows_affected == 1 for a given code
        let result = sqlx::query(
            "DELETE FROM backup_codes WHERE account_id = ?1 AND code_hash = ?2",
        )
        .bind(id.as_str())
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected() == 1)
    }

    async fn backup_code_count(&self, id: &AccountId) -> Result<u32, Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM backup_codes WHERE account_id = ?1")
                .bind(id.as_str())
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(count as u32)
    }
}
