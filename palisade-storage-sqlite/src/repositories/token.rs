//! SQLite implementation of the secure token repository.
//!
//! Tokens are stored hashed; consumption is a single guarded `UPDATE`, so
//! verification and marking-as-used cannot come apart.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use palisade_core::{
    Error,
    account::AccountId,
    crypto,
    error::StorageError,
    repositories::{SecureToken, TokenPurpose, TokenRepository},
};

pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteSecureToken {
    account_id: String,
    purpose: String,
    used_at: Option<i64>,
    expires_at: i64,
    created_at: i64,
}

impl TryFrom<SqliteSecureToken> for SecureToken {
    type Error = Error;

    fn try_from(row: SqliteSecureToken) -> Result<Self, Error> {
        Ok(SecureToken {
            account_id: AccountId::new(&row.account_id),
            // Plaintext is only known to the creating call
            token: String::new(),
            purpose: row.purpose.parse()?,
            used_at: row.used_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            expires_at: DateTime::from_timestamp(row.expires_at, 0).expect("Invalid timestamp"),
            created_at: DateTime::from_timestamp(row.created_at, 0).expect("Invalid timestamp"),
        })
    }
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn create_token(
        &self,
        account_id: &AccountId,
        purpose: TokenPurpose,
        expires_in: Duration,
    ) -> Result<SecureToken, Error> {
        let plaintext = crypto::generate_secure_token();
        let token_hash = crypto::hash_token(&plaintext);
        let now = Utc::now();
        let expires_at = now + expires_in;

        sqlx::query(
            r#"
            INSERT INTO secure_tokens (token_hash, account_id, purpose, expires_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&token_hash)
        .bind(account_id.as_str())
        .bind(purpose.as_str())
        .bind(expires_at.timestamp())
        .bind(now.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to create secure token");
            StorageError::Database("Failed to create secure token".to_string())
        })?;

        Ok(SecureToken {
            account_id: account_id.clone(),
            token: plaintext,
            purpose,
            used_at: None,
            expires_at,
            created_at: now,
        })
    }

    async fn verify_token(
        &self,
        token: &str,
        purpose: TokenPurpose,
    ) -> Result<Option<SecureToken>, Error> {
        let token_hash = crypto::hash_token(token);
        let now = Utc::now().timestamp();

        // Verification and consumption in one guarded statement: at most
        // one caller ever gets the row back
        let row = sqlx::query_as::<_, SqliteSecureToken>(
            r#"
            UPDATE secure_tokens SET used_at = ?3
            WHERE token_hash = ?1
              AND purpose = ?2
              AND used_at IS NULL
              AND expires_at > ?3
            RETURNING account_id, purpose, used_at, expires_at, created_at
            "#,
        )
        .bind(&token_hash)
        .bind(purpose.as_str())
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        row.map(SecureToken::try_from).transpose()
    }

    async fn check_token(&self, token: &str, purpose: TokenPurpose) -> Result<bool, Error> {
        let token_hash = crypto::hash_token(token);

        let valid: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM secure_tokens
                WHERE token_hash = ?1
                  AND purpose = ?2
                  AND used_at IS NULL
                  AND expires_at > ?3
            )
            "#,
        )
        .bind(&token_hash)
        .bind(purpose.as_str())
        .bind(Utc::now().timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(valid)
    }

    async fn cleanup_expired(&self) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM secure_tokens WHERE expires_at <= ?1")
            .bind(Utc::now().timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected())
    }
}
