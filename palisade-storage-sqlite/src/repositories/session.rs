//! SQLite implementation of the session repository.
//!
//! Only the token hash is persisted; the plaintext token stays with the
//! caller. Ended sessions keep their rows so eviction and expiry remain
//! visible to reporting.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use palisade_core::{
    Error,
    account::AccountId,
    error::StorageError,
    repositories::SessionRepository,
    session::{DeviceFingerprint, EndReason, Session, SessionToken},
};

pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteSession {
    token: String, // This stores the hash, not plaintext
    account_id: String,
    fingerprint: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    remember_me: bool,
    created_at: i64,
    last_activity_at: i64,
    expires_at: i64,
    ended_at: Option<i64>,
    ended_reason: Option<String>,
}

impl TryFrom<SqliteSession> for Session {
    type Error = Error;

    fn try_from(row: SqliteSession) -> Result<Self, Error> {
        Ok(Session {
            // Plaintext is not recoverable from storage; rows loaded here
            // must not be presented for authentication
            token: SessionToken::new(""),
            token_hash: row.token,
            account_id: AccountId::new(&row.account_id),
            fingerprint: DeviceFingerprint::new(&row.fingerprint),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            remember_me: row.remember_me,
            created_at: DateTime::from_timestamp(row.created_at, 0).expect("Invalid timestamp"),
            last_activity_at: DateTime::from_timestamp(row.last_activity_at, 0)
                .expect("Invalid timestamp"),
            expires_at: DateTime::from_timestamp(row.expires_at, 0).expect("Invalid timestamp"),
            ended_at: row.ended_at.and_then(|ts| DateTime::from_timestamp(ts, 0)),
            ended_reason: row
                .ended_reason
                .as_deref()
                .map(|s| s.parse::<EndReason>())
                .transpose()?,
        })
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn create(
        &self,
        session: Session,
        max_standard: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<Option<Session>, Error> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        // The count, the eviction and the insert share one transaction so
        // concurrent creations cannot both slip under the cap
        let evicted = match max_standard {
            Some(cap) => {
                let active: i64 = sqlx::query_scalar(
                    r#"
                    SELECT COUNT(*) FROM sessions
                    WHERE account_id = ?1
                      AND remember_me = 0
                      AND ended_at IS NULL
                      AND expires_at > ?2
                    "#,
                )
                .bind(session.account_id.as_str())
                .bind(now.timestamp())
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

                if active as u32 >= cap {
                    let oldest = sqlx::query_as::<_, SqliteSession>(
                        r#"
                        SELECT * FROM sessions
                        WHERE account_id = ?1
                          AND remember_me = 0
                          AND ended_at IS NULL
                          AND expires_at > ?2
                        ORDER BY created_at ASC
                        LIMIT 1
                        "#,
                    )
                    .bind(session.account_id.as_str())
                    .bind(now.timestamp())
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

                    match oldest {
                        Some(row) => {
                            sqlx::query(
                                "UPDATE sessions SET ended_at = ?2, ended_reason = ?3 WHERE token = ?1",
                            )
                            .bind(&row.token)
                            .bind(now.timestamp())
                            .bind(EndReason::EvictedSessionLimit.as_str())
                            .execute(&mut *tx)
                            .await
                            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

                            let mut evicted: Session = row.try_into()?;
                            evicted.ended_at = Some(now);
                            evicted.ended_reason = Some(EndReason::EvictedSessionLimit);
                            Some(evicted)
                        }
                        None => None,
                    }
                } else {
                    None
                }
            }
            None => None,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (token, account_id, fingerprint, ip_address, user_agent,
                                  remember_me, created_at, last_activity_at, expires_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&session.token_hash) // Store hash, not plaintext
        .bind(session.account_id.as_str())
        .bind(session.fingerprint.as_str())
        .bind(&session.ip_address)
        .bind(&session.user_agent)
        .bind(session.remember_me)
        .bind(session.created_at.timestamp())
        .bind(session.last_activity_at.timestamp())
        .bind(session.expires_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        tx.commit()
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(evicted)
    }

    async fn find_by_token_hash(&self, token_hash: &str) -> Result<Option<Session>, Error> {
        let row = sqlx::query_as::<_, SqliteSession>("SELECT * FROM sessions WHERE token = ?1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        row.map(Session::try_from).transpose()
    }

    async fn touch(&self, token_hash: &str, at: DateTime<Utc>) -> Result<(), Error> {
        sqlx::query("UPDATE sessions SET last_activity_at = ?2 WHERE token = ?1")
            .bind(token_hash)
            .bind(at.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn end(
        &self,
        token_hash: &str,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<(), Error> {
        sqlx::query(
            r#"
            UPDATE sessions SET ended_at = ?2, ended_reason = ?3
            WHERE token = ?1 AND ended_at IS NULL
            "#,
        )
        .bind(token_hash)
        .bind(at.timestamp())
        .bind(reason.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn end_all_for_account(
        &self,
        account_id: &AccountId,
        except_token_hash: Option<&str>,
        reason: EndReason,
        at: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET ended_at = ?2, ended_reason = ?3
            WHERE account_id = ?1
              AND ended_at IS NULL
              AND (?4 IS NULL OR token != ?4)
            "#,
        )
        .bind(account_id.as_str())
        .bind(at.timestamp())
        .bind(reason.as_str())
        .bind(except_token_hash)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected())
    }

    async fn active_standard_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE account_id = ?1
              AND remember_me = 0
              AND ended_at IS NULL
              AND expires_at > ?2
            "#,
        )
        .bind(account_id.as_str())
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(count as u32)
    }

    async fn active_count(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<u32, Error> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM sessions
            WHERE account_id = ?1 AND ended_at IS NULL AND expires_at > ?2
            "#,
        )
        .bind(account_id.as_str())
        .bind(now.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(count as u32)
    }

    async fn find_active_for_account(
        &self,
        account_id: &AccountId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Session>, Error> {
        let rows = sqlx::query_as::<_, SqliteSession>(
            r#"
            SELECT * FROM sessions
            WHERE account_id = ?1 AND ended_at IS NULL AND expires_at > ?2
            ORDER BY created_at DESC
            "#,
        )
        .bind(account_id.as_str())
        .bind(now.timestamp())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        rows.into_iter().map(Session::try_from).collect()
    }

    async fn fingerprint_seen(
        &self,
        account_id: &AccountId,
        fingerprint: &DeviceFingerprint,
        since: DateTime<Utc>,
    ) -> Result<bool, Error> {
        let seen: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM sessions
                WHERE account_id = ?1 AND fingerprint = ?2 AND created_at >= ?3
            )
            "#,
        )
        .bind(account_id.as_str())
        .bind(fingerprint.as_str())
        .bind(since.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(seen)
    }

    async fn end_expired(&self, now: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query(
            r#"
            UPDATE sessions SET ended_at = ?1, ended_reason = ?2
            WHERE ended_at IS NULL AND expires_at <= ?1
            "#,
        )
        .bind(now.timestamp())
        .bind(EndReason::Expired.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected())
    }
}
