//! SQLite implementation of the audit repository.
//!
//! Append-only by construction: the only destructive statement is the
//! retention purge, which never runs on the request path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use palisade_core::{
    Error,
    account::AccountId,
    error::StorageError,
    events::{SecurityEvent, SecurityEventType, Severity},
    repositories::{AuditQuery, AuditRepository},
};

pub struct SqliteAuditRepository {
    pool: SqlitePool,
}

impl SqliteAuditRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteSecurityEvent {
    id: String,
    event_type: String,
    severity: String,
    account_id: Option<String>,
    ip_address: Option<String>,
    user_agent: Option<String>,
    detail: String,
    risk_score: Option<i64>,
    created_at: i64,
}

impl TryFrom<SqliteSecurityEvent> for SecurityEvent {
    type Error = Error;

    fn try_from(row: SqliteSecurityEvent) -> Result<Self, Error> {
        Ok(SecurityEvent {
            id: row.id,
            event_type: row.event_type.parse()?,
            severity: row.severity.parse()?,
            account_id: row.account_id.as_deref().map(AccountId::new),
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            detail: serde_json::from_str(&row.detail)
                .unwrap_or(serde_json::Value::String(row.detail)),
            risk_score: row.risk_score.map(|score| score as u8),
            created_at: DateTime::from_timestamp(row.created_at, 0).expect("Invalid timestamp"),
        })
    }
}

#[async_trait]
impl AuditRepository for SqliteAuditRepository {
    async fn append(&self, event: &SecurityEvent) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO security_events
                (id, event_type, severity, account_id, ip_address, user_agent, detail, risk_score, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&event.id)
        .bind(event.event_type.as_str())
        .bind(event.severity.as_str())
        .bind(event.account_id.as_ref().map(|id| id.as_str().to_string()))
        .bind(&event.ip_address)
        .bind(&event.user_agent)
        .bind(event.detail.to_string())
        .bind(event.risk_score.map(i64::from))
        .bind(event.created_at.timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to append security event");
            StorageError::Database("Failed to append security event".to_string())
        })?;

        Ok(())
    }

    async fn query(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM security_events WHERE 1=1");

        if let Some(account_id) = &query.account_id {
            builder.push(" AND account_id = ");
            builder.push_bind(account_id.as_str().to_string());
        }
        if let Some(event_type) = query.event_type {
            builder.push(" AND event_type = ");
            builder.push_bind(event_type.as_str());
        }
        if let Some(severity) = query.severity {
            builder.push(" AND severity = ");
            builder.push_bind(severity.as_str());
        }
        if let Some(since) = query.since {
            builder.push(" AND created_at >= ");
            builder.push_bind(since.timestamp());
        }
        if let Some(until) = query.until {
            builder.push(" AND created_at < ");
            builder.push_bind(until.timestamp());
        }

        builder.push(" ORDER BY created_at DESC, id DESC");
        builder.push(" LIMIT ");
        builder.push_bind(query.limit.map(i64::from).unwrap_or(i64::MAX));
        builder.push(" OFFSET ");
        builder.push_bind(query.offset.map(i64::from).unwrap_or(0));

        let rows = builder
            .build_query_as::<SqliteSecurityEvent>()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        rows.into_iter().map(SecurityEvent::try_from).collect()
    }

    async fn count_for_account(
        &self,
        account_id: &AccountId,
        event_types: &[SecurityEventType],
        since: DateTime<Utc>,
    ) -> Result<u64, Error> {
        if event_types.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT COUNT(*) FROM security_events WHERE account_id = ");
        builder.push_bind(account_id.as_str().to_string());
        builder.push(" AND created_at >= ");
        builder.push_bind(since.timestamp());
        builder.push(" AND event_type IN (");
        {
            let mut separated = builder.separated(", ");
            for event_type in event_types {
                separated.push_bind(event_type.as_str());
            }
        }
        builder.push(")");

        let count: i64 = builder
            .build_query_scalar()
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(count as u64)
    }

    async fn purge_before(&self, horizon: DateTime<Utc>) -> Result<u64, Error> {
        let result = sqlx::query("DELETE FROM security_events WHERE created_at < ?1")
            .bind(horizon.timestamp())
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(result.rows_affected())
    }
}
