//! SQLite implementation of the threat repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use palisade_core::{
    Error,
    error::StorageError,
    events::{MitigationAction, ThreatLevel, ThreatRecord, ThreatType},
    repositories::{IpReputation, ThreatRepository},
};

pub struct SqliteThreatRepository {
    pool: SqlitePool,
}

impl SqliteThreatRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Internal struct for query results
#[derive(Debug, Clone, sqlx::FromRow)]
struct SqliteThreatRecord {
    id: String,
    ip_address: String,
    threat_type: String,
    level: String,
    first_seen: i64,
    last_seen: i64,
    frequency: i64,
    mitigated: bool,
    mitigation: Option<String>,
}

impl TryFrom<SqliteThreatRecord> for ThreatRecord {
    type Error = Error;

    fn try_from(row: SqliteThreatRecord) -> Result<Self, Error> {
        Ok(ThreatRecord {
            id: row.id,
            ip_address: row.ip_address,
            threat_type: row.threat_type.parse()?,
            level: row.level.parse()?,
            first_seen: DateTime::from_timestamp(row.first_seen, 0).expect("Invalid timestamp"),
            last_seen: DateTime::from_timestamp(row.last_seen, 0).expect("Invalid timestamp"),
            frequency: row.frequency as u32,
            mitigated: row.mitigated,
            mitigation: row
                .mitigation
                .as_deref()
                .map(|s| s.parse::<MitigationAction>())
                .transpose()?,
        })
    }
}

#[async_trait]
impl ThreatRepository for SqliteThreatRepository {
    async fn upsert(
        &self,
        ip_address: &str,
        threat_type: ThreatType,
        level: ThreatLevel,
    ) -> Result<ThreatRecord, Error> {
        let template = ThreatRecord::new(ip_address.to_string(), threat_type, level);

        // One statement: first sight inserts, repeats bump the counter and
        // the last-seen stamp on the existing record
        let row = sqlx::query_as::<_, SqliteThreatRecord>(
            r#"
            INSERT INTO threat_records
                (id, ip_address, threat_type, level, first_seen, last_seen, frequency)
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
            ON CONFLICT(ip_address, threat_type) DO UPDATE SET
                frequency = frequency + 1,
                last_seen = excluded.last_seen
            RETURNING *
            "#,
        )
        .bind(&template.id)
        .bind(ip_address)
        .bind(threat_type.as_str())
        .bind(level.as_str())
        .bind(template.first_seen.timestamp())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Failed to upsert threat record");
            StorageError::Database("Failed to upsert threat record".to_string())
        })?;

        row.try_into()
    }

    async fn find_by_ip(&self, ip_address: &str) -> Result<Vec<ThreatRecord>, Error> {
        let rows = sqlx::query_as::<_, SqliteThreatRecord>(
            "SELECT * FROM threat_records WHERE ip_address = ?1 ORDER BY last_seen DESC",
        )
        .bind(ip_address)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        rows.into_iter().map(ThreatRecord::try_from).collect()
    }

    async fn mitigate(&self, id: &str, action: MitigationAction) -> Result<(), Error> {
        let result = sqlx::query(
            "UPDATE threat_records SET mitigated = 1, mitigation = ?2 WHERE id = ?1",
        )
        .bind(id)
        .bind(action.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound.into());
        }
        Ok(())
    }

    async fn add_to_blacklist(&self, ip_address: &str, reason: &str) -> Result<(), Error> {
        sqlx::query(
            r#"
            INSERT INTO ip_blacklist (ip_address, reason, created_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(ip_address) DO UPDATE SET reason = excluded.reason
            "#,
        )
        .bind(ip_address)
        .bind(reason)
        .bind(Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(())
    }

    async fn is_blacklisted(&self, ip_address: &str) -> Result<bool, Error> {
        let listed: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM ip_blacklist WHERE ip_address = ?1)")
                .bind(ip_address)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(listed)
    }

    async fn reputation(&self, ip_address: &str) -> Result<IpReputation, Error> {
        let blacklisted = self.is_blacklisted(ip_address).await?;

        let active_threats: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM threat_records WHERE ip_address = ?1 AND mitigated = 0",
        )
        .bind(ip_address)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Storage(StorageError::Database(e.to_string())))?;

        Ok(IpReputation {
            blacklisted,
            active_threats: active_threats as u32,
        })
    }
}
