//! Repository trait for the append-only security audit log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    Error,
    account::AccountId,
    events::{SecurityEvent, SecurityEventType, Severity},
};

/// Filters and pagination for read-side audit reporting.
#[derive(Debug, Clone, Default)]
pub struct AuditQuery {
    pub account_id: Option<AccountId>,
    pub event_type: Option<SecurityEventType>,
    pub severity: Option<Severity>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl AuditQuery {
    pub fn for_account(account_id: AccountId) -> Self {
        Self {
            account_id: Some(account_id),
            ..Default::default()
        }
    }

    pub fn event_type(mut self, event_type: SecurityEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Repository for the security audit log.
///
/// Append-only: the trait intentionally exposes no update or delete.
/// Retention purging is a maintenance operation outside the request-serving
/// path, not a mutation of live rows.
#[async_trait]
pub trait AuditRepository: Send + Sync + 'static {
    /// Append one event.
    async fn append(&self, event: &SecurityEvent) -> Result<(), Error>;

    /// Query events for reporting, newest first.
    async fn query(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error>;

    /// Count events of the given types for an account since a cutoff.
    ///
    /// Used by the risk engine's velocity indicator.
    async fn count_for_account(
        &self,
        account_id: &AccountId,
        event_types: &[SecurityEventType],
        since: DateTime<Utc>,
    ) -> Result<u64, Error>;

    /// Purge events older than the horizon. Returns rows removed.
    async fn purge_before(&self, horizon: DateTime<Utc>) -> Result<u64, Error>;
}
