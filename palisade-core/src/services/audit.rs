//! Security audit log service.
//!
//! Every security-relevant event flows through [`AuditLogger::log`], which
//! must never fail on a legitimate request path: events are handed to a
//! background writer over an unbounded channel, the writer retries the
//! store a bounded number of times, and anything that still cannot be
//! persisted is reported through `tracing` as the fallback channel.
//! Authentication latency never depends on audit-store availability.
//!
//! The log is append-only: the public contract has no update or delete.
//! Retention purging is a maintenance operation driven by
//! [`AuditService::start_retention_task`], outside the request-serving
//! path.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};

use crate::{
    Error,
    account::AccountId,
    events::{SecurityEvent, SecurityEventType},
    repositories::{AuditQuery, AuditRepository},
};

/// How many times the writer retries a failed append before falling back
/// to the tracing channel.
const WRITE_ATTEMPTS: u32 = 3;

/// Delay between write retries.
const RETRY_DELAY: std::time::Duration = std::time::Duration::from_millis(50);

/// Retention settings for the audit log.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Events older than this are eligible for purging.
    pub retention_period: chrono::Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            retention_period: chrono::Duration::days(90),
        }
    }
}

enum AuditMessage {
    Event(Box<SecurityEvent>),
    Flush(oneshot::Sender<()>),
}

/// Cheap, clonable write handle to the audit log.
///
/// Handed to every service that records events. Logging is fire-and-forget
/// relative to the caller; durability is the writer task's problem.
#[derive(Clone)]
pub struct AuditLogger {
    tx: mpsc::UnboundedSender<AuditMessage>,
}

impl AuditLogger {
    /// Record an event. Never fails: if the writer is gone the event is
    /// reported on the fallback channel instead.
    pub fn log(&self, event: SecurityEvent) {
        if let Err(e) = self.tx.send(AuditMessage::Event(Box::new(event))) {
            let AuditMessage::Event(event) = e.0 else {
                return;
            };
            tracing::error!(
                event_type = %event.event_type,
                account_id = ?event.account_id,
                "Audit writer gone; event not persisted"
            );
        }
    }

    /// Wait until everything enqueued before this call has been written
    /// (or given up on). Used by orderly shutdown and tests.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(AuditMessage::Flush(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// A logger with no writer behind it. Events go straight to the
    /// tracing fallback. Intended for tests of services that only need a
    /// logger to exist.
    pub fn disconnected() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }
}

/// Service owning the audit writer task and the read-side reporting
/// surface.
pub struct AuditService<E: AuditRepository> {
    repository: Arc<E>,
    logger: AuditLogger,
    writer: tokio::task::JoinHandle<()>,
}

impl<E: AuditRepository> AuditService<E> {
    /// Create the service and spawn its writer task.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(repository: Arc<E>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(Self::run_writer(Arc::clone(&repository), rx));

        Self {
            repository,
            logger: AuditLogger { tx },
            writer,
        }
    }

    /// The write handle services log through.
    pub fn logger(&self) -> AuditLogger {
        self.logger.clone()
    }

    /// Query events for reporting, newest first.
    pub async fn query(&self, query: &AuditQuery) -> Result<Vec<SecurityEvent>, Error> {
        self.repository.query(query).await
    }

    /// Count events of the given types for an account since a cutoff.
    pub async fn count_for_account(
        &self,
        account_id: &AccountId,
        event_types: &[SecurityEventType],
        since: chrono::DateTime<Utc>,
    ) -> Result<u64, Error> {
        self.repository
            .count_for_account(account_id, event_types, since)
            .await
    }

    /// Purge events older than the retention horizon. Returns rows
    /// removed.
    pub async fn purge_expired(&self, config: &RetentionConfig) -> Result<u64, Error> {
        let horizon = Utc::now() - config.retention_period;
        self.repository.purge_before(horizon).await
    }

    /// Start the periodic retention task.
    ///
    /// Purges events past the retention horizon. Idempotent and safe to
    /// run concurrently with live traffic: it only touches rows already
    /// past their terminal condition.
    pub fn start_retention_task(
        &self,
        config: RetentionConfig,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) -> tokio::task::JoinHandle<()> {
        let repository = Arc::clone(&self.repository);

        const PURGE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

        tokio::spawn(async move {
            let mut interval_timer = tokio::time::interval(PURGE_INTERVAL);

            loop {
                tokio::select! {
                    _ = interval_timer.tick() => {
                        let horizon = Utc::now() - config.retention_period;
                        match repository.purge_before(horizon).await {
                            Ok(count) if count > 0 => {
                                tracing::info!(count = count, "Purged expired audit events");
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Failed to purge audit events");
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown.changed() => {
                        tracing::info!("Shutting down audit retention task");
                        break;
                    }
                }
            }
        })
    }

    async fn run_writer(repository: Arc<E>, mut rx: mpsc::UnboundedReceiver<AuditMessage>) {
        while let Some(message) = rx.recv().await {
            match message {
                AuditMessage::Event(event) => {
                    Self::write_with_retry(&repository, &event).await;
                }
                AuditMessage::Flush(ack) => {
                    let _ = ack.send(());
                }
            }
        }
    }

    async fn write_with_retry(repository: &Arc<E>, event: &SecurityEvent) {
        for attempt in 1..=WRITE_ATTEMPTS {
            match repository.append(event).await {
                Ok(()) => return,
                Err(e) if attempt < WRITE_ATTEMPTS => {
                    tracing::warn!(
                        error = %e,
                        attempt = attempt,
                        event_type = %event.event_type,
                        "Audit write failed, retrying"
                    );
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => {
                    // Fallback channel: the event is lost to the store but
                    // not to the operator.
                    tracing::error!(
                        error = %e,
                        event_type = %event.event_type,
                        account_id = ?event.account_id,
                        detail = %event.detail,
                        "Audit write failed after retries; event not persisted"
                    );
                }
            }
        }
    }
}

impl<E: AuditRepository> Drop for AuditService<E> {
    fn drop(&mut self) {
        self.writer.abort();
    }
}
