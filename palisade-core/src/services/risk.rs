//! Heuristic risk scoring for authentication events.
//!
//! The engine is a deterministic rule sum, not a probability model: each
//! indicator that holds contributes its fixed weight, the total is capped
//! at 100, and the level falls out of fixed bands. It is advisory: a high
//! score never blocks a login by itself; the only mandatory side effect is
//! the score the caller writes into the audit record.
//!
//! Reputation lookups are injected behind [`ReputationLookup`] and degrade
//! gracefully: an unavailable collaborator means "unknown", never an
//! authentication failure.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{
    Error,
    account::AccountId,
    events::SecurityEventType,
    repositories::{AuditRepository, IpReputation, SessionRepository, ThreatRepository},
    session::DeviceFingerprint,
};

/// Weights and thresholds for the rule sum.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Weight for a fingerprint unseen within the lookback window.
    pub new_device_weight: u8,
    /// Weight for a missing or anomalously short user agent.
    pub short_user_agent_weight: u8,
    /// Weight for login velocity above the threshold.
    pub velocity_weight: u8,
    /// Weight for a blacklisted or threat-flagged source IP.
    pub flagged_ip_weight: u8,

    /// A user agent shorter than this is anomalous.
    pub min_user_agent_length: usize,
    /// Login attempts per window above which velocity is flagged.
    pub velocity_threshold: u64,
    /// Window for the velocity count.
    pub velocity_window: chrono::Duration,
    /// How far back a fingerprint counts as "seen before".
    pub fingerprint_lookback: chrono::Duration,

    /// Scores below this are low.
    pub medium_band: u8,
    /// Scores above this are high.
    pub high_band: u8,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            new_device_weight: 25,
            short_user_agent_weight: 15,
            velocity_weight: 20,
            flagged_ip_weight: 60,
            min_user_agent_length: 10,
            velocity_threshold: 10,
            velocity_window: chrono::Duration::hours(1),
            fingerprint_lookback: chrono::Duration::days(30),
            medium_band: 25,
            high_band: 60,
        }
    }
}

/// One triggered heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskIndicator {
    NewDevice,
    ShortUserAgent,
    HighVelocity,
    FlaggedSourceIp,
}

impl RiskIndicator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskIndicator::NewDevice => "new_device",
            RiskIndicator::ShortUserAgent => "short_user_agent",
            RiskIndicator::HighVelocity => "high_velocity",
            RiskIndicator::FlaggedSourceIp => "flagged_source_ip",
        }
    }
}

/// Banded risk level derived from the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

/// The authentication event under assessment.
#[derive(Debug, Clone)]
pub struct LoginEvent {
    pub account_id: AccountId,
    pub fingerprint: DeviceFingerprint,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Outcome of a scoring pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Rule sum, capped at 100.
    pub score: u8,
    pub indicators: Vec<RiskIndicator>,
    pub level: RiskLevel,
}

impl RiskAssessment {
    pub fn is_high(&self) -> bool {
        self.level == RiskLevel::High
    }
}

/// Injected reputation collaborator.
///
/// Implementations may consult external services; failures must be
/// returned (not panicked) so the engine can degrade to "unknown".
#[async_trait]
pub trait ReputationLookup: Send + Sync + 'static {
    async fn lookup(&self, ip_address: &str) -> Result<IpReputation, Error>;
}

/// Reputation lookup backed by the local threat store.
pub struct ThreatStoreReputation<T: ThreatRepository> {
    threats: Arc<T>,
}

impl<T: ThreatRepository> ThreatStoreReputation<T> {
    pub fn new(threats: Arc<T>) -> Self {
        Self { threats }
    }
}

#[async_trait]
impl<T: ThreatRepository> ReputationLookup for ThreatStoreReputation<T> {
    async fn lookup(&self, ip_address: &str) -> Result<IpReputation, Error> {
        self.threats.reputation(ip_address).await
    }
}

/// Service computing risk assessments for login events.
pub struct RiskEngine<S: SessionRepository, E: AuditRepository, R: ReputationLookup> {
    sessions: Arc<S>,
    audit_store: Arc<E>,
    reputation: Arc<R>,
    config: RiskConfig,
}

impl<S: SessionRepository, E: AuditRepository, R: ReputationLookup> RiskEngine<S, E, R> {
    pub fn new(
        sessions: Arc<S>,
        audit_store: Arc<E>,
        reputation: Arc<R>,
        config: RiskConfig,
    ) -> Self {
        Self {
            sessions,
            audit_store,
            reputation,
            config,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Score a login event.
    ///
    /// Indicators are evaluated independently; a collaborator failure
    /// skips its indicator with a warning rather than erroring the login.
    pub async fn score(&self, event: &LoginEvent) -> RiskAssessment {
        let now = Utc::now();
        let mut indicators = Vec::new();

        match self
            .sessions
            .fingerprint_seen(
                &event.account_id,
                &event.fingerprint,
                now - self.config.fingerprint_lookback,
            )
            .await
        {
            Ok(seen) => {
                if !seen {
                    indicators.push(RiskIndicator::NewDevice);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Fingerprint lookup failed; skipping new-device indicator");
            }
        }

        let agent_len = event.user_agent.as_deref().map(str::len).unwrap_or(0);
        if agent_len < self.config.min_user_agent_length {
            indicators.push(RiskIndicator::ShortUserAgent);
        }

        match self
            .audit_store
            .count_for_account(
                &event.account_id,
                &[
                    SecurityEventType::LoginSuccess,
                    SecurityEventType::LoginFailure,
                ],
                now - self.config.velocity_window,
            )
            .await
        {
            Ok(attempts) => {
                if attempts > self.config.velocity_threshold {
                    indicators.push(RiskIndicator::HighVelocity);
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "Velocity lookup failed; skipping velocity indicator");
            }
        }

        if let Some(ip) = event.ip_address.as_deref() {
            match self.reputation.lookup(ip).await {
                Ok(reputation) => {
                    if reputation.is_flagged() {
                        indicators.push(RiskIndicator::FlaggedSourceIp);
                    }
                }
                Err(e) => {
                    // Collaborator unavailable: reputation is unknown, not hostile
                    tracing::warn!(error = %e, ip = %ip, "Reputation lookup failed; skipping IP indicator");
                }
            }
        }

        let score = self.score_for(&indicators);
        let level = self.level_for(score);

        RiskAssessment {
            score,
            indicators,
            level,
        }
    }

    fn score_for(&self, indicators: &[RiskIndicator]) -> u8 {
        let total: u32 = indicators
            .iter()
            .map(|indicator| {
                u32::from(match indicator {
                    RiskIndicator::NewDevice => self.config.new_device_weight,
                    RiskIndicator::ShortUserAgent => self.config.short_user_agent_weight,
                    RiskIndicator::HighVelocity => self.config.velocity_weight,
                    RiskIndicator::FlaggedSourceIp => self.config.flagged_ip_weight,
                })
            })
            .sum();

        total.min(100) as u8
    }

    fn level_for(&self, score: u8) -> RiskLevel {
        if score < self.config.medium_band {
            RiskLevel::Low
        } else if score <= self.config.high_band {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}
