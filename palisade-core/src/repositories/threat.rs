//! Repository trait for threat records and the IP blacklist.

use async_trait::async_trait;

use crate::{
    Error,
    events::{MitigationAction, ThreatLevel, ThreatRecord, ThreatType},
};

/// What the reputation store knows about a source IP.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IpReputation {
    /// The IP is explicitly blacklisted.
    pub blacklisted: bool,
    /// Number of unmitigated threat records for the IP.
    pub active_threats: u32,
}

impl IpReputation {
    /// Whether the IP should be treated as hostile.
    pub fn is_flagged(&self) -> bool {
        self.blacklisted || self.active_threats > 0
    }
}

/// Repository for threat records and the IP blacklist.
#[async_trait]
pub trait ThreatRepository: Send + Sync + 'static {
    /// Record a detection for an IP.
    ///
    /// Creates the record on first sight; on repeats of the same threat
    /// type, increments `frequency` and advances `last_seen`. Returns the
    /// record as stored.
    async fn upsert(
        &self,
        ip_address: &str,
        threat_type: ThreatType,
        level: ThreatLevel,
    ) -> Result<ThreatRecord, Error>;

    /// All threat records for an IP, newest first.
    async fn find_by_ip(&self, ip_address: &str) -> Result<Vec<ThreatRecord>, Error>;

    /// Close a threat record with an explicit mitigation. The record stays;
    /// only its mitigated state changes.
    async fn mitigate(&self, id: &str, action: MitigationAction) -> Result<(), Error>;

    /// Add an IP to the blacklist.
    async fn add_to_blacklist(&self, ip_address: &str, reason: &str) -> Result<(), Error>;

    /// Whether an IP is blacklisted.
    async fn is_blacklisted(&self, ip_address: &str) -> Result<bool, Error>;

    /// Combined blacklist/threat view for an IP.
    async fn reputation(&self, ip_address: &str) -> Result<IpReputation, Error>;
}
