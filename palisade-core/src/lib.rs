//! Core functionality for the palisade project
//!
//! This crate contains the domain types, repository traits and services of
//! the authentication and session security subsystem: accounts with
//! embedded security state, sessions, the append-only security audit log,
//! threat records, and the services that drive credential validation,
//! lockout, two-factor challenges, session lifecycle, risk scoring and
//! password reset.
//!
//! Storage backends implement the traits in [`repositories`]; the HTTP
//! surface and the top-level coordinator live in their own crates.

pub mod account;
pub mod crypto;
pub mod error;
pub mod events;
pub mod id;
pub mod repositories;
pub mod services;
pub mod session;
pub mod validation;

pub use account::{Account, AccountId, AccountSummary, NewAccount, PrivilegeLevel};
pub use error::Error;
pub use events::{
    MitigationAction, SecurityEvent, SecurityEventType, Severity, ThreatLevel, ThreatRecord,
    ThreatType,
};
pub use repositories::RepositoryProvider;
pub use session::{DeviceFingerprint, EndReason, Session, SessionToken};
