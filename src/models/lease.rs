//! Lease types and identifiers.

use super::Principal;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel access specifier granting access to every source.
pub const GLOBAL_ACCESS: &str = "global";

/// Ledger-assigned lease identifier.
///
/// The ledger is the identity authority: a lease id is never generated
/// locally unless the ledger adapter itself is local.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseId(String);

impl LeaseId {
    /// Creates a new lease ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the cache key for this lease.
    #[must_use]
    pub fn cache_key(&self) -> String {
        format!("lease:{}", self.0)
    }
}

impl fmt::Display for LeaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for LeaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LeaseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Scope of a lease: every source, or one named source.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum AccessSpecifier {
    /// Access to all of the principal's sources.
    Global,
    /// Access restricted to a single source.
    Source(String),
}

impl AccessSpecifier {
    /// Parses an access specifier.
    ///
    /// `global` (any case) maps to [`AccessSpecifier::Global`]; anything
    /// else names a source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the specifier is empty.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidInput(
                "access specifier cannot be empty".to_string(),
            ));
        }
        if trimmed.eq_ignore_ascii_case(GLOBAL_ACCESS) {
            Ok(Self::Global)
        } else {
            Ok(Self::Source(trimmed.to_string()))
        }
    }

    /// Returns the specifier as stored.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Global => GLOBAL_ACCESS,
            Self::Source(source) => source,
        }
    }

    /// Returns true for the global sentinel.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    /// Returns the restricted source, if any.
    #[must_use]
    pub fn source(&self) -> Option<&str> {
        match self {
            Self::Global => None,
            Self::Source(source) => Some(source),
        }
    }
}

impl fmt::Display for AccessSpecifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<AccessSpecifier> for String {
    fn from(spec: AccessSpecifier) -> Self {
        match spec {
            AccessSpecifier::Global => GLOBAL_ACCESS.to_string(),
            AccessSpecifier::Source(source) => source,
        }
    }
}

impl TryFrom<String> for AccessSpecifier {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

/// A time-boxed grant of an entity's access to a principal's memories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Ledger-assigned identifier.
    pub id: LeaseId,
    /// Owner of the memories.
    pub principal: Principal,
    /// External integration being granted access.
    pub entity: String,
    /// Scope of the grant.
    pub access_specifier: AccessSpecifier,
    /// Creation timestamp (Unix epoch seconds).
    pub created_at: u64,
    /// Expiry timestamp (Unix epoch seconds).
    pub expires_at: u64,
    /// Whether the lease has been revoked.
    pub revoked: bool,
    /// Revocation timestamp (Unix epoch seconds).
    pub revoked_at: Option<u64>,
    /// Ledger transaction that created the lease.
    pub creation_tx: String,
    /// Ledger transaction that revoked the lease.
    pub revocation_tx: Option<String>,
}

impl Lease {
    /// Returns true if the lease is unrevoked and unexpired at `now`.
    #[must_use]
    pub const fn is_active_at(&self, now: u64) -> bool {
        !self.revoked && self.expires_at > now
    }

    /// Returns true if the lease is active right now.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active_at(crate::current_timestamp())
    }

    /// Seconds until expiry, saturating at zero.
    #[must_use]
    pub const fn remaining_secs(&self, now: u64) -> u64 {
        self.expires_at.saturating_sub(now)
    }
}

/// A lease together with its evaluated activity flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaseStatus {
    /// The lease record.
    #[serde(flatten)]
    pub lease: Lease,
    /// Whether the lease was active when evaluated.
    pub is_active: bool,
}

impl LeaseStatus {
    /// Evaluates a lease at `now`.
    #[must_use]
    pub const fn evaluate(lease: Lease, now: u64) -> Self {
        let is_active = lease.is_active_at(now);
        Self { lease, is_active }
    }
}
