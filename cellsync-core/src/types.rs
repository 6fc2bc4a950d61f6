//! Domain types shared by the lease store, the claim client and the
//! reconciliation engine.
//!
//! A lease exists in up to two places: the local store ([`OutstandingLease`])
//! and the Topology Service ([`RemoteLease`]). The [`LeaseUuid`] is the join key.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Opaque lease identifier, shared by the local and remote representations.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LeaseUuid(pub String);

impl LeaseUuid {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for LeaseUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for LeaseUuid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for LeaseUuid {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Lease records
// ---------------------------------------------------------------------------

/// A lease row held by this cell's local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutstandingLease {
    pub uuid: LeaseUuid,
    pub updated_at: DateTime<Utc>,
    /// Whatever the owning cell needs to resume work. Never read by reconciliation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl OutstandingLease {
    pub fn new(uuid: impl Into<LeaseUuid>, updated_at: DateTime<Utc>) -> Self {
        Self {
            uuid: uuid.into(),
            updated_at,
            payload: None,
        }
    }
}

/// A lease as reported by the Topology Service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteLease {
    pub uuid: LeaseUuid,
    pub updated_at: DateTime<Utc>,
}

impl RemoteLease {
    pub fn new(uuid: impl Into<LeaseUuid>, updated_at: DateTime<Utc>) -> Self {
        Self {
            uuid: uuid.into(),
            updated_at,
        }
    }
}

/// One page of a cursor scan over remote leases.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeasePage {
    #[serde(default)]
    pub leases: Vec<RemoteLease>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,
}

impl LeasePage {
    /// The cursor for the following page, or `None` at end of scan.
    ///
    /// The service signals completion with either an absent or a blank cursor.
    pub fn next_cursor(&self) -> Option<&str> {
        self.next_cursor
            .as_deref()
            .filter(|cursor| !cursor.trim().is_empty())
    }
}

// ---------------------------------------------------------------------------
// Freshness
// ---------------------------------------------------------------------------

/// Where a lease sits on one axis of the reconciliation table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    /// Exists and was updated within the staleness threshold.
    Active,
    /// Exists and was updated before the staleness threshold.
    Stale,
    /// Not present in that store.
    Missing,
}

impl Freshness {
    /// Classify a (possibly absent) `updated_at` against `now - threshold`.
    ///
    /// Only timestamps strictly older than the cutoff are stale.
    pub fn classify(
        updated_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        threshold: Duration,
    ) -> Self {
        let Some(updated_at) = updated_at else {
            return Freshness::Missing;
        };
        if updated_at < cutoff_before(now, threshold) {
            Freshness::Stale
        } else {
            Freshness::Active
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Freshness::Active => write!(f, "active"),
            Freshness::Stale => write!(f, "stale"),
            Freshness::Missing => write!(f, "missing"),
        }
    }
}

/// `now - age`, saturating at the earliest representable instant.
pub fn cutoff_before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|age| now.checked_sub_signed(age))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ---------------------------------------------------------------------------
// Run summary
// ---------------------------------------------------------------------------

/// Aggregate counters returned by one reconciliation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileSummary {
    /// Remote leases whose page was classified.
    pub processed: u64,
    pub committed: u64,
    pub rolled_back: u64,
    /// Remote-active leases with no local row (still in flight elsewhere).
    pub pending: u64,
    pub orphaned: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
