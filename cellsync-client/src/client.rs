//! The claim RPC contract: method paths and the [`ClaimClient`] trait.

use std::time::Duration;

use cellsync_core::{LeasePage, LeaseUuid};

use crate::error::ClientError;

/// Fully-qualified name of the claim service.
pub const SERVICE: &str = "proto.ClaimService";

/// RPC paths, `/<service>/<method>`.
pub mod method {
    pub const LIST_LEASES: &str = "/proto.ClaimService/ListLeases";
    pub const COMMIT_UPDATE: &str = "/proto.ClaimService/CommitUpdate";
    pub const ROLLBACK_UPDATE: &str = "/proto.ClaimService/RollbackUpdate";
}

/// Remote operations consumed by reconciliation.
///
/// Every call carries an explicit deadline and must return once it elapses.
///
/// # Contract
///
/// - `list_leases` is a stable forward cursor scan: a uuid returned on one page
///   is never repeated on a later page of the same scan. An absent or blank
///   `next_cursor` ends the scan; a short page alone does not.
/// - `commit_update` and `rollback_update` are idempotent. Repeating either on
///   an already-committed, already-rolled-back or unknown lease leaves the
///   service unchanged, so overlapping runs may race on the same lease.
pub trait ClaimClient {
    fn list_leases(
        &self,
        cursor: Option<&str>,
        limit: usize,
        deadline: Duration,
    ) -> Result<LeasePage, ClientError>;

    fn commit_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError>;

    fn rollback_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError>;
}

impl<C: ClaimClient + ?Sized> ClaimClient for &C {
    fn list_leases(
        &self,
        cursor: Option<&str>,
        limit: usize,
        deadline: Duration,
    ) -> Result<LeasePage, ClientError> {
        (**self).list_leases(cursor, limit, deadline)
    }

    fn commit_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        (**self).commit_update(uuid, deadline)
    }

    fn rollback_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        (**self).rollback_update(uuid, deadline)
    }
}
