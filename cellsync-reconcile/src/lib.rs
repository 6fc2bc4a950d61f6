//! # cellsync-reconcile
//!
//! Heals drift between this cell's local lease store and the Topology Service.
//!
//! Build a [`Reconciler`] from a [`ClaimClient`](cellsync_client::ClaimClient),
//! a [`LeaseStore`](cellsync_core::LeaseStore) and a
//! [`ReconcileConfig`](cellsync_core::ReconcileConfig), then call
//! [`Reconciler::reconcile`] once per scheduled run.

pub mod classify;
pub mod engine;
pub mod error;
pub mod report;
pub mod sweeper;

#[cfg(test)]
mod test_store;

pub use classify::{action, plan_page, Action, PagePlan};
pub use engine::Reconciler;
pub use error::ReconcileError;
pub use report::{
    Failure, MemoryReporter, Operation, Reporter, Tee, TracingReporter,
};
