//! Typed client for the Topology Service claim RPCs.
//!
//! - [`ClaimClient`] — the contract the reconciliation engine consumes
//! - [`HttpClaimClient`] — JSON-over-HTTP transport with per-call deadlines
//! - [`InstrumentedClient`] — decorator feeding the Prometheus RPC metrics

mod client;
mod error;
pub mod http;
pub mod metrics;

pub use client::{method, ClaimClient, SERVICE};
pub use error::{ClientError, StatusCode};
pub use http::HttpClaimClient;
pub use metrics::{
    classify_error, split_rpc_path, InstrumentedClient, MetricsError, MetricsSnapshot, RpcMetrics,
};
