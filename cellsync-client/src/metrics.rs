//! Per-RPC Prometheus metrics for the claim client.
//!
//! [`InstrumentedClient`] wraps any [`ClaimClient`], times each call and
//! records it in an [`RpcMetrics`] registry:
//!
//! - `topology_service_rpc_calls_total`: every call, `rpc_status = "OK"` on success
//! - `topology_service_failed_calls_total`: failures, with `error_type` from [`classify_error`]
//! - `topology_service_rpc_duration_seconds`: call latency histogram
//!
//! Every series carries `rpc_service`, `rpc_method`, `rpc_status`, `rpc_system`,
//! `cell_id` and `topology_service_address`. The inner result is always
//! returned unchanged.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use prometheus::proto::{LabelPair, MetricFamily};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use serde::Serialize;
use thiserror::Error;

use cellsync_core::{LeasePage, LeaseUuid};

use crate::client::{method, ClaimClient};
use crate::error::{ClientError, StatusCode};

const OK_STATUS: &str = "OK";

/// Transport family reported in the `rpc_system` label.
pub const RPC_SYSTEM: &str = "http";

pub const RPC_CALLS_TOTAL: &str = "topology_service_rpc_calls_total";
pub const FAILED_CALLS_TOTAL: &str = "topology_service_failed_calls_total";
pub const RPC_DURATION_SECONDS: &str = "topology_service_rpc_duration_seconds";

/// Latency buckets in seconds; the top bucket sits above the default 1s deadline.
pub const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0];

const CALL_LABELS: &[&str] = &[
    "rpc_service",
    "rpc_method",
    "rpc_status",
    "rpc_system",
    "cell_id",
    "topology_service_address",
];

const FAILURE_LABELS: &[&str] = &[
    "rpc_service",
    "rpc_method",
    "rpc_status",
    "rpc_system",
    "cell_id",
    "topology_service_address",
    "error_type",
];

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("failed to register metric: {0}")]
    Registration(#[from] prometheus::Error),

    #[error("failed to encode metrics: {0}")]
    Encoding(String),
}

/// Split `/package.Service/Method` into `("package.Service", "Method")`.
///
/// Anything else maps to `("unknown", "unknown")`.
pub fn split_rpc_path(path: &str) -> (&str, &str) {
    let parts: Vec<&str> = path.split('/').collect();
    match parts.as_slice() {
        ["", service, rpc] if !service.is_empty() && !rpc.is_empty() => (*service, *rpc),
        _ => ("unknown", "unknown"),
    }
}

/// Coarse failure class used as the `error_type` label.
pub fn classify_error(err: &ClientError) -> &'static str {
    match err {
        ClientError::DeadlineExceeded { .. } => "timeout",
        ClientError::Transport { .. } => "network_error",
        ClientError::Decode { .. } => "unknown_error",
        ClientError::Status { code, .. } => match code {
            StatusCode::DeadlineExceeded => "timeout",
            StatusCode::Unavailable => "unavailable",
            StatusCode::PermissionDenied => "permission_denied",
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::NotFound => "not_found",
            StatusCode::ResourceExhausted => "resource_exhausted",
            StatusCode::Cancelled => "cancelled",
            StatusCode::Internal | StatusCode::Unknown => "unknown_error",
        },
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Prometheus registry plus the three claim-client series.
///
/// Cheap to clone; clones share the same underlying counters.
#[derive(Clone)]
pub struct RpcMetrics {
    registry: Registry,
    rpc_calls_total: IntCounterVec,
    failed_calls_total: IntCounterVec,
    rpc_duration: HistogramVec,
    cell_id: String,
    address: String,
}

impl RpcMetrics {
    /// Create a fresh registry for one cell talking to one service address.
    pub fn new(
        cell_id: impl Into<String>,
        topology_service_address: impl Into<String>,
    ) -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let rpc_calls_total = IntCounterVec::new(
            Opts::new(RPC_CALLS_TOTAL, "Total number of RPC calls"),
            CALL_LABELS,
        )?;
        registry.register(Box::new(rpc_calls_total.clone()))?;

        let failed_calls_total = IntCounterVec::new(
            Opts::new(FAILED_CALLS_TOTAL, "Total number of failed RPC calls"),
            FAILURE_LABELS,
        )?;
        registry.register(Box::new(failed_calls_total.clone()))?;

        let rpc_duration = HistogramVec::new(
            HistogramOpts::new(RPC_DURATION_SECONDS, "RPC call duration in seconds")
                .buckets(DURATION_BUCKETS.to_vec()),
            CALL_LABELS,
        )?;
        registry.register(Box::new(rpc_duration.clone()))?;

        Ok(Self {
            registry,
            rpc_calls_total,
            failed_calls_total,
            rpc_duration,
            cell_id: cell_id.into(),
            address: topology_service_address.into(),
        })
    }

    pub fn cell_id(&self) -> &str {
        &self.cell_id
    }

    pub fn topology_service_address(&self) -> &str {
        &self.address
    }

    /// Record one finished call of `rpc_path`.
    pub fn observe(&self, rpc_path: &str, elapsed: Duration, result: Result<(), &ClientError>) {
        let (service, rpc) = split_rpc_path(rpc_path);
        let status = match result {
            Ok(()) => OK_STATUS,
            Err(err) => err.status_code().as_str(),
        };
        let labels = [
            service,
            rpc,
            status,
            RPC_SYSTEM,
            self.cell_id.as_str(),
            self.address.as_str(),
        ];

        self.rpc_calls_total.with_label_values(&labels).inc();
        self.rpc_duration
            .with_label_values(&labels)
            .observe(elapsed.as_secs_f64());
        if let Err(err) = result {
            let [service, rpc, status, system, cell_id, address] = labels;
            self.failed_calls_total
                .with_label_values(&[
                    service,
                    rpc,
                    status,
                    system,
                    cell_id,
                    address,
                    classify_error(err),
                ])
                .inc();
        }
    }

    /// Prometheus text exposition of every series.
    pub fn encode_text(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| MetricsError::Encoding(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| MetricsError::Encoding(e.to_string()))
    }

    /// Point-in-time copy of the registry, for JSON output and assertions.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut snapshot = MetricsSnapshot::default();
        for family in self.registry.gather() {
            collect_family(&family, &mut snapshot);
        }
        snapshot
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallCount {
    pub service: String,
    pub method: String,
    pub status: String,
    pub cell_id: String,
    pub topology_service_address: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureCount {
    pub method: String,
    pub status: String,
    pub error_type: String,
    pub count: u64,
}

/// Histogram totals for one method, summed across statuses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LatencySummary {
    pub count: u64,
    pub sum_seconds: f64,
}

/// Gathered view of the registry, sorted by label values.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub calls: Vec<CallCount>,
    pub failures: Vec<FailureCount>,
    pub durations: BTreeMap<String, LatencySummary>,
}

impl MetricsSnapshot {
    /// Calls for `method` with `status`, 0 when never seen.
    pub fn calls_for(&self, method: &str, status: &str) -> u64 {
        self.calls
            .iter()
            .filter(|c| c.method == method && c.status == status)
            .map(|c| c.count)
            .sum()
    }

    pub fn failures_for(&self, method: &str, error_type: &str) -> u64 {
        self.failures
            .iter()
            .filter(|f| f.method == method && f.error_type == error_type)
            .map(|f| f.count)
            .sum()
    }
}

fn label<'a>(pairs: &'a [LabelPair], name: &str) -> &'a str {
    pairs
        .iter()
        .find(|pair| pair.get_name() == name)
        .map(LabelPair::get_value)
        .unwrap_or_default()
}

fn collect_family(family: &MetricFamily, snapshot: &mut MetricsSnapshot) {
    for metric in family.get_metric() {
        let labels = metric.get_label();
        match family.get_name() {
            RPC_CALLS_TOTAL => snapshot.calls.push(CallCount {
                service: label(labels, "rpc_service").to_string(),
                method: label(labels, "rpc_method").to_string(),
                status: label(labels, "rpc_status").to_string(),
                cell_id: label(labels, "cell_id").to_string(),
                topology_service_address: label(labels, "topology_service_address").to_string(),
                count: metric.get_counter().get_value() as u64,
            }),
            FAILED_CALLS_TOTAL => snapshot.failures.push(FailureCount {
                method: label(labels, "rpc_method").to_string(),
                status: label(labels, "rpc_status").to_string(),
                error_type: label(labels, "error_type").to_string(),
                count: metric.get_counter().get_value() as u64,
            }),
            RPC_DURATION_SECONDS => {
                let histogram = metric.get_histogram();
                let entry = snapshot
                    .durations
                    .entry(label(labels, "rpc_method").to_string())
                    .or_default();
                entry.count += histogram.get_sample_count();
                entry.sum_seconds += histogram.get_sample_sum();
            }
            _ => {}
        }
    }
}

// ---------------------------------------------------------------------------
// Decorator
// ---------------------------------------------------------------------------

/// A [`ClaimClient`] that records every call in [`RpcMetrics`].
pub struct InstrumentedClient<C> {
    inner: C,
    metrics: RpcMetrics,
}

impl<C: ClaimClient> InstrumentedClient<C> {
    pub fn new(inner: C, metrics: RpcMetrics) -> Self {
        Self { inner, metrics }
    }

    pub fn metrics(&self) -> &RpcMetrics {
        &self.metrics
    }

    fn instrument<T>(
        &self,
        rpc_path: &'static str,
        call: impl FnOnce(&C) -> Result<T, ClientError>,
    ) -> Result<T, ClientError> {
        let started = Instant::now();
        let result = call(&self.inner);
        let elapsed = started.elapsed();

        match &result {
            Ok(_) => self.metrics.observe(rpc_path, elapsed, Ok(())),
            Err(err) => {
                self.metrics.observe(rpc_path, elapsed, Err(err));
                tracing::debug!(
                    rpc = rpc_path,
                    cell_id = %self.metrics.cell_id(),
                    address = %self.metrics.topology_service_address(),
                    status = err.status_code().as_str(),
                    error_type = classify_error(err),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "claim rpc failed"
                );
            }
        }
        result
    }
}

impl<C: ClaimClient> ClaimClient for InstrumentedClient<C> {
    fn list_leases(
        &self,
        cursor: Option<&str>,
        limit: usize,
        deadline: Duration,
    ) -> Result<LeasePage, ClientError> {
        self.instrument(method::LIST_LEASES, |inner| {
            inner.list_leases(cursor, limit, deadline)
        })
    }

    fn commit_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        self.instrument(method::COMMIT_UPDATE, |inner| {
            inner.commit_update(uuid, deadline)
        })
    }

    fn rollback_update(&self, uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
        self.instrument(method::ROLLBACK_UPDATE, |inner| {
            inner.rollback_update(uuid, deadline)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ScriptedClient {
        commit: fn(&LeaseUuid) -> Result<(), ClientError>,
    }

    impl ClaimClient for ScriptedClient {
        fn list_leases(
            &self,
            _cursor: Option<&str>,
            _limit: usize,
            _deadline: Duration,
        ) -> Result<LeasePage, ClientError> {
            Ok(LeasePage::default())
        }

        fn commit_update(&self, uuid: &LeaseUuid, _deadline: Duration) -> Result<(), ClientError> {
            (self.commit)(uuid)
        }

        fn rollback_update(&self, _uuid: &LeaseUuid, deadline: Duration) -> Result<(), ClientError> {
            Err(ClientError::DeadlineExceeded {
                method: method::ROLLBACK_UPDATE,
                deadline,
            })
        }
    }

    fn unavailable_for_b(uuid: &LeaseUuid) -> Result<(), ClientError> {
        if uuid.as_str() == "b" {
            Err(ClientError::Status {
                method: method::COMMIT_UPDATE,
                code: StatusCode::Unavailable,
                message: "Service unavailable".to_string(),
            })
        } else {
            Ok(())
        }
    }

    #[test]
    fn splits_service_and_method() {
        assert_eq!(
            split_rpc_path("/proto.CellService/GetCellInfo"),
            ("proto.CellService", "GetCellInfo")
        );
        assert_eq!(split_rpc_path("invalid"), ("unknown", "unknown"));
        assert_eq!(split_rpc_path("/only-service/"), ("unknown", "unknown"));
    }

    #[test]
    fn classifies_every_error_shape() {
        let status = |code| ClientError::Status {
            method: method::COMMIT_UPDATE,
            code,
            message: String::new(),
        };
        assert_eq!(classify_error(&status(StatusCode::DeadlineExceeded)), "timeout");
        assert_eq!(classify_error(&status(StatusCode::Unavailable)), "unavailable");
        assert_eq!(
            classify_error(&status(StatusCode::PermissionDenied)),
            "permission_denied"
        );
        assert_eq!(
            classify_error(&status(StatusCode::InvalidArgument)),
            "invalid_argument"
        );
        assert_eq!(classify_error(&status(StatusCode::NotFound)), "not_found");
        assert_eq!(
            classify_error(&status(StatusCode::ResourceExhausted)),
            "resource_exhausted"
        );
        assert_eq!(classify_error(&status(StatusCode::Cancelled)), "cancelled");
        assert_eq!(classify_error(&status(StatusCode::Internal)), "unknown_error");
        assert_eq!(
            classify_error(&ClientError::Transport {
                method: method::LIST_LEASES,
                message: "connection refused".to_string(),
            }),
            "network_error"
        );
        assert_eq!(
            classify_error(&ClientError::DeadlineExceeded {
                method: method::LIST_LEASES,
                deadline: Duration::from_secs(1),
            }),
            "timeout"
        );
    }

    fn metrics() -> RpcMetrics {
        RpcMetrics::new("1", "localhost:50051").expect("register metrics")
    }

    #[test]
    fn records_success_and_failure_counters() {
        let client = InstrumentedClient::new(
            ScriptedClient {
                commit: unavailable_for_b,
            },
            metrics(),
        );
        let deadline = Duration::from_secs(1);

        client.commit_update(&LeaseUuid::from("a"), deadline).expect("commit a");
        let err = client
            .commit_update(&LeaseUuid::from("b"), deadline)
            .unwrap_err();
        assert_eq!(err.status_code(), StatusCode::Unavailable);
        client.rollback_update(&LeaseUuid::from("c"), deadline).unwrap_err();
        client.list_leases(None, 10, deadline).expect("list");

        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.calls_for("CommitUpdate", "OK"), 1);
        assert_eq!(snapshot.calls_for("CommitUpdate", "UNAVAILABLE"), 1);
        assert_eq!(snapshot.calls_for("RollbackUpdate", "DEADLINE_EXCEEDED"), 1);
        assert_eq!(snapshot.calls_for("ListLeases", "OK"), 1);
        assert_eq!(snapshot.failures_for("CommitUpdate", "unavailable"), 1);
        assert_eq!(snapshot.failures_for("RollbackUpdate", "timeout"), 1);
        assert_eq!(snapshot.failures_for("ListLeases", "unavailable"), 0);
        assert_eq!(snapshot.durations["CommitUpdate"].count, 2);
        assert!(snapshot.calls.iter().all(|c| c.service == "proto.ClaimService"
            && c.cell_id == "1"
            && c.topology_service_address == "localhost:50051"));
    }

    #[test]
    fn text_exposition_carries_full_label_set() {
        let metrics = metrics();
        let failure = ClientError::Status {
            method: method::COMMIT_UPDATE,
            code: StatusCode::Unavailable,
            message: "Service unavailable".to_string(),
        };
        metrics.observe(method::COMMIT_UPDATE, Duration::from_millis(500), Err(&failure));

        let text = metrics.encode_text().expect("encode");
        assert!(text.contains("# TYPE topology_service_rpc_duration_seconds histogram"));
        assert!(text.contains("topology_service_rpc_duration_seconds_bucket{"));
        assert!(text.contains("topology_service_rpc_duration_seconds_sum{"));
        let failed = text
            .lines()
            .find(|line| line.starts_with("topology_service_failed_calls_total{"))
            .expect("failed calls series");
        for pair in [
            r#"rpc_service="proto.ClaimService""#,
            r#"rpc_method="CommitUpdate""#,
            r#"rpc_status="UNAVAILABLE""#,
            r#"rpc_system="http""#,
            r#"cell_id="1""#,
            r#"topology_service_address="localhost:50051""#,
            r#"error_type="unavailable""#,
        ] {
            assert!(failed.contains(pair), "missing {pair} in {failed}");
        }
        assert!(failed.ends_with(" 1"));

        let latency = metrics.snapshot().durations["CommitUpdate"];
        assert_eq!(latency.count, 1);
        assert!((latency.sum_seconds - 0.5).abs() < 1e-9);
    }

    #[test]
    fn unparseable_rpc_path_is_recorded_as_unknown() {
        let metrics = metrics();
        metrics.observe("invalid", Duration::from_millis(3), Ok(()));
        assert_eq!(metrics.snapshot().calls_for("unknown", "OK"), 1);
    }
}
