//! Observability infrastructure for the slice operator
//!
//! Provides:
//! - Prometheus metrics (reconcile latency, connectivity updates, usage publishes, errors)
//! - Structured JSON logging of slice events with tracing

use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge,
    HistogramVec, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

use crate::error::Error;
use crate::models::ClusterResourceUsage;
use crate::reconciler::AppPodChange;
use crate::units::StoredUsage;

/// Reconciler labels used on per-reconciler metrics
pub mod reconcilers {
    pub const APP_POD: &str = "app_pod";
    pub const MEMBERSHIP: &str = "membership";
    pub const RESOURCE_USAGE: &str = "resource_usage";
}

/// Histogram buckets for reconcile passes (in seconds)
const LATENCY_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

static GLOBAL_METRICS: OnceLock<OperatorMetricsInner> = OnceLock::new();

struct OperatorMetricsInner {
    reconcile_latency_seconds: HistogramVec,
    reconcile_errors: IntCounterVec,
    app_pod_updates: IntCounterVec,
    usage_published: IntCounter,
    usage_suppressed: IntCounter,
    slices_tracked: IntGauge,
}

impl OperatorMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_latency_seconds: register_histogram_vec!(
                "slice_operator_reconcile_latency_seconds",
                "Time spent in one reconcile pass",
                &["reconciler"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),

            reconcile_errors: register_int_counter_vec!(
                "slice_operator_reconcile_errors_total",
                "Reconcile passes that ended in an error",
                &["reconciler", "component"]
            )
            .expect("Failed to register reconcile_errors_total"),

            app_pod_updates: register_int_counter_vec!(
                "slice_operator_app_pod_updates_total",
                "App pod connectivity changes committed to slice status",
                &["change"]
            )
            .expect("Failed to register app_pod_updates_total"),

            usage_published: register_int_counter!(
                "slice_operator_resource_usage_published_total",
                "Resource usage snapshots forwarded to the hub"
            )
            .expect("Failed to register resource_usage_published_total"),

            usage_suppressed: register_int_counter!(
                "slice_operator_resource_usage_suppressed_total",
                "Resource usage measurements held back by hysteresis"
            )
            .expect("Failed to register resource_usage_suppressed_total"),

            slices_tracked: register_int_gauge!(
                "slice_operator_slices_tracked",
                "Number of slices seen in the last controller tick"
            )
            .expect("Failed to register slices_tracked"),
        }
    }
}

/// Lightweight handle to the process-wide operator metrics.
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct OperatorMetrics {
    _private: (),
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl OperatorMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &OperatorMetricsInner {
        GLOBAL_METRICS.get_or_init(OperatorMetricsInner::new)
    }

    pub fn observe_reconcile_latency(&self, reconciler: &str, duration_secs: f64) {
        self.inner()
            .reconcile_latency_seconds
            .with_label_values(&[reconciler])
            .observe(duration_secs);
    }

    pub fn inc_reconcile_errors(&self, reconciler: &str, component: &str) {
        self.inner()
            .reconcile_errors
            .with_label_values(&[reconciler, component])
            .inc();
    }

    pub fn inc_app_pod_update(&self, change: &AppPodChange) {
        self.inner()
            .app_pod_updates
            .with_label_values(&[change.kind()])
            .inc();
    }

    pub fn inc_usage_published(&self) {
        self.inner().usage_published.inc();
    }

    pub fn inc_usage_suppressed(&self) {
        self.inner().usage_suppressed.inc();
    }

    pub fn set_slices_tracked(&self, count: i64) {
        self.inner().slices_tracked.set(count);
    }
}

/// Structured logger for slice events
///
/// Every line carries `event` and `cluster` so hub-side log pipelines can
/// join events from all worker clusters.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster_name: String,
}

impl StructuredLogger {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
        }
    }

    pub fn log_app_pod_change(&self, slice: &str, change: &AppPodChange) {
        match change {
            AppPodChange::Connected {
                pod_name,
                pod_namespace,
                mesh_ip,
                mesh_peer_ip,
                mesh_interface,
            } => {
                info!(
                    event = "app_pod_connected",
                    cluster = %self.cluster_name,
                    slice = %slice,
                    pod_name = %pod_name,
                    pod_namespace = %pod_namespace,
                    mesh_ip = %mesh_ip,
                    mesh_peer_ip = %mesh_peer_ip,
                    mesh_interface = %mesh_interface,
                    "App pod connected to slice"
                );
            }
            AppPodChange::Disconnected {
                pod_name,
                pod_namespace,
            } => {
                warn!(
                    event = "app_pod_disconnected",
                    cluster = %self.cluster_name,
                    slice = %slice,
                    pod_name = %pod_name,
                    pod_namespace = %pod_namespace,
                    "App pod no longer connected to slice router"
                );
            }
        }
    }

    pub fn log_membership_synced(&self, slice: &str, added: usize, removed: usize) {
        info!(
            event = "app_pods_synced",
            cluster = %self.cluster_name,
            slice = %slice,
            added = added,
            removed = removed,
            "App pod membership updated"
        );
    }

    pub fn log_usage_published(&self, slice: &str, usage: &ClusterResourceUsage) {
        info!(
            event = "resource_usage_published",
            cluster = %self.cluster_name,
            slice = %slice,
            namespaces = usage.per_namespace.len(),
            cpu = %usage.total.cpu.0,
            memory = %usage.total.memory.0,
            "Resource usage forwarded to hub"
        );
    }

    pub fn log_usage_suppressed(&self, slice: &str, measured: &StoredUsage) {
        info!(
            event = "resource_usage_suppressed",
            cluster = %self.cluster_name,
            slice = %slice,
            cpu_millicores = measured.cpu_millicores,
            memory_mib = measured.memory_mib,
            "Resource usage within hysteresis band"
        );
    }

    pub fn log_reconcile_failure(&self, slice: &str, reconciler: &str, error: &Error) {
        warn!(
            event = "reconcile_failed",
            cluster = %self.cluster_name,
            slice = %slice,
            reconciler = %reconciler,
            component = %error.component(),
            retryable = error.is_retryable(),
            error = %error,
            "Reconcile pass failed"
        );
    }

    pub fn log_startup(&self, version: &str) {
        info!(
            event = "operator_started",
            cluster = %self.cluster_name,
            operator_version = %version,
            "Slice operator started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "operator_shutdown",
            cluster = %self.cluster_name,
            reason = %reason,
            "Slice operator shutting down"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_metrics_handles_share_registry() {
        let metrics = OperatorMetrics::new();
        let clone = metrics.clone();

        metrics.observe_reconcile_latency(reconcilers::APP_POD, 0.002);
        clone.inc_reconcile_errors(reconcilers::RESOURCE_USAGE, "hub");
        clone.inc_app_pod_update(&AppPodChange::Disconnected {
            pod_name: "iperf-0".to_string(),
            pod_namespace: "iperf".to_string(),
        });
        metrics.inc_usage_published();
        metrics.inc_usage_suppressed();
        metrics.set_slices_tracked(3);

        let families = prometheus::gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "slice_operator_slices_tracked"));
    }

    #[test]
    fn test_structured_logger_creation() {
        let logger = StructuredLogger::new("worker-1");
        assert_eq!(logger.cluster_name, "worker-1");
    }
}
