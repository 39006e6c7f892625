//! Slice resource usage reconciliation
//!
//! Usage of every namespace bound to a slice is summed and compared with the
//! last total stored on the slice. Only changes beyond the hysteresis band
//! (or transitions away from zero) are measured again in full and forwarded
//! to the hub; small drifts just advance `configUpdatedOn`.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::debug;

use super::{bounded, ReconcilerConfig};
use crate::error::Result;
use crate::health::components;
use crate::hub::UsagePublisher;
use crate::metrics_server::MetricsSource;
use crate::models::{ClusterResourceUsage, NamespaceUsage, Slice};
use crate::store::{SliceStore, WorkloadInventory};
use crate::units::{self, RawUsage, StoredUsage};

/// Result of one resource usage pass
#[derive(Debug, Clone, PartialEq)]
pub enum UsageOutcome {
    /// No namespace is bound to the slice; nothing was written
    NoNamespaces,
    /// Every bound namespace reported zero usage; nothing was written
    NoUsage,
    /// Usage stayed within the hysteresis band; only the timestamp advanced
    Suppressed { measured: StoredUsage },
    /// A fresh snapshot was forwarded to the hub and stored
    Published(ClusterResourceUsage),
}

pub struct ResourceUsageReconciler {
    store: Arc<dyn SliceStore>,
    inventory: Arc<dyn WorkloadInventory>,
    metrics: Arc<dyn MetricsSource>,
    publisher: Arc<dyn UsagePublisher>,
    config: ReconcilerConfig,
}

impl ResourceUsageReconciler {
    pub fn new(
        store: Arc<dyn SliceStore>,
        inventory: Arc<dyn WorkloadInventory>,
        metrics: Arc<dyn MetricsSource>,
        publisher: Arc<dyn UsagePublisher>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            inventory,
            metrics,
            publisher,
            config,
        }
    }

    /// Measure the slice and, when the change warrants it, publish and store
    /// a new snapshot. `now` is stamped into `configUpdatedOn` on every pass
    /// that reaches the status write.
    pub async fn reconcile(&self, slice: &Slice, now: i64) -> Result<UsageOutcome> {
        let name = slice.name_any();
        let limit = self.config.call_timeout;

        let namespaces = self.slice_namespaces(&name).await?;
        if namespaces.is_empty() {
            debug!(slice = %name, "No namespaces bound to slice");
            return Ok(UsageOutcome::NoNamespaces);
        }

        let mut measured = RawUsage::default();
        for namespace in &namespaces {
            measured += self.namespace_usage(namespace).await?;
        }
        if measured.is_zero() {
            debug!(slice = %name, namespaces = namespaces.len(), "Slice namespaces report no usage");
            return Ok(UsageOutcome::NoUsage);
        }

        let mut current = bounded(components::SLICE_STORE, limit, self.store.get(&name)).await?;
        let status = current.status.get_or_insert_with(Default::default);

        let changed = match &status.resource_quota_status {
            None => true,
            Some(previous) => {
                let previous = StoredUsage::from_resource_usage(&previous.total)?;
                units::exceeds_hysteresis(&previous, &measured)
            }
        };

        let outcome = if changed {
            let usage = self.snapshot(&name).await?;
            status.resource_quota_status = Some(usage.clone());
            bounded(
                components::HUB,
                limit,
                self.publisher.publish_resource_usage(&name, &usage),
            )
            .await?;
            UsageOutcome::Published(usage)
        } else {
            UsageOutcome::Suppressed {
                measured: measured.stored(),
            }
        };

        status.config_updated_on = now;
        bounded(
            components::SLICE_STORE,
            limit,
            self.store.update_status(&current),
        )
        .await?;

        Ok(outcome)
    }

    /// Measure every bound namespace again and build the snapshot to publish
    async fn snapshot(&self, slice_name: &str) -> Result<ClusterResourceUsage> {
        let namespaces = self.slice_namespaces(slice_name).await?;

        let mut per_namespace = Vec::with_capacity(namespaces.len());
        let mut total = RawUsage::default();
        for namespace in namespaces {
            let usage = self.namespace_usage(&namespace).await?;
            total += usage;
            per_namespace.push(NamespaceUsage {
                namespace,
                usage: usage.stored().to_resource_usage(),
            });
        }

        Ok(ClusterResourceUsage {
            per_namespace,
            total: total.stored().to_resource_usage(),
        })
    }

    async fn slice_namespaces(&self, slice_name: &str) -> Result<Vec<String>> {
        bounded(
            components::SLICE_STORE,
            self.config.call_timeout,
            self.inventory.list_slice_namespaces(slice_name),
        )
        .await
    }

    async fn namespace_usage(&self, namespace: &str) -> Result<RawUsage> {
        let containers = bounded(
            components::METRICS_SERVER,
            self.config.call_timeout,
            self.metrics.namespace_metrics(namespace),
        )
        .await?;
        units::aggregate(&containers)
    }
}
