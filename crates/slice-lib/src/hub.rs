//! Forwarding of slice resource usage to the hub cluster
//!
//! The hub keeps one `WorkerSliceConfig` per slice and worker cluster in the
//! project namespace. Usage is written into that object's status so the hub
//! can aggregate it across clusters.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::ClusterResourceUsage;

/// Upstream sink for slice resource usage snapshots
#[async_trait]
pub trait UsagePublisher: Send + Sync {
    async fn publish_resource_usage(
        &self,
        slice_name: &str,
        usage: &ClusterResourceUsage,
    ) -> Result<()>;
}

/// Hub cluster client writing `WorkerSliceConfig` status
pub struct HubClient {
    client: Client,
    namespace: String,
    cluster_name: String,
    resource: ApiResource,
}

impl HubClient {
    /// `client` must point at the hub cluster; `namespace` is the project
    /// namespace holding this cluster's worker slice configs.
    pub fn new(client: Client, namespace: impl Into<String>, cluster_name: impl Into<String>) -> Self {
        let gvk = GroupVersionKind::gvk("worker.kubeslice.io", "v1alpha1", "WorkerSliceConfig");
        Self {
            client,
            namespace: namespace.into(),
            cluster_name: cluster_name.into(),
            resource: ApiResource::from_gvk_with_plural(&gvk, "workersliceconfigs"),
        }
    }

    pub fn worker_slice_config_name(&self, slice_name: &str) -> String {
        format!("{}-{}", slice_name, self.cluster_name)
    }
}

#[async_trait]
impl UsagePublisher for HubClient {
    async fn publish_resource_usage(
        &self,
        slice_name: &str,
        usage: &ClusterResourceUsage,
    ) -> Result<()> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), &self.namespace, &self.resource);
        let name = self.worker_slice_config_name(slice_name);

        api.patch_status(
            &name,
            &PatchParams::default(),
            &Patch::Merge(&resource_quota_patch(usage)),
        )
        .await
        .map_err(|e| Error::Publish {
            slice: slice_name.to_string(),
            message: format!("patching {}/{}: {}", self.namespace, name, e),
        })?;

        debug!(slice = %slice_name, worker_slice_config = %name, "Published resource usage");
        Ok(())
    }
}

/// Merge patch body carrying `usage` in the hub's status schema
pub(crate) fn resource_quota_patch(usage: &ClusterResourceUsage) -> serde_json::Value {
    let namespaces: Vec<_> = usage
        .per_namespace
        .iter()
        .map(|ns| {
            json!({
                "namespace": ns.namespace,
                "resourceUsage": {
                    "cpu": ns.usage.cpu,
                    "memory": ns.usage.memory,
                },
            })
        })
        .collect();

    json!({
        "status": {
            "workerSliceResourceQuotaStatus": {
                "clusterResourceQuotaStatus": {
                    "namespaceResourceQuotaStatus": namespaces,
                    "resourcesUsage": {
                        "cpu": usage.total.cpu,
                        "memory": usage.total.memory,
                    },
                }
            }
        }
    })
}
