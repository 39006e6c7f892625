//! Per-namespace container usage from the Kubernetes metrics API

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::api::{Api, DynamicObject, ListParams};
use kube::core::GroupVersionKind;
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::ContainerUsage;

/// Source of per-container usage samples
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Usage of every container of every pod in `namespace`
    async fn namespace_metrics(&self, namespace: &str) -> Result<Vec<ContainerUsage>>;
}

#[derive(Debug, Deserialize)]
struct PodMetricsBody {
    #[serde(default)]
    containers: Vec<ContainerMetricsBody>,
}

#[derive(Debug, Deserialize)]
struct ContainerMetricsBody {
    name: String,
    #[serde(default)]
    usage: BTreeMap<String, Quantity>,
}

/// `metrics.k8s.io/v1beta1` client
pub struct MetricsServerClient {
    client: Client,
    resource: ApiResource,
}

impl MetricsServerClient {
    pub fn new(client: Client) -> Self {
        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "PodMetrics");
        Self {
            client,
            resource: ApiResource::from_gvk_with_plural(&gvk, "pods"),
        }
    }
}

#[async_trait]
impl MetricsSource for MetricsServerClient {
    async fn namespace_metrics(&self, namespace: &str) -> Result<Vec<ContainerUsage>> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &self.resource);

        let pods = api
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::Metrics {
                namespace: namespace.to_string(),
                message: e.to_string(),
            })?;

        let mut usage = Vec::new();
        for pod in &pods.items {
            usage.extend(container_usage(namespace, &pod.name_any(), &pod.data)?);
        }

        debug!(
            namespace = %namespace,
            pods = pods.items.len(),
            containers = usage.len(),
            "Fetched namespace metrics"
        );
        Ok(usage)
    }
}

/// Extract container samples from one `PodMetrics` body
pub(crate) fn container_usage(
    namespace: &str,
    pod_name: &str,
    data: &serde_json::Value,
) -> Result<Vec<ContainerUsage>> {
    let metrics_error = |message: String| Error::Metrics {
        namespace: namespace.to_string(),
        message,
    };

    let body: PodMetricsBody = serde_json::from_value(data.clone())
        .map_err(|e| metrics_error(format!("malformed metrics for pod {pod_name}: {e}")))?;

    body.containers
        .into_iter()
        .map(|container| -> Result<ContainerUsage> {
            let mut usage = container.usage;
            let missing = |resource: &str| {
                metrics_error(format!(
                    "container {}/{} reports no {resource} usage",
                    pod_name, container.name
                ))
            };
            let cpu = usage.remove("cpu").ok_or_else(|| missing("cpu"))?;
            let memory = usage.remove("memory").ok_or_else(|| missing("memory"))?;
            Ok(ContainerUsage {
                pod_name: pod_name.to_string(),
                container_name: container.name.clone(),
                cpu,
                memory,
            })
        })
        .collect()
}
