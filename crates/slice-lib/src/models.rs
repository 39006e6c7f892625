//! Core data models for slice reconciliation

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Spec of a Slice. Slices are created by the hub; this controller only
/// maintains their status.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "networking.kubeslice.io",
    version = "v1beta1",
    kind = "Slice",
    plural = "slices",
    status = "SliceStatus",
    printcolumn = r#"{"name":"ConfigUpdatedOn","type":"integer","jsonPath":".status.configUpdatedOn"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SliceSpec {}

/// Observed state of a Slice
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SliceStatus {
    /// Workload pods believed to belong to the slice
    #[serde(default)]
    pub app_pods: Vec<AppPod>,

    /// Epoch seconds of the last `app_pods` mutation
    #[serde(default)]
    pub app_pods_updated_on: i64,

    /// Last published resource usage; absent until the first measurement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_quota_status: Option<ClusterResourceUsage>,

    /// Epoch seconds of the last completed resource usage pass
    #[serde(default)]
    pub config_updated_on: i64,
}

/// Connectivity status of one app pod
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AppPod {
    pub pod_name: String,
    pub pod_namespace: String,
    #[serde(default)]
    pub pod_ip: String,
    #[serde(default)]
    pub mesh_ip: String,
    #[serde(default)]
    pub mesh_peer_ip: String,
    #[serde(default)]
    pub mesh_interface: String,
}

impl AppPod {
    pub fn new(
        pod_name: impl Into<String>,
        pod_namespace: impl Into<String>,
        pod_ip: impl Into<String>,
    ) -> Self {
        Self {
            pod_name: pod_name.into(),
            pod_namespace: pod_namespace.into(),
            pod_ip: pod_ip.into(),
            ..Default::default()
        }
    }

    /// Both halves of the mesh address pair are recorded
    pub fn is_connected(&self) -> bool {
        !self.mesh_ip.is_empty() && !self.mesh_peer_ip.is_empty()
    }

    /// At least one half of the mesh address pair is recorded
    pub fn has_mesh_address(&self) -> bool {
        !self.mesh_ip.is_empty() || !self.mesh_peer_ip.is_empty()
    }

    pub fn clear_mesh(&mut self) {
        self.mesh_ip.clear();
        self.mesh_peer_ip.clear();
        self.mesh_interface.clear();
    }

    pub fn apply_endpoint(&mut self, endpoint: &ConnectedEndpoint) {
        self.mesh_ip = endpoint.mesh_ip.clone();
        self.mesh_peer_ip = endpoint.mesh_peer_ip.clone();
        self.mesh_interface = endpoint.mesh_interface.clone();
    }

    /// Same pod identity (name and namespace)
    pub fn same_pod(&self, other: &AppPod) -> bool {
        self.pod_name == other.pod_name && self.pod_namespace == other.pod_namespace
    }
}

/// Slice-wide resource usage snapshot
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterResourceUsage {
    #[serde(default)]
    pub per_namespace: Vec<NamespaceUsage>,
    pub total: ResourceUsage,
}

/// Usage of one namespace bound to the slice
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NamespaceUsage {
    pub namespace: String,
    #[serde(flatten)]
    pub usage: ResourceUsage,
}

/// CPU in milli-cores and memory in mebibytes, as Kubernetes quantities
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct ResourceUsage {
    pub cpu: Quantity,
    pub memory: Quantity,
}

/// An endpoint attached to a slice router, as reported by its sidecar
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectedEndpoint {
    pub pod_name: String,
    pub pod_namespace: String,
    pub mesh_ip: String,
    pub mesh_peer_ip: String,
    pub mesh_interface: String,
}

impl ConnectedEndpoint {
    /// Both halves of the mesh address pair were reported
    pub fn has_mesh_pair(&self) -> bool {
        !self.mesh_ip.is_empty() && !self.mesh_peer_ip.is_empty()
    }
}

/// Raw usage sample of one container from the metrics API
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerUsage {
    pub pod_name: String,
    pub container_name: String,
    pub cpu: Quantity,
    pub memory: Quantity,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint() -> ConnectedEndpoint {
        ConnectedEndpoint {
            pod_name: "iperf-0".to_string(),
            pod_namespace: "iperf".to_string(),
            mesh_ip: "10.1.1.2".to_string(),
            mesh_peer_ip: "10.1.1.1".to_string(),
            mesh_interface: "nsm0".to_string(),
        }
    }

    #[test]
    fn test_app_pod_mesh_transitions() {
        let mut pod = AppPod::new("iperf-0", "iperf", "192.168.0.4");
        assert!(!pod.is_connected());
        assert!(!pod.has_mesh_address());

        pod.apply_endpoint(&endpoint());
        assert!(pod.is_connected());
        assert_eq!(pod.mesh_interface, "nsm0");

        pod.mesh_peer_ip.clear();
        assert!(!pod.is_connected());
        assert!(pod.has_mesh_address());

        pod.clear_mesh();
        assert!(!pod.has_mesh_address());
        assert!(pod.mesh_interface.is_empty());
    }

    #[test]
    fn test_slice_status_wire_format() {
        let status = SliceStatus {
            app_pods: vec![AppPod::new("iperf-0", "iperf", "192.168.0.4")],
            app_pods_updated_on: 100,
            resource_quota_status: Some(ClusterResourceUsage {
                per_namespace: vec![NamespaceUsage {
                    namespace: "iperf".to_string(),
                    usage: ResourceUsage {
                        cpu: Quantity("4m".to_string()),
                        memory: Quantity("12Mi".to_string()),
                    },
                }],
                total: ResourceUsage {
                    cpu: Quantity("4m".to_string()),
                    memory: Quantity("12Mi".to_string()),
                },
            }),
            config_updated_on: 200,
        };

        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["appPods"][0]["podName"], "iperf-0");
        assert_eq!(value["appPodsUpdatedOn"], 100);
        assert_eq!(value["resourceQuotaStatus"]["perNamespace"][0]["cpu"], "4m");
        assert_eq!(value["resourceQuotaStatus"]["total"]["memory"], "12Mi");

        let decoded: SliceStatus = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, status);
    }

    #[test]
    fn test_empty_status_decodes() {
        let status: SliceStatus = serde_json::from_str("{}").unwrap();
        assert!(status.app_pods.is_empty());
        assert!(status.resource_quota_status.is_none());
        assert_eq!(status.config_updated_on, 0);
    }
}
