//! App pod connectivity reconciliation
//!
//! A slice status lists the app pods believed to belong to the slice together
//! with their mesh addresses. The slice router is the ground truth for which
//! of them are attached. Each pass converges at most one divergent pod and
//! asks to be requeued, so a burst of changes drains one write at a time
//! and each write carries a fresh resourceVersion.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;
use tracing::debug;

use super::{bounded, epoch_now, ReconcilerConfig, NETWORK_SERVICE_ANNOTATION};
use crate::error::Result;
use crate::health::components;
use crate::models::{AppPod, ConnectedEndpoint, Slice};
use crate::router::ConnectionRegistry;
use crate::store::{SliceStore, WorkloadInventory, APP_POD_TYPE_LABEL, APP_POD_TYPE_VALUE};

/// Mutation committed by one connectivity pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppPodChange {
    Connected {
        pod_name: String,
        pod_namespace: String,
        mesh_ip: String,
        mesh_peer_ip: String,
        mesh_interface: String,
    },
    Disconnected {
        pod_name: String,
        pod_namespace: String,
    },
}

impl AppPodChange {
    pub fn kind(&self) -> &'static str {
        match self {
            AppPodChange::Connected { .. } => "connected",
            AppPodChange::Disconnected { .. } => "disconnected",
        }
    }

    pub fn pod_name(&self) -> &str {
        match self {
            AppPodChange::Connected { pod_name, .. } | AppPodChange::Disconnected { pod_name, .. } => {
                pod_name
            }
        }
    }
}

/// Result of one connectivity pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppPodOutcome {
    /// Another pass should follow immediately
    pub requeue: bool,
    pub change: Option<AppPodChange>,
}

/// Result of a membership sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipOutcome {
    Unchanged,
    Updated { added: usize, removed: usize },
}

pub struct AppPodReconciler {
    store: Arc<dyn SliceStore>,
    registry: Arc<dyn ConnectionRegistry>,
    inventory: Arc<dyn WorkloadInventory>,
    config: ReconcilerConfig,
}

impl AppPodReconciler {
    pub fn new(
        store: Arc<dyn SliceStore>,
        registry: Arc<dyn ConnectionRegistry>,
        inventory: Arc<dyn WorkloadInventory>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            registry,
            inventory,
            config,
        }
    }

    /// Converge the first app pod whose mesh addresses disagree with the
    /// slice router and persist it.
    pub async fn reconcile(&self, slice: &Slice) -> Result<AppPodOutcome> {
        let name = slice.name_any();
        let limit = self.config.call_timeout;

        let endpoints = bounded(
            components::CONNECTION_REGISTRY,
            limit,
            self.registry.connected_endpoints(&name),
        )
        .await?;

        let mut current = bounded(components::SLICE_STORE, limit, self.store.get(&name)).await?;
        let Some(status) = current.status.as_mut() else {
            debug!(slice = %name, "Slice has no status yet");
            return Ok(AppPodOutcome::default());
        };

        let Some(change) = converge_first_divergent(&mut status.app_pods, &endpoints) else {
            return Ok(AppPodOutcome::default());
        };
        status.app_pods_updated_on = epoch_now();

        bounded(
            components::SLICE_STORE,
            limit,
            self.store.update_status(&current),
        )
        .await?;

        debug!(slice = %name, pod = %change.pod_name(), change = change.kind(), "App pod converged");
        Ok(AppPodOutcome {
            requeue: true,
            change: Some(change),
        })
    }

    /// Replace the slice's app pod list with the pods currently attached to
    /// its network service. Mesh addresses survive for pods that stay.
    pub async fn sync_membership(&self, slice: &Slice) -> Result<MembershipOutcome> {
        let name = slice.name_any();
        let limit = self.config.call_timeout;

        let pods = bounded(
            components::SLICE_STORE,
            limit,
            self.inventory.list_app_pods(),
        )
        .await?;
        let mut discovered = discover_app_pods(&pods, &name);

        let mut current = bounded(components::SLICE_STORE, limit, self.store.get(&name)).await?;
        let status = current.status.get_or_insert_with(Default::default);

        let added = discovered
            .iter()
            .filter(|pod| !status.app_pods.iter().any(|known| known.same_pod(pod)))
            .count();
        let removed = status
            .app_pods
            .iter()
            .filter(|known| !discovered.iter().any(|pod| pod.same_pod(known)))
            .count();

        let mut readdressed = false;
        for pod in &mut discovered {
            if let Some(known) = status.app_pods.iter().find(|known| known.same_pod(pod)) {
                if known.pod_ip == pod.pod_ip {
                    pod.mesh_ip = known.mesh_ip.clone();
                    pod.mesh_peer_ip = known.mesh_peer_ip.clone();
                    pod.mesh_interface = known.mesh_interface.clone();
                } else {
                    readdressed = true;
                }
            }
        }

        if added == 0 && removed == 0 && !readdressed {
            return Ok(MembershipOutcome::Unchanged);
        }

        status.app_pods = discovered;
        status.app_pods_updated_on = epoch_now();
        bounded(
            components::SLICE_STORE,
            limit,
            self.store.update_status(&current),
        )
        .await?;

        Ok(MembershipOutcome::Updated { added, removed })
    }
}

/// Apply the first divergence between `app_pods` and `endpoints`, in stored
/// order. Endpoints are matched by pod name only; an endpoint reporting only
/// half of the mesh address pair counts as not connected.
fn converge_first_divergent(
    app_pods: &mut [AppPod],
    endpoints: &[ConnectedEndpoint],
) -> Option<AppPodChange> {
    for pod in app_pods.iter_mut() {
        let endpoint = endpoints
            .iter()
            .find(|e| e.pod_name == pod.pod_name)
            .filter(|e| e.has_mesh_pair());
        match endpoint {
            None if pod.has_mesh_address() => {
                pod.clear_mesh();
                return Some(AppPodChange::Disconnected {
                    pod_name: pod.pod_name.clone(),
                    pod_namespace: pod.pod_namespace.clone(),
                });
            }
            Some(endpoint) if !pod.is_connected() => {
                pod.apply_endpoint(endpoint);
                return Some(AppPodChange::Connected {
                    pod_name: pod.pod_name.clone(),
                    pod_namespace: pod.pod_namespace.clone(),
                    mesh_ip: pod.mesh_ip.clone(),
                    mesh_peer_ip: pod.mesh_peer_ip.clone(),
                    mesh_interface: pod.mesh_interface.clone(),
                });
            }
            _ => {}
        }
    }
    None
}

/// Running pods labeled as app pods and attached to `slice_name`'s network
/// service
pub fn discover_app_pods(pods: &[Pod], slice_name: &str) -> Vec<AppPod> {
    let service = format!("vl3-service-{slice_name}");

    pods.iter()
        .filter(|pod| {
            pod.labels().get(APP_POD_TYPE_LABEL).map(String::as_str) == Some(APP_POD_TYPE_VALUE)
        })
        .filter(|pod| pod.annotations().get(NETWORK_SERVICE_ANNOTATION) == Some(&service))
        .filter(|pod| {
            pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
        })
        .map(|pod| {
            let pod_ip = pod
                .status
                .as_ref()
                .and_then(|s| s.pod_ip.clone())
                .unwrap_or_default();
            AppPod::new(pod.name_any(), pod.namespace().unwrap_or_default(), pod_ip)
        })
        .collect()
}
