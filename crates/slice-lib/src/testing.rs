//! In-memory doubles for the reconciler seams

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, PodStatus};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::core::ErrorResponse;
use kube::ResourceExt;

use crate::error::{Error, Result};
use crate::hub::UsagePublisher;
use crate::metrics_server::MetricsSource;
use crate::models::{ClusterResourceUsage, ConnectedEndpoint, ContainerUsage, Slice, SliceSpec, SliceStatus};
use crate::reconciler::NETWORK_SERVICE_ANNOTATION;
use crate::router::ConnectionRegistry;
use crate::store::{SliceStore, WorkloadInventory, APP_POD_TYPE_LABEL, APP_POD_TYPE_VALUE};

pub fn slice_with_status(name: &str, status: Option<SliceStatus>) -> Slice {
    let mut slice = Slice::new(name, SliceSpec {});
    slice.metadata.resource_version = Some("1".to_string());
    slice.status = status;
    slice
}

pub fn container(pod: &str, cpu: &str, memory: &str) -> ContainerUsage {
    ContainerUsage {
        pod_name: pod.to_string(),
        container_name: "app".to_string(),
        cpu: Quantity(cpu.to_string()),
        memory: Quantity(memory.to_string()),
    }
}

pub fn endpoint(pod: &str, mesh_ip: &str, mesh_peer_ip: &str) -> ConnectedEndpoint {
    ConnectedEndpoint {
        pod_name: pod.to_string(),
        pod_namespace: "iperf".to_string(),
        mesh_ip: mesh_ip.to_string(),
        mesh_peer_ip: mesh_peer_ip.to_string(),
        mesh_interface: "nsm0".to_string(),
    }
}

/// A pod labeled and annotated as an app pod of `slice`
pub fn app_pod(name: &str, namespace: &str, ip: &str, slice: &str, phase: &str) -> Pod {
    let mut pod = Pod::default();
    pod.metadata.name = Some(name.to_string());
    pod.metadata.namespace = Some(namespace.to_string());
    pod.metadata.labels = Some(BTreeMap::from([(
        APP_POD_TYPE_LABEL.to_string(),
        APP_POD_TYPE_VALUE.to_string(),
    )]));
    pod.metadata.annotations = Some(BTreeMap::from([(
        NETWORK_SERVICE_ANNOTATION.to_string(),
        format!("vl3-service-{slice}"),
    )]));
    pod.status = Some(PodStatus {
        phase: Some(phase.to_string()),
        pod_ip: Some(ip.to_string()),
        ..Default::default()
    });
    pod
}

fn not_found(name: &str) -> Error {
    Error::from(kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: format!("slices.networking.kubeslice.io \"{name}\" not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

/// Slice store honouring resourceVersion on status writes
#[derive(Default)]
pub struct FakeStore {
    slices: Mutex<HashMap<String, Slice>>,
    updates: AtomicUsize,
    conflict_next_update: AtomicBool,
}

impl FakeStore {
    pub fn with(slices: impl IntoIterator<Item = Slice>) -> Self {
        let store = Self::default();
        for slice in slices {
            store.insert(slice);
        }
        store
    }

    pub fn insert(&self, slice: Slice) {
        self.slices.lock().unwrap().insert(slice.name_any(), slice);
    }

    pub fn status(&self, name: &str) -> Option<SliceStatus> {
        self.slices.lock().unwrap().get(name).and_then(|s| s.status.clone())
    }

    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// Make the next status write lose to a concurrent writer
    pub fn conflict_next_update(&self) {
        self.conflict_next_update.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SliceStore for FakeStore {
    async fn get(&self, name: &str) -> Result<Slice> {
        self.slices
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list(&self) -> Result<Vec<Slice>> {
        let mut slices: Vec<Slice> = self.slices.lock().unwrap().values().cloned().collect();
        slices.sort_by_key(|s| s.name_any());
        Ok(slices)
    }

    async fn update_status(&self, slice: &Slice) -> Result<Slice> {
        let name = slice.name_any();
        let mut slices = self.slices.lock().unwrap();
        let stored = slices.get_mut(&name).ok_or_else(|| not_found(&name))?;

        if self.conflict_next_update.swap(false, Ordering::SeqCst)
            || stored.resource_version() != slice.resource_version()
        {
            return Err(Error::Conflict { slice: name });
        }

        let next = stored
            .resource_version()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        stored.metadata.resource_version = Some(next.to_string());
        stored.status = slice.status.clone();
        self.updates.fetch_add(1, Ordering::SeqCst);
        Ok(stored.clone())
    }
}

/// Slice router double returning a fixed endpoint list
#[derive(Default)]
pub struct FakeRegistry {
    endpoints: Mutex<Vec<ConnectedEndpoint>>,
    fail: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeRegistry {
    pub fn with(endpoints: Vec<ConnectedEndpoint>) -> Self {
        Self {
            endpoints: Mutex::new(endpoints),
            ..Default::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn set_endpoints(&self, endpoints: Vec<ConnectedEndpoint>) {
        *self.endpoints.lock().unwrap() = endpoints;
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConnectionRegistry for FakeRegistry {
    async fn connected_endpoints(&self, slice_name: &str) -> Result<Vec<ConnectedEndpoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Registry {
                slice: slice_name.to_string(),
                message: "router unavailable".to_string(),
            });
        }
        Ok(self.endpoints.lock().unwrap().clone())
    }
}

/// Workload inventory double. Queued namespace answers are served first,
/// then the steady answer.
#[derive(Default)]
pub struct FakeInventory {
    namespaces: Mutex<Vec<String>>,
    queued_namespaces: Mutex<VecDeque<Vec<String>>>,
    pods: Mutex<Vec<Pod>>,
}

impl FakeInventory {
    pub fn with_namespaces(namespaces: &[&str]) -> Self {
        let inventory = Self::default();
        inventory.set_namespaces(namespaces);
        inventory
    }

    pub fn set_namespaces(&self, namespaces: &[&str]) {
        *self.namespaces.lock().unwrap() = namespaces.iter().map(|n| n.to_string()).collect();
    }

    pub fn queue_namespaces(&self, namespaces: &[&str]) {
        self.queued_namespaces
            .lock()
            .unwrap()
            .push_back(namespaces.iter().map(|n| n.to_string()).collect());
    }

    pub fn set_pods(&self, pods: Vec<Pod>) {
        *self.pods.lock().unwrap() = pods;
    }
}

#[async_trait]
impl WorkloadInventory for FakeInventory {
    async fn list_slice_namespaces(&self, _slice_name: &str) -> Result<Vec<String>> {
        if let Some(queued) = self.queued_namespaces.lock().unwrap().pop_front() {
            return Ok(queued);
        }
        Ok(self.namespaces.lock().unwrap().clone())
    }

    async fn list_app_pods(&self) -> Result<Vec<Pod>> {
        Ok(self.pods.lock().unwrap().clone())
    }
}

/// Metrics API double keyed by namespace; unknown namespaces report nothing
#[derive(Default)]
pub struct FakeMetrics {
    usage: Mutex<HashMap<String, Vec<ContainerUsage>>>,
    failing: Mutex<HashSet<String>>,
    queries: AtomicUsize,
}

impl FakeMetrics {
    pub fn set(&self, namespace: &str, containers: Vec<ContainerUsage>) {
        self.usage
            .lock()
            .unwrap()
            .insert(namespace.to_string(), containers);
    }

    pub fn fail_namespace(&self, namespace: &str) {
        self.failing.lock().unwrap().insert(namespace.to_string());
    }

    pub fn queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricsSource for FakeMetrics {
    async fn namespace_metrics(&self, namespace: &str) -> Result<Vec<ContainerUsage>> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(namespace) {
            return Err(Error::Metrics {
                namespace: namespace.to_string(),
                message: "metrics API unavailable".to_string(),
            });
        }
        Ok(self
            .usage
            .lock()
            .unwrap()
            .get(namespace)
            .cloned()
            .unwrap_or_default())
    }
}

/// Hub double recording every publish
#[derive(Default)]
pub struct FakePublisher {
    published: Mutex<Vec<(String, ClusterResourceUsage)>>,
    fail: AtomicBool,
}

impl FakePublisher {
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<(String, ClusterResourceUsage)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl UsagePublisher for FakePublisher {
    async fn publish_resource_usage(
        &self,
        slice_name: &str,
        usage: &ClusterResourceUsage,
    ) -> Result<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Publish {
                slice: slice_name.to_string(),
                message: "hub unreachable".to_string(),
            });
        }
        self.published
            .lock()
            .unwrap()
            .push((slice_name.to_string(), usage.clone()));
        Ok(())
    }
}
