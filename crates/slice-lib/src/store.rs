//! Slice status store and workload inventory
//!
//! Both traits have a Kubernetes-backed implementation in `KubeStore`. The
//! reconcilers only see the traits so they can run against in-memory doubles.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, PostParams};
use kube::{Client, ResourceExt};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::Slice;

/// Label binding a namespace to a slice
pub const SLICE_NAMESPACE_LABEL: &str = "kubeslice.io/slice";

/// Label marking a workload pod as a candidate app pod
pub const APP_POD_TYPE_LABEL: &str = "avesha.io/pod-type";
pub const APP_POD_TYPE_VALUE: &str = "app";

/// Typed access to `Slice` objects
#[async_trait]
pub trait SliceStore: Send + Sync {
    async fn get(&self, name: &str) -> Result<Slice>;

    async fn list(&self) -> Result<Vec<Slice>>;

    /// Replace the status of `slice`, guarded by its resourceVersion.
    /// Returns the stored object; a lost race is `Error::Conflict`.
    async fn update_status(&self, slice: &Slice) -> Result<Slice>;
}

/// Read-only view of the workloads a slice spans
#[async_trait]
pub trait WorkloadInventory: Send + Sync {
    /// Names of namespaces labeled for `slice_name`
    async fn list_slice_namespaces(&self, slice_name: &str) -> Result<Vec<String>>;

    /// Every pod labeled as an app pod, across namespaces
    async fn list_app_pods(&self) -> Result<Vec<Pod>>;
}

/// Kubernetes-backed store and inventory
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn slices(&self) -> Api<Slice> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl SliceStore for KubeStore {
    async fn get(&self, name: &str) -> Result<Slice> {
        Ok(self.slices().get(name).await?)
    }

    async fn list(&self) -> Result<Vec<Slice>> {
        let slices = self.slices().list(&ListParams::default()).await?;
        Ok(slices.items)
    }

    async fn update_status(&self, slice: &Slice) -> Result<Slice> {
        let name = slice.name_any();
        let body = serde_json::to_vec(slice)?;

        let stored = self
            .slices()
            .replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| status_write_error(&name, e))?;

        debug!(
            slice = %name,
            resource_version = ?stored.resource_version(),
            "Replaced slice status"
        );
        Ok(stored)
    }
}

#[async_trait]
impl WorkloadInventory for KubeStore {
    async fn list_slice_namespaces(&self, slice_name: &str) -> Result<Vec<String>> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{SLICE_NAMESPACE_LABEL}={slice_name}"));

        let namespaces = api.list(&params).await?;
        Ok(namespaces.items.iter().map(ResourceExt::name_any).collect())
    }

    async fn list_app_pods(&self) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::all(self.client.clone());
        let params =
            ListParams::default().labels(&format!("{APP_POD_TYPE_LABEL}={APP_POD_TYPE_VALUE}"));

        Ok(api.list(&params).await?.items)
    }
}

/// Map a failed status write, surfacing optimistic-concurrency losses
pub(crate) fn status_write_error(slice: &str, error: kube::Error) -> Error {
    match error {
        kube::Error::Api(response) if response.code == 409 => Error::Conflict {
            slice: slice.to_string(),
        },
        other => Error::from(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{reason} from test"),
            reason: reason.to_string(),
            code,
        })
    }

    #[test]
    fn test_conflict_maps_to_conflict_error() {
        let err = status_write_error("red", api_error(409, "Conflict"));
        assert!(matches!(err, Error::Conflict { ref slice } if slice == "red"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_other_status_write_errors_pass_through() {
        let err = status_write_error("red", api_error(404, "NotFound"));
        assert!(matches!(
            err,
            Error::Kube {
                source: kube::Error::Api(ref response)
            } if response.code == 404
        ));
    }
}
