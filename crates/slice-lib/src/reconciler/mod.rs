//! Slice status reconcilers
//!
//! - `AppPodReconciler` keeps app pod mesh addresses in line with the slice router
//! - `ResourceUsageReconciler` measures slice namespaces and forwards usage to the hub
//!
//! Both take the slice they were triggered for, re-read what they need and
//! report whether another pass should follow. Neither keeps state between
//! calls.

mod app_pod;
mod resource_usage;


use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

pub use app_pod::{discover_app_pods, AppPodChange, AppPodOutcome, AppPodReconciler, MembershipOutcome};
pub use resource_usage::{ResourceUsageReconciler, UsageOutcome};

/// Annotation naming the network service an app pod attaches to
pub const NETWORK_SERVICE_ANNOTATION: &str = "ns.networkservicemesh.io";

/// Settings shared by both reconcilers
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Upper bound on every external call made during a pass
    pub call_timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Run `fut` with a deadline attributed to `component`
pub(crate) async fn bounded<T, F>(component: &'static str, limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout {
            component,
            after: limit,
        }),
    }
}

/// Current wall-clock time in epoch seconds
pub fn epoch_now() -> i64 {
    chrono::Utc::now().timestamp()
}
