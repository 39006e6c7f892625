//! Periodic slice controller
//!
//! Lists every slice on a jittered interval and drives both reconcilers:
//! app pod membership, then connectivity (following the requeue signal up to
//! a per-tick budget), then resource usage once the slice's last usage pass
//! is older than the configured interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use kube::ResourceExt;
use tokio::sync::broadcast;
use tokio::time::{interval, Instant};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::health::{components, HealthRegistry};
use crate::models::Slice;
use crate::observability::{reconcilers, OperatorMetrics, StructuredLogger};
use crate::reconciler::{epoch_now, AppPodReconciler, MembershipOutcome, ResourceUsageReconciler, UsageOutcome};
use crate::store::SliceStore;

/// Components that failed during a tick, flagged when any failure was not retryable
type FailedComponents = HashMap<&'static str, bool>;

fn note_failure(failed: &mut FailedComponents, error: &Error) {
    *failed.entry(error.component()).or_default() |= !error.is_retryable();
}

/// Configuration for the controller loop
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Base tick interval (default: 10 seconds)
    pub interval: Duration,
    /// Maximum jitter added to each tick (default: 1 second)
    pub jitter: Duration,
    /// Minimum age of `configUpdatedOn` before usage is measured again
    pub resource_usage_interval: Duration,
    /// Connectivity passes allowed per slice per tick
    pub max_app_pod_steps: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            jitter: Duration::from_secs(1),
            resource_usage_interval: Duration::from_secs(60),
            max_app_pod_steps: 10,
        }
    }
}

/// Counters from one controller tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PassResults {
    pub slices: usize,
    pub app_pod_updates: usize,
    pub usage_published: usize,
    pub errors: usize,
}

pub struct SliceController {
    store: Arc<dyn SliceStore>,
    app_pods: AppPodReconciler,
    resource_usage: ResourceUsageReconciler,
    health: HealthRegistry,
    metrics: OperatorMetrics,
    logger: StructuredLogger,
    config: ControllerConfig,
}

impl SliceController {
    pub fn new(
        store: Arc<dyn SliceStore>,
        app_pods: AppPodReconciler,
        resource_usage: ResourceUsageReconciler,
        health: HealthRegistry,
        logger: StructuredLogger,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store,
            app_pods,
            resource_usage,
            health,
            metrics: OperatorMetrics::new(),
            logger,
            config,
        }
    }

    /// Run until `shutdown` fires. A pass in flight when it fires is dropped.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.config.interval.as_secs(),
            resource_usage_interval_secs = self.config.resource_usage_interval.as_secs(),
            "Starting slice controller"
        );

        let mut ticker = interval(self.current_interval());
        let mut ready = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    tokio::select! {
                        results = self.reconcile_all() => {
                            debug!(
                                slices = results.slices,
                                app_pod_updates = results.app_pod_updates,
                                usage_published = results.usage_published,
                                errors = results.errors,
                                elapsed_ms = start.elapsed().as_millis(),
                                "Controller tick complete"
                            );
                        }
                        _ = shutdown.recv() => {
                            info!("Shutdown during controller tick");
                            break;
                        }
                    }

                    if !ready {
                        self.health.set_ready(true).await;
                        ready = true;
                    }
                    ticker = interval(self.current_interval());
                    // interval() fires immediately; consume that tick
                    ticker.tick().await;
                }
                _ = shutdown.recv() => {
                    info!("Shutting down slice controller");
                    break;
                }
            }
        }
    }

    fn current_interval(&self) -> Duration {
        let jitter_ms = rand_jitter(self.config.jitter.as_millis() as u64);
        self.config.interval + Duration::from_millis(jitter_ms)
    }

    /// One tick over every slice
    pub async fn reconcile_all(&self) -> PassResults {
        let mut results = PassResults::default();
        let mut failed = FailedComponents::new();

        match self.store.list().await {
            Ok(slices) => {
                results.slices = slices.len();
                self.metrics.set_slices_tracked(slices.len() as i64);
                for slice in &slices {
                    self.reconcile_slice(slice, &mut results, &mut failed).await;
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to list slices");
                results.errors += 1;
                note_failure(&mut failed, &e);
            }
        }

        for component in components::ALL {
            match failed.get(component) {
                Some(true) => {
                    self.health
                        .set_unhealthy(component, "Last controller tick failed permanently")
                        .await
                }
                Some(false) => {
                    self.health
                        .set_degraded(component, "Last controller tick failed")
                        .await
                }
                None => self.health.set_healthy(component).await,
            }
        }

        results
    }

    async fn reconcile_slice(
        &self,
        slice: &Slice,
        results: &mut PassResults,
        failed: &mut FailedComponents,
    ) {
        let name = slice.name_any();
        let mut record = |reconciler: &str, error: Error, results: &mut PassResults| {
            self.logger.log_reconcile_failure(&name, reconciler, &error);
            self.metrics
                .inc_reconcile_errors(reconciler, error.component());
            note_failure(failed, &error);
            results.errors += 1;
        };

        if let Err(e) = self.sync_membership(slice).await {
            record(reconcilers::MEMBERSHIP, e, results);
        }

        match self.converge_app_pods(slice).await {
            Ok(updates) => results.app_pod_updates += updates,
            Err(e) => record(reconcilers::APP_POD, e, results),
        }

        let now = epoch_now();
        if self.usage_due(slice, now) {
            match self.measure_usage(slice, now).await {
                Ok(true) => results.usage_published += 1,
                Ok(false) => {}
                Err(e) => record(reconcilers::RESOURCE_USAGE, e, results),
            }
        }
    }

    async fn sync_membership(&self, slice: &Slice) -> Result<()> {
        let name = slice.name_any();
        let start = Instant::now();
        let outcome = self.app_pods.sync_membership(slice).await;
        self.metrics
            .observe_reconcile_latency(reconcilers::MEMBERSHIP, start.elapsed().as_secs_f64());

        if let MembershipOutcome::Updated { added, removed } = outcome? {
            self.logger.log_membership_synced(&name, added, removed);
        }
        Ok(())
    }

    /// Follow the connectivity requeue signal up to the per-tick budget.
    /// Returns the number of committed changes.
    async fn converge_app_pods(&self, slice: &Slice) -> Result<usize> {
        let name = slice.name_any();
        let mut updates = 0;

        for _ in 0..self.config.max_app_pod_steps {
            let start = Instant::now();
            let outcome = self.app_pods.reconcile(slice).await;
            self.metrics
                .observe_reconcile_latency(reconcilers::APP_POD, start.elapsed().as_secs_f64());
            let outcome = outcome?;

            if let Some(change) = &outcome.change {
                self.logger.log_app_pod_change(&name, change);
                self.metrics.inc_app_pod_update(change);
                updates += 1;
            }
            if !outcome.requeue {
                return Ok(updates);
            }
        }

        debug!(
            slice = %name,
            steps = self.config.max_app_pod_steps,
            "App pod step budget used up, continuing next tick"
        );
        Ok(updates)
    }

    fn usage_due(&self, slice: &Slice, now: i64) -> bool {
        let last = slice
            .status
            .as_ref()
            .map(|s| s.config_updated_on)
            .unwrap_or_default();
        let interval = i64::try_from(self.config.resource_usage_interval.as_secs()).unwrap_or(i64::MAX);
        now.saturating_sub(last) >= interval
    }

    /// Returns whether a snapshot was published
    async fn measure_usage(&self, slice: &Slice, now: i64) -> Result<bool> {
        let name = slice.name_any();
        let start = Instant::now();
        let outcome = self.resource_usage.reconcile(slice, now).await;
        self.metrics
            .observe_reconcile_latency(reconcilers::RESOURCE_USAGE, start.elapsed().as_secs_f64());

        match outcome? {
            UsageOutcome::Published(usage) => {
                self.logger.log_usage_published(&name, &usage);
                self.metrics.inc_usage_published();
                Ok(true)
            }
            UsageOutcome::Suppressed { measured } => {
                self.logger.log_usage_suppressed(&name, &measured);
                self.metrics.inc_usage_suppressed();
                Ok(false)
            }
            UsageOutcome::NoNamespaces | UsageOutcome::NoUsage => Ok(false),
        }
    }
}

/// Generate a random jitter value between 0 and max_ms
fn rand_jitter(max_ms: u64) -> u64 {
    if max_ms == 0 {
        return 0;
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64;

    now % max_ms
}
