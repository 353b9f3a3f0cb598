//! Cluster lifecycle controller.
//!
//! The shell wires watch events into a rate-limited work queue and runs a
//! pool of reconcile workers over it; the reconciler (see `reconciler`)
//! drives the per-cluster state machine.

pub mod conditions;
mod deleter;
mod health;
pub mod metrics;
mod provider;
mod queue;
mod reconciler;

#[cfg(test)]
mod reconciler_test;

pub use deleter::ClusterDeleter;
pub use health::{
    ApiServerProbe, HealthMonitor, VersionProbe, CONDITION_TYPE_HEALTH_CHECK,
    REASON_FAILED_HEALTH_CHECK,
};
pub use provider::{ClusterProvider, ClusterWrapper, ProviderRegistry};
pub use queue::WorkQueue;

use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher;
use kube::{Api, ResourceExt};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheDelta, ClusterCache};
use crate::config::ControllerConfig;
use crate::crd::Cluster;
use crate::error::{Error, Result};
use crate::platform::PlatformClient;

/// Split a canonical object key into its optional namespace and name.
pub(crate) fn split_key(key: &str) -> Result<(Option<&str>, &str)> {
    let parts: Vec<&str> = key.split('/').collect();
    match parts.as_slice() {
        [name] if !name.is_empty() => Ok((None, name)),
        [namespace, name] if !name.is_empty() => Ok((Some(namespace), name)),
        _ => Err(Error::InvalidKey(key.to_string())),
    }
}

/// Enqueue-worthiness filter: resyncs re-deliver identical objects, and
/// those must not generate work.
pub(crate) fn needs_update(old: &Cluster, new: &Cluster) -> bool {
    old.spec != new.spec || old.status != new.status
}

pub struct Controller {
    client: Arc<dyn PlatformClient>,
    cache: Arc<ClusterCache>,
    queue: WorkQueue,
    registry: Arc<ProviderRegistry>,
    deleter: ClusterDeleter,
    health: HealthMonitor,
    stop: CancellationToken,
}

impl Controller {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        cache: Arc<ClusterCache>,
        registry: Arc<ProviderRegistry>,
        probe: Arc<dyn VersionProbe>,
        config: &ControllerConfig,
        stop: CancellationToken,
    ) -> Arc<Self> {
        let deleter = ClusterDeleter::new(
            Arc::clone(&client),
            config.finalizer_token.clone(),
            true,
        );
        let health = HealthMonitor::new(
            Arc::clone(&client),
            Arc::clone(&cache),
            probe,
            config.health_check_interval,
            stop.child_token(),
        );
        Arc::new(Self {
            client,
            cache,
            queue: WorkQueue::named("cluster"),
            registry,
            deleter,
            health,
            stop,
        })
    }

    /// Run the controller until the stop token fires.
    ///
    /// Provider setup happens before the first worker starts; teardown runs
    /// after the last worker drained.
    pub async fn run(self: Arc<Self>, workers: usize) -> Result<()> {
        info!("starting cluster controller");
        self.registry.setup().await?;

        tokio::select! {
            _ = self.cache.wait_until_synced() => {}
            _ = self.stop.cancelled() => return Err(Error::CacheNotSynced),
        }

        let mut tasks = Vec::with_capacity(workers);
        for _ in 0..workers {
            let controller = Arc::clone(&self);
            tasks.push(tokio::spawn(async move { controller.worker().await }));
        }

        self.stop.cancelled().await;
        self.queue.shut_down();
        for task in tasks {
            let _ = task.await;
        }

        self.registry.teardown().await?;
        info!("shut down cluster controller");
        Ok(())
    }

    async fn worker(&self) {
        while let Some(key) = self.queue.get().await {
            match self.sync_cluster(&key).await {
                Ok(()) => self.queue.forget(&key),
                Err(err) => {
                    warn!(cluster = %key, error = %err, "error processing cluster, will retry");
                    metrics::inc_sync_error(err.metric_kind());
                    self.queue.add_rate_limited(&key);
                }
            }
            self.queue.done(&key);
            metrics::set_work_queue_depth(self.queue.len());
        }
    }

    pub(crate) fn add_cluster(&self, cluster: &Cluster) {
        info!(cluster = %cluster.name_any(), "adding cluster");
        self.enqueue(cluster);
    }

    pub(crate) fn update_cluster(&self, old: &Cluster, new: &Cluster) {
        if !needs_update(old, new) {
            return;
        }
        info!(cluster = %new.name_any(), "updating cluster");
        self.enqueue(new);
    }

    fn enqueue(&self, cluster: &Cluster) {
        self.queue.add(&cluster.name_any());
        metrics::set_work_queue_depth(self.queue.len());
    }

    /// Route one watch event through the cache and into the handlers.
    /// Removals are deliberately ignored: deletion is observed through the
    /// deletion timestamp and the Terminating phase.
    pub(crate) fn observe_event(&self, event: watcher::Event<Cluster>) {
        for delta in self.cache.apply(event) {
            match delta {
                CacheDelta::Added(cluster) => self.add_cluster(&cluster),
                CacheDelta::Updated { old, new } => self.update_cluster(&old, &new),
                CacheDelta::Removed(_) => {}
            }
        }
    }

    /// Feed the controller from a cluster watch until shutdown.
    pub fn spawn_informer(
        self: Arc<Self>,
        api: Api<Cluster>,
        config: watcher::Config,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let stream = watcher(api, config);
            futures::pin_mut!(stream);
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => return,
                    event = stream.next() => match event {
                        Some(Ok(event)) => self.observe_event(event),
                        Some(Err(err)) => warn!(error = %err, "cluster watch error"),
                        None => return,
                    }
                }
            }
        })
    }

    /// Re-deliver every cached cluster through the update handler on a fixed
    /// period. Unchanged objects are filtered out by `needs_update`.
    pub fn spawn_resync(self: Arc<Self>, period: std::time::Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.stop.cancelled() => return,
                    _ = tokio::time::sleep(period) => {}
                }
                for cluster in self.cache.list() {
                    self.update_cluster(&cluster, &cluster);
                }
            }
        })
    }
}
