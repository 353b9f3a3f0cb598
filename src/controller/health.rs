//! Periodic health probing of provisioned clusters.
//!
//! Health runs outside the reconcile state machine so a slow or flapping
//! apiserver cannot stall provisioning work. Each provisioned cluster gets
//! its own probe task; results are written back through a JSON merge patch
//! scoped to the status subtree, never a full-object update, so the
//! reconciler's writes are not clobbered.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kube::ResourceExt;
use rand::Rng;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::cache::ClusterCache;
use crate::crd::{Cluster, ClusterCondition, ClusterCredential, ClusterPhase, ConditionStatus};
use crate::error::{Error, Result};
use crate::platform::{merge_patch, PlatformClient};

use super::conditions::set_condition;

pub const CONDITION_TYPE_HEALTH_CHECK: &str = "HealthCheck";
pub const REASON_FAILED_HEALTH_CHECK: &str = "FailedHealthCheck";

/// Fetches the apiserver version of a managed cluster.
#[async_trait]
pub trait VersionProbe: Send + Sync + 'static {
    async fn server_version(
        &self,
        cluster: &Cluster,
        credential: Option<&ClusterCredential>,
    ) -> Result<String>;
}

#[derive(Deserialize)]
struct VersionInfo {
    #[serde(rename = "gitVersion")]
    git_version: String,
}

/// Probe that calls `/version` on the cluster's apiserver, authenticating
/// with the cluster's credential.
pub struct ApiServerProbe {
    timeout: Duration,
}

impl Default for ApiServerProbe {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

#[async_trait]
impl VersionProbe for ApiServerProbe {
    async fn server_version(
        &self,
        cluster: &Cluster,
        credential: Option<&ClusterCredential>,
    ) -> Result<String> {
        let address = cluster
            .apiserver_address()
            .ok_or_else(|| Error::HealthCheck("cluster has no apiserver address".to_string()))?;
        let path = address.path.as_deref().unwrap_or("").trim_end_matches('/');
        let url = format!("https://{}:{}{}/version", address.host, address.port, path);

        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        match credential.and_then(|c| c.spec.ca_cert.as_deref()) {
            Some(ca) => {
                let cert = reqwest::Certificate::from_pem(ca.as_bytes())
                    .map_err(|e| Error::HealthCheck(e.to_string()))?;
                builder = builder.add_root_certificate(cert);
            }
            None => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }
        let client = builder
            .build()
            .map_err(|e| Error::HealthCheck(e.to_string()))?;

        let mut request = client.get(url);
        if let Some(token) = credential.and_then(|c| c.spec.token.as_deref()) {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::HealthCheck(e.to_string()))?
            .error_for_status()
            .map_err(|e| Error::HealthCheck(e.to_string()))?;
        let version: VersionInfo = response
            .json()
            .await
            .map_err(|e| Error::HealthCheck(e.to_string()))?;
        Ok(version.git_version)
    }
}

struct MonitorInner {
    client: Arc<dyn PlatformClient>,
    cache: Arc<ClusterCache>,
    probe: Arc<dyn VersionProbe>,
    interval: Duration,
    active: Mutex<HashSet<String>>,
    stop: CancellationToken,
}

/// Keeps one probe task alive per provisioned cluster.
///
/// Cheap to clone; clones share the active-probe registry.
#[derive(Clone)]
pub struct HealthMonitor {
    inner: Arc<MonitorInner>,
}

impl HealthMonitor {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        cache: Arc<ClusterCache>,
        probe: Arc<dyn VersionProbe>,
        interval: Duration,
        stop: CancellationToken,
    ) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                client,
                cache,
                probe,
                interval,
                active: Mutex::new(HashSet::new()),
                stop,
            }),
        }
    }

    /// Arm the probe loop for a cluster. Idempotent: a cluster that is
    /// already being probed keeps its existing task.
    pub fn ensure_started(&self, key: &str) {
        {
            let mut active = self.inner.active.lock().unwrap();
            if !active.insert(key.to_string()) {
                return;
            }
        }
        info!(cluster = %key, "starting health check loop");
        let monitor = self.clone();
        let key = key.to_string();
        tokio::spawn(async move {
            // desynchronize probe start-up storms after a relist
            let jitter = rand::thread_rng().gen_range(0..100);
            tokio::time::sleep(Duration::from_micros(jitter)).await;
            monitor.run(key).await;
        });
    }

    /// Whether a probe task currently owns this key.
    pub fn is_active(&self, key: &str) -> bool {
        self.inner.active.lock().unwrap().contains(key)
    }

    async fn run(&self, key: String) {
        loop {
            if self.observe(&key).await {
                return;
            }
            tokio::select! {
                _ = tokio::time::sleep(self.inner.interval) => {}
                _ = self.inner.stop.cancelled() => {
                    self.inner.active.lock().unwrap().remove(&key);
                    return;
                }
            }
        }
    }

    /// One probe tick. Returns true when the loop should stop.
    pub(crate) async fn observe(&self, key: &str) -> bool {
        let Some(cluster) = self.inner.cache.get(key) else {
            info!(cluster = %key, "stopping health check, cluster has been deleted");
            self.inner.active.lock().unwrap().remove(key);
            return true;
        };

        if !matches!(cluster.phase(), ClusterPhase::Running | ClusterPhase::Failed) {
            return false;
        }

        if let Err(err) = self.check_health(&cluster).await {
            error!(cluster = %key, error = %err, "health check failed");
        }
        false
    }

    pub(crate) async fn check_health(&self, cluster: &Cluster) -> Result<()> {
        let old = cluster.clone();
        let mut cluster = cluster.clone();

        let mut condition = ClusterCondition {
            type_: CONDITION_TYPE_HEALTH_CHECK.to_string(),
            status: ConditionStatus::False,
            ..Default::default()
        };
        match self.fetch_version(&cluster).await {
            Ok(version) => {
                let status = cluster.status_mut();
                status.phase = ClusterPhase::Running;
                status.version = version;
                condition.status = ConditionStatus::True;
            }
            Err(err) => {
                cluster.status_mut().phase = ClusterPhase::Failed;
                condition.reason = REASON_FAILED_HEALTH_CHECK.to_string();
                condition.message = err.to_string();
            }
        }
        set_condition(&mut cluster.status_mut().conditions, condition);

        if let Some(patch) = merge_patch(&old, &cluster)? {
            self.inner
                .client
                .patch_cluster(&cluster.name_any(), &patch)
                .await?;
        }
        Ok(())
    }

    async fn fetch_version(&self, cluster: &Cluster) -> Result<String> {
        let credential = match cluster.credential_name() {
            Some(name) => Some(self.inner.client.get_cluster_credential(name).await?),
            None => self
                .inner
                .client
                .list_cluster_credentials(&cluster.name_any())
                .await?
                .into_iter()
                .next(),
        };
        self.inner
            .probe
            .server_version(cluster, credential.as_ref())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{make_cluster, make_credential, FakePlatform, FakeProbe};
    use kube::runtime::watcher;
    use serde_json::json;

    fn monitor(
        platform: &Arc<FakePlatform>,
        cache: &Arc<ClusterCache>,
        probe: FakeProbe,
    ) -> HealthMonitor {
        HealthMonitor::new(
            Arc::clone(platform) as Arc<dyn PlatformClient>,
            Arc::clone(cache),
            Arc::new(probe),
            Duration::from_secs(300),
            CancellationToken::new(),
        )
    }

    #[tokio::test]
    async fn failed_probe_patches_phase_and_condition() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        let cluster = make_cluster("c1", "Baremetal", ClusterPhase::Running);
        platform.insert_cluster(cluster.clone());
        platform.insert_credential(make_credential("cc-c1", "c1"));

        let monitor = monitor(&platform, &cache, FakeProbe::fail("conn refused"));
        monitor.check_health(&cluster).await.unwrap();

        let patches = platform.cluster_patches();
        assert_eq!(patches.len(), 1);
        let (name, patch) = &patches[0];
        assert_eq!(name, "c1");
        assert_eq!(patch["status"]["phase"], json!("Failed"));
        let condition = &patch["status"]["conditions"][0];
        assert_eq!(condition["type"], json!("HealthCheck"));
        assert_eq!(condition["status"], json!("False"));
        assert_eq!(condition["reason"], json!("FailedHealthCheck"));
        assert_eq!(condition["message"], json!("conn refused"));

        assert_eq!(platform.cluster("c1").unwrap().phase(), ClusterPhase::Failed);
    }

    #[tokio::test]
    async fn successful_probe_records_version() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        let cluster = make_cluster("c1", "Baremetal", ClusterPhase::Failed);
        platform.insert_cluster(cluster.clone());

        let monitor = monitor(&platform, &cache, FakeProbe::ok("v1.26.3"));
        monitor.check_health(&cluster).await.unwrap();

        let stored = platform.cluster("c1").unwrap();
        assert_eq!(stored.phase(), ClusterPhase::Running);
        assert_eq!(stored.status.as_ref().unwrap().version, "v1.26.3");
        let conditions = &stored.status.as_ref().unwrap().conditions;
        assert_eq!(conditions[0].status, ConditionStatus::True);
        assert!(conditions[0].reason.is_empty());
    }

    #[tokio::test]
    async fn patch_does_not_touch_spec() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        let cluster = make_cluster("c1", "Baremetal", ClusterPhase::Running);
        platform.insert_cluster(cluster.clone());

        let monitor = monitor(&platform, &cache, FakeProbe::ok("v1.26.3"));
        monitor.check_health(&cluster).await.unwrap();

        let patches = platform.cluster_patches();
        assert!(patches[0].1.get("spec").is_none());
        assert!(patches[0].1.get("metadata").is_none());
    }

    #[tokio::test]
    async fn observe_stops_when_cluster_is_gone() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        let monitor = monitor(&platform, &cache, FakeProbe::ok("v1.26.3"));

        monitor
            .inner
            .active
            .lock()
            .unwrap()
            .insert("ghost".to_string());
        assert!(monitor.observe("ghost").await);
        assert!(!monitor.is_active("ghost"));
    }

    #[tokio::test]
    async fn observe_skips_initializing_clusters() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        cache.apply(watcher::Event::Applied(make_cluster(
            "c1",
            "Baremetal",
            ClusterPhase::Initializing,
        )));

        let monitor = monitor(&platform, &cache, FakeProbe::fail("unreachable"));
        assert!(!monitor.observe("c1").await);
        assert!(platform.cluster_patches().is_empty());
    }

    #[tokio::test]
    async fn ensure_started_is_idempotent() {
        let platform = FakePlatform::new();
        let cache = Arc::new(ClusterCache::new());
        cache.apply(watcher::Event::Applied(make_cluster(
            "c1",
            "Baremetal",
            ClusterPhase::Running,
        )));
        platform.insert_cluster(make_cluster("c1", "Baremetal", ClusterPhase::Running));

        let monitor = monitor(&platform, &cache, FakeProbe::ok("v1.26.3"));
        monitor.ensure_started("c1");
        monitor.ensure_started("c1");
        assert!(monitor.is_active("c1"));
    }
}
