//! End-to-end reconciler scenarios against the in-memory control-plane.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::runtime::watcher;
use tokio_util::sync::CancellationToken;

use crate::cache::ClusterCache;
use crate::config::ControllerConfig;
use crate::crd::{Cluster, ClusterPhase};
use crate::error::Error;
use crate::platform::PlatformClient;
use crate::testutil::{make_cluster, make_credential, FakePlatform, FakeProbe, MockProvider};

use super::{ClusterProvider, Controller, ProviderRegistry};

struct Harness {
    platform: Arc<FakePlatform>,
    cache: Arc<ClusterCache>,
    controller: Arc<Controller>,
}

fn harness(providers: Vec<Arc<dyn ClusterProvider>>) -> Harness {
    let platform = FakePlatform::new();
    let cache = Arc::new(ClusterCache::new());
    let registry = Arc::new(ProviderRegistry::new());
    for provider in providers {
        registry.register(provider);
    }
    let controller = Controller::new(
        Arc::clone(&platform) as Arc<dyn PlatformClient>,
        Arc::clone(&cache),
        registry,
        Arc::new(FakeProbe::ok("v1.26.3")),
        &ControllerConfig::default(),
        CancellationToken::new(),
    );
    Harness {
        platform,
        cache,
        controller,
    }
}

impl Harness {
    /// Seed a cluster into both the API store and the lister cache.
    fn seed(&self, cluster: Cluster) {
        self.platform.insert_cluster(cluster.clone());
        self.cache.apply(watcher::Event::Applied(cluster));
    }

    /// Reflect the stored object back into the cache, as the watch would.
    fn refresh_cache(&self, name: &str) {
        if let Some(cluster) = self.platform.cluster(name) {
            self.cache.apply(watcher::Event::Applied(cluster));
        }
    }
}

#[tokio::test]
async fn provisions_a_fresh_cluster() {
    let provider = Arc::new(MockProvider::new("Baremetal").with_on_create(|wrapper| {
        wrapper.cluster.status_mut().phase = ClusterPhase::Running;
        Ok(())
    }));
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    h.seed(make_cluster("c1", "Baremetal", ClusterPhase::Initializing));

    h.controller.sync_cluster("c1").await.unwrap();

    let credential = h.platform.credential("cc-c1").expect("credential created");
    assert_eq!(credential.spec.cluster_name, "c1");
    let stored = h.platform.cluster("c1").unwrap();
    assert_eq!(stored.credential_name(), Some("cc-c1"));
    assert_eq!(stored.phase(), ClusterPhase::Running);
    assert_eq!(provider.create_calls(), 1);
    assert!(h.controller.health.is_active("c1"));
}

#[tokio::test]
async fn drives_multi_step_provisioning_in_one_sync() {
    let steps = Arc::new(AtomicUsize::new(0));
    let hook_steps = Arc::clone(&steps);
    let provider = Arc::new(MockProvider::new("Baremetal").with_on_create(move |wrapper| {
        if hook_steps.fetch_add(1, Ordering::SeqCst) >= 1 {
            wrapper.cluster.status_mut().phase = ClusterPhase::Running;
        }
        Ok(())
    }));
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    h.seed(make_cluster("c1", "Baremetal", ClusterPhase::Initializing));

    h.controller.sync_cluster("c1").await.unwrap();

    assert_eq!(provider.create_calls(), 2);
    assert_eq!(h.platform.cluster("c1").unwrap().phase(), ClusterPhase::Running);
}

#[tokio::test]
async fn imported_cluster_waits_for_its_credential() {
    let h = harness(vec![
        Arc::new(MockProvider::new("Imported")) as Arc<dyn ClusterProvider>
    ]);
    h.seed(make_cluster("c1", "Imported", ClusterPhase::Initializing));

    let err = h.controller.sync_cluster("c1").await.unwrap_err();
    assert!(matches!(err, Error::CredentialPending));
    assert_eq!(err.to_string(), "waiting create ClusterCredential");
    assert_eq!(h.platform.credential_count(), 0);
}

#[tokio::test]
async fn adopts_a_legacy_credential_by_field_selector() {
    let provider = Arc::new(MockProvider::new("Baremetal"));
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    h.platform.insert_credential(make_credential("legacy-cred", "c1"));
    h.seed(make_cluster("c1", "Baremetal", ClusterPhase::Running));

    h.controller.sync_cluster("c1").await.unwrap();

    let stored = h.platform.cluster("c1").unwrap();
    assert_eq!(stored.credential_name(), Some("legacy-cred"));
    // adopted, not re-created
    assert_eq!(h.platform.credential_count(), 1);
    assert_eq!(provider.update_calls(), 1);
}

#[tokio::test]
async fn credential_creation_tolerates_already_exists() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let hook_attempts = Arc::clone(&attempts);
    let provider = Arc::new(MockProvider::new("Baremetal").with_on_create(move |wrapper| {
        if hook_attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(Error::Provider("machines not ready".to_string()));
        }
        wrapper.cluster.status_mut().phase = ClusterPhase::Running;
        Ok(())
    }));
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    // an orphaned credential occupies the deterministic name but is not
    // linked back to the cluster, so the legacy lookup cannot adopt it
    h.platform.insert_credential(make_credential("cc-c1", ""));
    h.seed(make_cluster("c1", "Baremetal", ClusterPhase::Initializing));

    h.controller.sync_cluster("c1").await.unwrap_err();

    assert_eq!(h.platform.credential_count(), 1);
    assert_eq!(
        h.platform.cluster("c1").unwrap().credential_name(),
        Some("cc-c1")
    );

    // the retry repairs the credential's back-reference before finishing
    // provisioning
    h.refresh_cache("c1");
    h.controller.sync_cluster("c1").await.unwrap();
    assert_eq!(h.platform.credential("cc-c1").unwrap().spec.cluster_name, "c1");
    assert_eq!(h.platform.cluster("c1").unwrap().phase(), ClusterPhase::Running);
}

#[tokio::test]
async fn replaying_a_stuck_cluster_changes_nothing() {
    let provider = Arc::new(
        MockProvider::new("Baremetal")
            .with_on_create(|_| Err(Error::Provider("bootstrap failed".to_string()))),
    );
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    h.seed(make_cluster("c1", "Baremetal", ClusterPhase::Initializing));

    h.controller.sync_cluster("c1").await.unwrap_err();
    h.refresh_cache("c1");
    let snapshot = h.platform.cluster("c1").unwrap();
    assert_eq!(snapshot.phase(), ClusterPhase::Initializing);

    h.controller.sync_cluster("c1").await.unwrap_err();

    assert_eq!(h.platform.cluster("c1").unwrap(), snapshot);
    assert_eq!(h.platform.credential_count(), 1);
    assert_eq!(provider.create_calls(), 2);
}

#[tokio::test]
async fn update_drift_calls_provider_once_and_persists() {
    let provider = Arc::new(MockProvider::new("Baremetal").with_on_update(|wrapper| {
        wrapper.cluster.status_mut().version = "v1.27.0".to_string();
        Ok(())
    }));
    let h = harness(vec![Arc::clone(&provider) as Arc<dyn ClusterProvider>]);
    let mut cluster = make_cluster("c1", "Baremetal", ClusterPhase::Running);
    cluster.spec.cluster_credential_ref = Some(k8s_openapi::api::core::v1::LocalObjectReference {
        name: Some("cc-c1".to_string()),
    });
    h.platform.insert_credential(make_credential("cc-c1", "c1"));
    h.seed(cluster);

    h.controller.sync_cluster("c1").await.unwrap();

    assert_eq!(provider.update_calls(), 1);
    let stored = h.platform.cluster("c1").unwrap();
    assert_eq!(stored.status.as_ref().unwrap().version, "v1.27.0");
    assert!(h.controller.health.is_active("c1"));
}

#[tokio::test]
async fn terminating_cluster_releases_finalizer_then_goes_quiet() {
    let h = harness(vec![
        Arc::new(MockProvider::new("Baremetal")) as Arc<dyn ClusterProvider>
    ]);
    let mut cluster = make_cluster("c1", "Baremetal", ClusterPhase::Terminating);
    cluster.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
    cluster.metadata.finalizers = Some(vec!["platform.armada.dev/cluster".to_string()]);
    cluster.spec.cluster_credential_ref = Some(k8s_openapi::api::core::v1::LocalObjectReference {
        name: Some("cc-c1".to_string()),
    });
    h.platform.insert_credential(make_credential("cc-c1", "c1"));
    h.seed(cluster);

    h.controller.sync_cluster("c1").await.unwrap();

    let stored = h.platform.cluster("c1").unwrap();
    assert!(stored
        .metadata
        .finalizers
        .as_deref()
        .unwrap_or_default()
        .is_empty());
    assert!(h.platform.credential("cc-c1").is_none());

    // the apiserver collects the object; the next sync is a terminal no-op
    watcher_delete(&h, "c1");
    h.controller.sync_cluster("c1").await.unwrap();
}

fn watcher_delete(h: &Harness, name: &str) {
    if let Some(cluster) = h.platform.cluster(name) {
        h.cache.apply(watcher::Event::Deleted(cluster));
    } else {
        h.cache
            .apply(watcher::Event::Deleted(make_cluster(name, "Baremetal", ClusterPhase::Terminating)));
    }
}

#[tokio::test]
async fn unknown_provider_type_fails_the_sync() {
    let h = harness(vec![]);
    h.seed(make_cluster("c1", "Cloud", ClusterPhase::Initializing));

    let err = h.controller.sync_cluster("c1").await.unwrap_err();
    assert!(matches!(err, Error::UnknownProvider(t) if t == "Cloud"));
}

#[tokio::test]
async fn malformed_key_is_an_error() {
    let h = harness(vec![]);
    let err = h.controller.sync_cluster("a/b/c").await.unwrap_err();
    assert!(matches!(err, Error::InvalidKey(_)));
}

#[tokio::test]
async fn missing_cluster_is_terminal() {
    let h = harness(vec![]);
    h.cache.apply(watcher::Event::Restarted(vec![]));
    h.controller.sync_cluster("ghost").await.unwrap();
}
