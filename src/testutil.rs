//! Shared fixtures: an in-memory control-plane and scriptable providers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use kube::ResourceExt;
use serde_json::Value;

use crate::controller::{ClusterProvider, ClusterWrapper, VersionProbe};
use crate::crd::{
    Cluster, ClusterCredential, ClusterCredentialSpec, ClusterPhase, ClusterSpec, ClusterStatus,
};
use crate::error::{Error, Result};
use crate::platform::{apply_merge_patch, PlatformClient};

pub(crate) fn make_cluster(name: &str, type_: &str, phase: ClusterPhase) -> Cluster {
    let mut cluster = Cluster::new(
        name,
        ClusterSpec {
            type_: type_.to_string(),
            tenant_id: "default".to_string(),
            display_name: None,
            version: None,
            cluster_credential_ref: None,
        },
    );
    cluster.status = Some(ClusterStatus {
        phase,
        ..Default::default()
    });
    cluster
}

pub(crate) fn make_credential(name: &str, cluster_name: &str) -> ClusterCredential {
    ClusterCredential::new(
        name,
        ClusterCredentialSpec {
            tenant_id: "default".to_string(),
            cluster_name: cluster_name.to_string(),
            ..Default::default()
        },
    )
}

#[derive(Default)]
struct FakeState {
    clusters: BTreeMap<String, Cluster>,
    credentials: BTreeMap<String, ClusterCredential>,
    cluster_patches: Vec<(String, Value)>,
}

/// In-memory `PlatformClient` with introspection hooks for assertions.
#[derive(Default)]
pub(crate) struct FakePlatform {
    state: Mutex<FakeState>,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert_cluster(&self, cluster: Cluster) {
        self.state
            .lock()
            .unwrap()
            .clusters
            .insert(cluster.name_any(), cluster);
    }

    pub fn insert_credential(&self, credential: ClusterCredential) {
        self.state
            .lock()
            .unwrap()
            .credentials
            .insert(credential.name_any(), credential);
    }

    pub fn cluster(&self, name: &str) -> Option<Cluster> {
        self.state.lock().unwrap().clusters.get(name).cloned()
    }

    pub fn credential(&self, name: &str) -> Option<ClusterCredential> {
        self.state.lock().unwrap().credentials.get(name).cloned()
    }

    pub fn credentials_for(&self, cluster_name: &str) -> Vec<ClusterCredential> {
        self.state
            .lock()
            .unwrap()
            .credentials
            .values()
            .filter(|c| c.spec.cluster_name == cluster_name)
            .cloned()
            .collect()
    }

    pub fn credential_count(&self) -> usize {
        self.state.lock().unwrap().credentials.len()
    }

    /// Merge patches applied to clusters, in application order.
    pub fn cluster_patches(&self) -> Vec<(String, Value)> {
        self.state.lock().unwrap().cluster_patches.clone()
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn get_cluster(&self, name: &str) -> Result<Cluster> {
        self.cluster(name).ok_or_else(|| Error::NotFound {
            kind: "Cluster",
            name: name.to_string(),
        })
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        let name = cluster.name_any();
        let mut state = self.state.lock().unwrap();
        if !state.clusters.contains_key(&name) {
            return Err(Error::NotFound {
                kind: "Cluster",
                name,
            });
        }
        state.clusters.insert(name, cluster.clone());
        Ok(cluster.clone())
    }

    async fn patch_cluster(&self, name: &str, patch: &Value) -> Result<Cluster> {
        let mut state = self.state.lock().unwrap();
        let stored = state.clusters.get(name).ok_or_else(|| Error::NotFound {
            kind: "Cluster",
            name: name.to_string(),
        })?;
        let mut value = serde_json::to_value(stored)?;
        apply_merge_patch(&mut value, patch);
        let patched: Cluster = serde_json::from_value(value)?;
        state.clusters.insert(name.to_string(), patched.clone());
        state.cluster_patches.push((name.to_string(), patch.clone()));
        Ok(patched)
    }

    async fn get_cluster_credential(&self, name: &str) -> Result<ClusterCredential> {
        self.credential(name).ok_or_else(|| Error::NotFound {
            kind: "ClusterCredential",
            name: name.to_string(),
        })
    }

    async fn list_cluster_credentials(
        &self,
        cluster_name: &str,
    ) -> Result<Vec<ClusterCredential>> {
        Ok(self.credentials_for(cluster_name))
    }

    async fn create_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential> {
        let name = credential.name_any();
        let mut state = self.state.lock().unwrap();
        if state.credentials.contains_key(&name) {
            return Err(Error::AlreadyExists {
                kind: "ClusterCredential",
                name,
            });
        }
        state.credentials.insert(name, credential.clone());
        Ok(credential.clone())
    }

    async fn update_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential> {
        let name = credential.name_any();
        let mut state = self.state.lock().unwrap();
        if !state.credentials.contains_key(&name) {
            return Err(Error::NotFound {
                kind: "ClusterCredential",
                name,
            });
        }
        state.credentials.insert(name, credential.clone());
        Ok(credential.clone())
    }

    async fn delete_cluster_credential(&self, name: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state
            .credentials
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound {
                kind: "ClusterCredential",
                name: name.to_string(),
            })
    }
}

type ProviderHook = dyn Fn(&mut ClusterWrapper) -> Result<()> + Send + Sync;

/// Scriptable provider with call counters.
pub(crate) struct MockProvider {
    name: &'static str,
    create_calls: AtomicUsize,
    update_calls: AtomicUsize,
    on_create: Box<ProviderHook>,
    on_update: Box<ProviderHook>,
}

impl MockProvider {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            create_calls: AtomicUsize::new(0),
            update_calls: AtomicUsize::new(0),
            on_create: Box::new(|_| Ok(())),
            on_update: Box::new(|_| Ok(())),
        }
    }

    pub fn with_on_create(
        mut self,
        hook: impl Fn(&mut ClusterWrapper) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_create = Box::new(hook);
        self
    }

    pub fn with_on_update(
        mut self,
        hook: impl Fn(&mut ClusterWrapper) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_update = Box::new(hook);
        self
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterProvider for MockProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn on_create(&self, cluster: &mut ClusterWrapper) -> Result<()> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        (self.on_create)(cluster)
    }

    async fn on_update(&self, cluster: &mut ClusterWrapper) -> Result<()> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        (self.on_update)(cluster)
    }
}

enum ProbeOutcome {
    Version(String),
    Failure(String),
}

/// Version probe with a canned outcome.
pub(crate) struct FakeProbe {
    outcome: ProbeOutcome,
}

impl FakeProbe {
    pub fn ok(version: &str) -> Self {
        Self {
            outcome: ProbeOutcome::Version(version.to_string()),
        }
    }

    pub fn fail(message: &str) -> Self {
        Self {
            outcome: ProbeOutcome::Failure(message.to_string()),
        }
    }
}

#[async_trait]
impl VersionProbe for FakeProbe {
    async fn server_version(
        &self,
        _cluster: &Cluster,
        _credential: Option<&ClusterCredential>,
    ) -> Result<String> {
        match &self.outcome {
            ProbeOutcome::Version(version) => Ok(version.clone()),
            ProbeOutcome::Failure(message) => Err(Error::HealthCheck(message.clone())),
        }
    }
}
