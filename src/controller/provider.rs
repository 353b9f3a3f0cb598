//! Cluster provider contract and registry.
//!
//! A provider owns the type-specific mechanics of provisioning and
//! maintaining one kind of cluster (bare-metal, imported, cloud). The
//! controller is provider-agnostic: it resolves the provider named by
//! `spec.type`, hands it a [`ClusterWrapper`] to mutate, and persists
//! whatever came back.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use kube::ResourceExt;

use crate::crd::{Cluster, ClusterCredential};
use crate::error::{Error, Result};
use crate::platform::PlatformClient;

/// In-memory aggregate handed to providers.
///
/// Providers advance `cluster.status.phase` out of Initializing when
/// provisioning terminates, and may rewrite the credential's access
/// material. Every mutation is persisted by the controller after the call.
pub struct ClusterWrapper {
    pub cluster: Cluster,
    pub credential: Option<ClusterCredential>,
}

impl ClusterWrapper {
    /// Resolve the cluster's credential and build the wrapper.
    ///
    /// Follows `spec.clusterCredentialRef` when set, falling back to the
    /// legacy field-selector lookup by cluster name.
    pub async fn load(client: &dyn PlatformClient, cluster: &Cluster) -> Result<Self> {
        let credential = match cluster.credential_name() {
            Some(name) => Some(client.get_cluster_credential(name).await?),
            None => client
                .list_cluster_credentials(&cluster.name_any())
                .await?
                .into_iter()
                .next(),
        };
        Ok(Self {
            cluster: cluster.clone(),
            credential,
        })
    }

    pub fn name(&self) -> String {
        self.cluster.name_any()
    }
}

impl std::fmt::Debug for dyn ClusterProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("ClusterProvider").field(&self.name()).finish()
    }
}

#[async_trait]
pub trait ClusterProvider: Send + Sync + 'static {
    /// Provider key matched against `spec.type`.
    fn name(&self) -> &str;

    /// One-time initialization before the controller starts reconciling.
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// One-time cleanup after the controller stops.
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    /// Drive provisioning one step forward. Called repeatedly while the
    /// cluster stays Initializing; implementations must be idempotent.
    async fn on_create(&self, cluster: &mut ClusterWrapper) -> Result<()>;

    /// Reconcile a provisioned cluster against its desired state.
    async fn on_update(&self, cluster: &mut ClusterWrapper) -> Result<()>;
}

/// Directory of registered providers, keyed by provider name.
///
/// Built explicitly at startup so tests can substitute providers per run.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: RwLock<HashMap<String, Arc<dyn ClusterProvider>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, provider: Arc<dyn ClusterProvider>) {
        self.providers
            .write()
            .unwrap()
            .insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, cluster_type: &str) -> Result<Arc<dyn ClusterProvider>> {
        self.providers
            .read()
            .unwrap()
            .get(cluster_type)
            .cloned()
            .ok_or_else(|| Error::UnknownProvider(cluster_type.to_string()))
    }

    fn snapshot(&self) -> Vec<Arc<dyn ClusterProvider>> {
        self.providers.read().unwrap().values().cloned().collect()
    }

    /// Run every provider's setup hook; the first failure aborts startup.
    pub async fn setup(&self) -> Result<()> {
        for provider in self.snapshot() {
            provider.setup().await?;
        }
        Ok(())
    }

    /// Run every provider's teardown hook, returning the first failure.
    pub async fn teardown(&self) -> Result<()> {
        let mut result = Ok(());
        for provider in self.snapshot() {
            if let Err(err) = provider.teardown().await {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }
}
