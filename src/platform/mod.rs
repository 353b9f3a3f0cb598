//! Typed access to the platform control-plane.
//!
//! `PlatformClient` is the surface the controller reconciles through. The
//! production implementation ([`KubePlatform`]) is a thin wrapper over
//! `kube::Api` that normalizes API errors and throttles every request
//! through a shared token bucket; tests substitute an in-memory fake.

mod patch;
mod ratelimit;

pub use patch::{apply_merge_patch, merge_patch};
pub use ratelimit::RateLimiter;

use async_trait::async_trait;
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, ResourceExt};

use crate::crd::{Cluster, ClusterCredential};
use crate::error::{Error, Result};

#[async_trait]
pub trait PlatformClient: Send + Sync + 'static {
    async fn get_cluster(&self, name: &str) -> Result<Cluster>;
    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster>;
    /// JSON merge patch against a cluster; used for narrow status writes
    /// that must not clobber concurrent full-object updates.
    async fn patch_cluster(&self, name: &str, patch: &serde_json::Value) -> Result<Cluster>;

    async fn get_cluster_credential(&self, name: &str) -> Result<ClusterCredential>;
    /// Credentials claiming the given cluster via `spec.clusterName`.
    async fn list_cluster_credentials(&self, cluster_name: &str)
        -> Result<Vec<ClusterCredential>>;
    async fn create_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential>;
    async fn update_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential>;
    async fn delete_cluster_credential(&self, name: &str) -> Result<()>;
}

/// Control-plane client backed by `kube::Api`.
pub struct KubePlatform {
    clusters: Api<Cluster>,
    credentials: Api<ClusterCredential>,
    limiter: RateLimiter,
}

impl KubePlatform {
    pub fn new(client: kube::Client, qps: f32, burst: u32) -> Self {
        Self {
            clusters: Api::all(client.clone()),
            credentials: Api::all(client),
            limiter: RateLimiter::new(qps, burst),
        }
    }
}

#[async_trait]
impl PlatformClient for KubePlatform {
    async fn get_cluster(&self, name: &str) -> Result<Cluster> {
        self.limiter.throttle().await;
        self.clusters
            .get(name)
            .await
            .map_err(|e| classify(e, "Cluster", name))
    }

    async fn update_cluster(&self, cluster: &Cluster) -> Result<Cluster> {
        self.limiter.throttle().await;
        let name = cluster.name_any();
        self.clusters
            .replace(&name, &PostParams::default(), cluster)
            .await
            .map_err(|e| classify(e, "Cluster", &name))
    }

    async fn patch_cluster(&self, name: &str, patch: &serde_json::Value) -> Result<Cluster> {
        self.limiter.throttle().await;
        self.clusters
            .patch(name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .map_err(|e| classify(e, "Cluster", name))
    }

    async fn get_cluster_credential(&self, name: &str) -> Result<ClusterCredential> {
        self.limiter.throttle().await;
        self.credentials
            .get(name)
            .await
            .map_err(|e| classify(e, "ClusterCredential", name))
    }

    async fn list_cluster_credentials(
        &self,
        cluster_name: &str,
    ) -> Result<Vec<ClusterCredential>> {
        self.limiter.throttle().await;
        let params = ListParams::default().fields(&format!("spec.clusterName={cluster_name}"));
        let list = self
            .credentials
            .list(&params)
            .await
            .map_err(|e| classify(e, "ClusterCredential", cluster_name))?;
        Ok(list.items)
    }

    async fn create_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential> {
        self.limiter.throttle().await;
        let name = credential.name_any();
        self.credentials
            .create(&PostParams::default(), credential)
            .await
            .map_err(|e| classify(e, "ClusterCredential", &name))
    }

    async fn update_cluster_credential(
        &self,
        credential: &ClusterCredential,
    ) -> Result<ClusterCredential> {
        self.limiter.throttle().await;
        let name = credential.name_any();
        self.credentials
            .replace(&name, &PostParams::default(), credential)
            .await
            .map_err(|e| classify(e, "ClusterCredential", &name))
    }

    async fn delete_cluster_credential(&self, name: &str) -> Result<()> {
        self.limiter.throttle().await;
        self.credentials
            .delete(name, &DeleteParams::default())
            .await
            .map(|_| ())
            .map_err(|e| classify(e, "ClusterCredential", name))
    }
}

/// Normalize a kube error into the crate's canonical classification.
fn classify(err: kube::Error, kind: &'static str, name: &str) -> Error {
    if let kube::Error::Api(response) = &err {
        match response.reason.as_str() {
            "NotFound" => {
                return Error::NotFound {
                    kind,
                    name: name.to_string(),
                }
            }
            "AlreadyExists" => {
                return Error::AlreadyExists {
                    kind,
                    name: name.to_string(),
                }
            }
            "Conflict" => {
                return Error::Conflict {
                    kind,
                    name: name.to_string(),
                }
            }
            _ => {}
        }
    }
    Error::Api(err)
}
