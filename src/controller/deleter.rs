//! Finalizer-driven teardown of terminating clusters.

use std::sync::Arc;

use kube::ResourceExt;
use tracing::info;

use crate::crd::Cluster;
use crate::error::Result;
use crate::platform::PlatformClient;

use super::split_key;

/// Cleans up after a cluster marked for deletion and releases the
/// controller's finalizer so the API server can collect the object.
///
/// `delete` is invoked every time a Terminating cluster is synced, so every
/// step tolerates having already run: missing objects are ignored and the
/// finalizer is only rewritten while it is still present.
pub struct ClusterDeleter {
    client: Arc<dyn PlatformClient>,
    finalizer_token: String,
    delete_credentials: bool,
}

impl ClusterDeleter {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        finalizer_token: impl Into<String>,
        delete_credentials: bool,
    ) -> Self {
        Self {
            client,
            finalizer_token: finalizer_token.into(),
            delete_credentials,
        }
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        let (_, name) = split_key(key)?;

        // Work from the live object, not the cache: finalizer removal must
        // see the newest resourceVersion.
        let cluster = match self.client.get_cluster(name).await {
            Err(err) if err.is_not_found() => return Ok(()),
            other => other?,
        };
        if cluster.metadata.deletion_timestamp.is_none() {
            return Ok(());
        }

        if self.delete_credentials {
            self.delete_cluster_credentials(&cluster).await?;
        }
        self.remove_finalizer(cluster).await
    }

    async fn delete_cluster_credentials(&self, cluster: &Cluster) -> Result<()> {
        if let Some(name) = cluster.credential_name() {
            self.delete_credential(name).await?;
        }
        for credential in self
            .client
            .list_cluster_credentials(&cluster.name_any())
            .await?
        {
            self.delete_credential(&credential.name_any()).await?;
        }
        Ok(())
    }

    async fn delete_credential(&self, name: &str) -> Result<()> {
        match self.client.delete_cluster_credential(name).await {
            Err(err) if !err.is_not_found() => Err(err),
            _ => Ok(()),
        }
    }

    async fn remove_finalizer(&self, mut cluster: Cluster) -> Result<()> {
        let finalizers = cluster.metadata.finalizers.take().unwrap_or_default();
        if !finalizers.iter().any(|f| *f == self.finalizer_token) {
            cluster.metadata.finalizers = Some(finalizers);
            return Ok(());
        }

        let remaining: Vec<String> = finalizers
            .into_iter()
            .filter(|f| *f != self.finalizer_token)
            .collect();
        cluster.metadata.finalizers = if remaining.is_empty() {
            None
        } else {
            Some(remaining)
        };

        info!(cluster = %cluster.name_any(), "releasing finalizer");
        match self.client.update_cluster(&cluster).await {
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
            Ok(_) => Ok(()),
        }
    }
}
