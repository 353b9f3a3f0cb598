//! Per-cluster reconciliation: phase dispatch and credential lifecycle.

use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::info;

use crate::crd::{
    Cluster, ClusterCredential, ClusterCredentialSpec, ClusterPhase, IMPORTED_CLUSTER_TYPE,
};
use crate::error::{Error, Result};

use super::provider::ClusterWrapper;
use super::{metrics, split_key, Controller};

impl Controller {
    /// Sync one cluster by key. Not meant to be invoked concurrently for
    /// the same key; the work queue guarantees that.
    pub(crate) async fn sync_cluster(&self, key: &str) -> Result<()> {
        let start = Instant::now();
        let (_, name) = split_key(key)?;

        let result = match self.cache.get(name) {
            None => {
                info!(cluster = %key, "cluster has been deleted");
                Ok(())
            }
            Some(cluster) => self.reconcile(key, &cluster).await,
        };

        let elapsed = start.elapsed();
        metrics::observe_sync_duration(elapsed.as_secs_f64());
        info!(cluster = %key, ?elapsed, "finished syncing cluster");
        result
    }

    async fn reconcile(&self, key: &str, cluster: &Cluster) -> Result<()> {
        let mut cluster = cluster.clone();
        self.ensure_sync_old_cluster_credential(&mut cluster).await?;

        match cluster.phase() {
            ClusterPhase::Initializing => self.on_create(&mut cluster).await,
            ClusterPhase::Running | ClusterPhase::Failed => self.on_update(&mut cluster).await,
            ClusterPhase::Terminating => {
                info!(cluster = %key, "cluster has been terminated, cleaning up resources");
                let result = self.deleter.delete(key).await;
                if result.is_ok() {
                    info!(cluster = %key, "cluster cleanup finished");
                }
                result
            }
        }
    }

    /// Backfill `spec.clusterCredentialRef` on clusters created before the
    /// ref existed, using the legacy field-selector relationship.
    async fn ensure_sync_old_cluster_credential(&self, cluster: &mut Cluster) -> Result<()> {
        if cluster.spec.cluster_credential_ref.is_some() {
            return Ok(());
        }

        let credentials = self
            .client
            .list_cluster_credentials(&cluster.name_any())
            .await?;
        let Some(credential) = credentials.into_iter().next() else {
            if cluster.spec.type_ == IMPORTED_CLUSTER_TYPE {
                // imported clusters get their credential pushed separately;
                // retry until it shows up
                return Err(Error::CredentialPending);
            }
            return Ok(());
        };

        cluster.spec.cluster_credential_ref = Some(LocalObjectReference {
            name: Some(credential.name_any()),
        });
        *cluster = self.client.update_cluster(cluster).await?;
        Ok(())
    }

    /// Guarantee the cluster has a credential and a valid back-reference
    /// before provisioning starts.
    async fn ensure_cluster_credential(&self, cluster: &mut Cluster) -> Result<()> {
        match cluster.credential_name().map(str::to_string) {
            None => {
                if cluster.spec.type_ == IMPORTED_CLUSTER_TYPE {
                    return Ok(());
                }

                let name = ClusterCredential::name_for(&cluster.name_any());
                let credential = ClusterCredential::new(
                    &name,
                    ClusterCredentialSpec {
                        tenant_id: cluster.spec.tenant_id.clone(),
                        cluster_name: cluster.name_any(),
                        ..Default::default()
                    },
                );
                if let Err(err) = self.client.create_cluster_credential(&credential).await {
                    if !err.is_already_exists() {
                        return Err(err);
                    }
                }
                cluster.spec.cluster_credential_ref =
                    Some(LocalObjectReference { name: Some(name) });
                *cluster = self.client.update_cluster(cluster).await?;
            }
            Some(name) => {
                let mut credential = self.client.get_cluster_credential(&name).await?;
                if credential.spec.cluster_name != cluster.name_any() {
                    credential.spec.cluster_name = cluster.name_any();
                    self.client.update_cluster_credential(&credential).await?;
                }
            }
        }
        Ok(())
    }

    async fn on_create(&self, cluster: &mut Cluster) -> Result<()> {
        let provider = self.registry.get(&cluster.spec.type_)?;
        self.ensure_cluster_credential(cluster).await?;
        let mut wrapper = ClusterWrapper::load(self.client.as_ref(), cluster).await?;

        // Keep driving the provider until it moves the phase or fails. Each
        // step's mutations are persisted even when the step itself failed.
        while wrapper.cluster.phase() == ClusterPhase::Initializing {
            let provider_err = provider.on_create(&mut wrapper).await.err();
            let err = self.persist(&mut wrapper).await.err().or(provider_err);
            if let Some(err) = err {
                return Err(err);
            }
        }

        if matches!(
            wrapper.cluster.phase(),
            ClusterPhase::Running | ClusterPhase::Failed
        ) {
            self.health.ensure_started(&wrapper.name());
        }
        Ok(())
    }

    async fn on_update(&self, cluster: &mut Cluster) -> Result<()> {
        let provider = self.registry.get(&cluster.spec.type_)?;
        let mut wrapper = ClusterWrapper::load(self.client.as_ref(), cluster).await?;
        self.health.ensure_started(&wrapper.name());

        let provider_err = provider.on_update(&mut wrapper).await.err();
        match self.persist(&mut wrapper).await.err().or(provider_err) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Write the wrapper's credential and cluster back, refreshing the
    /// wrapper from the stored objects so follow-up writes carry current
    /// resource versions. Returns the last error encountered.
    async fn persist(&self, wrapper: &mut ClusterWrapper) -> Result<()> {
        let mut result = Ok(());
        if let Some(credential) = wrapper.credential.clone() {
            match self.client.update_cluster_credential(&credential).await {
                Ok(stored) => wrapper.credential = Some(stored),
                Err(err) => result = Err(err),
            }
        }
        match self.client.update_cluster(&wrapper.cluster).await {
            Ok(stored) => wrapper.cluster = stored,
            Err(err) => result = Err(err),
        }
        result
    }
}
