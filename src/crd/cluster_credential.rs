//! ClusterCredential custom resource.
//!
//! Access material for one managed cluster. The credential points back at
//! its cluster through `spec.clusterName`; the cluster points forward
//! through `spec.clusterCredentialRef`. Neither side owns the other, and
//! both references are repaired lazily by the controller.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.armada.dev",
    version = "v1",
    kind = "ClusterCredential",
    shortname = "cc",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Cluster","type":"string","jsonPath":".spec.clusterName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCredentialSpec {
    #[serde(default)]
    pub tenant_id: String,
    /// Name of the Cluster this credential belongs to.
    #[serde(default)]
    pub cluster_name: String,
    /// PEM-encoded CA bundle for the cluster's apiserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<String>,
    /// Bearer token for the cluster's apiserver.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<String>,
}

impl ClusterCredential {
    /// Deterministic credential name for a cluster, so that creation can be
    /// retried safely across partial syncs.
    pub fn name_for(cluster_name: &str) -> String {
        format!("cc-{cluster_name}")
    }
}
