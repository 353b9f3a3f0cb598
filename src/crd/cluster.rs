//! Cluster custom resource.
//!
//! A `Cluster` is a cluster-scoped record of a managed Kubernetes cluster.
//! Its spec names the provider responsible for it and (once provisioned) a
//! reference to the `ClusterCredential` holding its access material; its
//! status carries the lifecycle phase, the observed version and the
//! conditions maintained by the controller.

use k8s_openapi::api::core::v1::LocalObjectReference;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Cluster type handled without pre-created credentials: the credential is
/// supplied out-of-band after the cluster object is registered.
pub const IMPORTED_CLUSTER_TYPE: &str = "Imported";

#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "platform.armada.dev",
    version = "v1",
    kind = "Cluster",
    status = "ClusterStatus",
    shortname = "cls",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Version","type":"string","jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Provider key, e.g. "Baremetal" or "Imported".
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Desired Kubernetes version, if the provider supports pinning one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Reference to the ClusterCredential carrying access material for this
    /// cluster. Set by the controller during provisioning; may be nil for
    /// imported clusters until their credential arrives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_credential_ref: Option<LocalObjectReference>,
}

/// Top-level lifecycle state of a Cluster.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ClusterPhase {
    #[default]
    Initializing,
    Running,
    Failed,
    Terminating,
}

impl std::fmt::Display for ClusterPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            ClusterPhase::Initializing => "Initializing",
            ClusterPhase::Running => "Running",
            ClusterPhase::Failed => "Failed",
            ClusterPhase::Terminating => "Terminating",
        };
        write!(f, "{phase}")
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

/// A typed observation about one aspect of a cluster.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    /// RFC 3339 timestamp of the last probe that produced this condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_probe_time: Option<String>,
    /// RFC 3339 timestamp of the last status flip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum AddressType {
    /// Load-balanced endpoint published to tenants.
    Advertise,
    /// Direct apiserver endpoint.
    Real,
    /// Auxiliary endpoint kept for support tooling.
    Support,
}

/// An endpoint through which a cluster's apiserver is reachable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterAddress {
    #[serde(rename = "type")]
    pub type_: AddressType,
    pub host: String,
    pub port: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,
    /// Kubernetes version reported by the cluster's apiserver.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<ClusterCondition>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<ClusterAddress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Cluster {
    /// Current phase; a cluster without status is still Initializing.
    pub fn phase(&self) -> ClusterPhase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    pub fn status_mut(&mut self) -> &mut ClusterStatus {
        self.status.get_or_insert_with(ClusterStatus::default)
    }

    /// Name of the referenced ClusterCredential, if the ref is set.
    pub fn credential_name(&self) -> Option<&str> {
        self.spec
            .cluster_credential_ref
            .as_ref()
            .and_then(|r| r.name.as_deref())
    }

    /// Endpoint used to reach this cluster's apiserver: the advertise
    /// address when published, otherwise the real one.
    pub fn apiserver_address(&self) -> Option<&ClusterAddress> {
        let addresses = &self.status.as_ref()?.addresses;
        addresses
            .iter()
            .find(|a| a.type_ == AddressType::Advertise)
            .or_else(|| addresses.iter().find(|a| a.type_ == AddressType::Real))
    }
}
