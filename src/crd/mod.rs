//! Custom resource definitions for the Armada platform API group.

mod cluster;
mod cluster_credential;


pub use cluster::{
    AddressType, Cluster, ClusterAddress, ClusterCondition, ClusterPhase, ClusterSpec,
    ClusterStatus, ConditionStatus, IMPORTED_CLUSTER_TYPE,
};
pub use cluster_credential::{ClusterCredential, ClusterCredentialSpec};
