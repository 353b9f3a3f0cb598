//! Error types shared across the controller.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error classification for the controller.
///
/// API errors from the control-plane are normalized into the
/// `NotFound`/`AlreadyExists`/`Conflict` variants so that callers can branch
/// on them without inspecting transport details.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{kind} {name:?} not found")]
    NotFound { kind: &'static str, name: String },

    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: &'static str, name: String },

    #[error("conflict writing {kind} {name:?}")]
    Conflict { kind: &'static str, name: String },

    #[error("api request failed: {0}")]
    Api(#[source] kube::Error),

    #[error("no cluster provider registered for type {0:?}")]
    UnknownProvider(String),

    #[error("{0}")]
    Provider(String),

    #[error("waiting create ClusterCredential")]
    CredentialPending,

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("{0}")]
    HealthCheck(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("failed to wait for cluster cache to sync")]
    CacheNotSynced,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::AlreadyExists { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Short stable label for error metrics.
    pub fn metric_kind(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::AlreadyExists { .. } => "already_exists",
            Error::Conflict { .. } => "conflict",
            Error::Api(_) => "api",
            Error::UnknownProvider(_) => "unknown_provider",
            Error::Provider(_) => "provider",
            Error::CredentialPending => "credential_pending",
            Error::InvalidKey(_) => "invalid_key",
            Error::HealthCheck(_) => "health_check",
            Error::Serialization(_) => "serialization",
            Error::CacheNotSynced => "cache_not_synced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_helpers() {
        let err = Error::NotFound {
            kind: "Cluster",
            name: "c1".to_string(),
        };
        assert!(err.is_not_found());
        assert!(!err.is_already_exists());
        assert!(!err.is_conflict());
        assert_eq!(err.metric_kind(), "not_found");
    }

    #[test]
    fn credential_pending_message() {
        assert_eq!(
            Error::CredentialPending.to_string(),
            "waiting create ClusterCredential"
        );
    }
}
