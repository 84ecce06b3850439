//! Error types shared by every provider operation.

use thiserror::Error;

/// Errors that can occur while translating instances to Pods and back.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Repository URL could not be classified into an org/repo/enterprise scope.
    #[error("Invalid scope URL '{url}': {reason}")]
    InvalidScope { url: String, reason: String },

    /// The runner Pod ended up without any container.
    #[error("Pod {0} has no runner container spec")]
    MissingContainerSpec(String),

    /// Instance (or Kubernetes object) does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// More than one Pod carries the identity of a single instance.
    #[error("Instance {instance} is ambiguous: {count} pods match")]
    AmbiguousInstance { instance: String, count: usize },

    /// Pod template could not be merged over the generated Pod.
    #[error("Failed to merge pod template: {0}")]
    MergeFailure(String),

    /// Pod carries neither the runner name label nor a name.
    #[error("Pod has no identity: missing label {0} and no pod name")]
    MissingIdentityLabel(&'static str),

    /// Operation is not supported by this provider.
    #[error("{0} is not supported by the kubernetes provider")]
    Unsupported(String),

    /// Invocation environment is missing a required value.
    #[error("Invalid execution environment: {0}")]
    InvalidEnvironment(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Kubernetes API call failed.
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProviderError {
    /// Returns `true` when the error means the target object is absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type used throughout the crate.
pub type Result<T, E = ProviderError> = std::result::Result<T, E>;
