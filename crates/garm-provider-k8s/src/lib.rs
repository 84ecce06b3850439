//! GARM external provider for Kubernetes.
//!
//! Every runner instance GARM asks for becomes one Pod. The Pod is built
//! from the bootstrap request, a configured Pod template is strategically
//! merged over it, and instance identity is carried in Pod labels so that
//! the cluster stays the only source of truth.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use garm_provider_k8s::{cluster, KubeClusterClient, KubernetesProvider, Provider, ProviderConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(ProviderConfig::from_file("/etc/garm/k8s.yaml".as_ref())?);
//!     let client = cluster::connect(config.kube_config_path.as_deref()).await?;
//!     let provider = KubernetesProvider::new(KubeClusterClient::new(client), config, "controller", None);
//!
//!     for instance in provider.list_instances("pool-id").await? {
//!         println!("{} {}", instance.name, instance.status);
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod cluster;
pub mod config;
pub mod error;
pub mod execution;
pub mod flavor;
pub mod instance;
pub mod labels;
pub mod merge;
pub mod params;
pub mod pod;
pub mod provider;
pub mod scope;

pub use cluster::{ClusterClient, KubeClusterClient};
pub use config::{PodTemplate, ProviderConfig};
pub use error::{ProviderError, Result};
pub use params::{BootstrapInstance, InstanceStatus, OsArch, OsType, ProviderInstance};
pub use provider::{KubernetesProvider, Provider};
pub use scope::GitHubScope;
