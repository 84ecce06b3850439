//! Kubernetes access used by the provider.
//!
//! The [`ClusterClient`] trait keeps the provider testable; production code
//! goes through [`KubeClusterClient`] on top of `kube::Api`.

use std::path::Path;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use tracing::{debug, info};

#[cfg(test)]
use mockall::automock;

use crate::error::{ProviderError, Result};

/// Cluster operations the provider depends on.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Create the namespace unless it already exists.
    async fn ensure_namespace(&self, name: &str) -> Result<()>;

    /// Submit a Pod.
    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod>;

    /// List Pods in `namespace` matching an equality label selector.
    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>>;

    /// List Pods in every namespace matching an equality label selector.
    async fn list_pods_all_namespaces(&self, selector: &str) -> Result<Vec<Pod>>;

    /// Delete a Pod. An absent Pod yields [`ProviderError::NotFound`].
    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}

/// Build a client from an explicit kubeconfig, or from the environment
/// (in-cluster service account, then `$KUBECONFIG` / `~/.kube/config`).
pub async fn connect(kube_config_path: Option<&Path>) -> Result<Client> {
    let Some(path) = kube_config_path else {
        debug!("Using inferred kubernetes configuration");
        return Ok(Client::try_default().await?);
    };

    debug!(path = %path.display(), "Using kubeconfig file");
    let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
        ProviderError::Config(format!("Failed to read kubeconfig {}: {e}", path.display()))
    })?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| ProviderError::Config(format!("Invalid kubeconfig {}: {e}", path.display())))?;
    Ok(Client::try_from(config)?)
}

/// [`ClusterClient`] backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
}

impl KubeClusterClient {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn ensure_namespace(&self, name: &str) -> Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        if namespaces.get_opt(name).await?.is_some() {
            return Ok(());
        }

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        match namespaces.create(&PostParams::default(), &namespace).await {
            Ok(_) => {
                info!(namespace = %name, "Created runner namespace");
                Ok(())
            }
            // Created concurrently by another invocation.
            Err(kube::Error::Api(ae)) if ae.code == 409 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn create_pod(&self, namespace: &str, pod: &Pod) -> Result<Pod> {
        Ok(self.pods(namespace).create(&PostParams::default(), pod).await?)
    }

    async fn list_pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>> {
        let list = self
            .pods(namespace)
            .list(&ListParams::default().labels(selector))
            .await?;
        Ok(list.items)
    }

    async fn list_pods_all_namespaces(&self, selector: &str) -> Result<Vec<Pod>> {
        let pods: Api<Pod> = Api::all(self.client.clone());
        let list = pods.list(&ListParams::default().labels(selector)).await?;
        Ok(list.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        match self.pods(namespace).delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Err(ProviderError::NotFound(format!(
                "pod {name} in namespace {namespace}"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
