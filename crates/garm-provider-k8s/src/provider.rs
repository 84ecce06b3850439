//! Instance lifecycle on top of Kubernetes Pods.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use k8s_openapi::api::core::v1::Pod;
use tracing::{debug, error, info, instrument, warn};

#[cfg(test)]
use mockall::automock;

use crate::cluster::ClusterClient;
use crate::config::ProviderConfig;
use crate::error::{ProviderError, Result};
use crate::flavor;
use crate::instance::{matches_instance, to_instance};
use crate::labels::{identity_labels, scope_selector, to_selector};
use crate::merge::merge_pod_template;
use crate::params::{BootstrapInstance, InstanceStatus, ProviderInstance};
use crate::pod::RunnerPodBuilder;
use crate::scope::GitHubScope;

/// Lifecycle contract GARM drives an external provider through.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Create a runner instance.
    async fn create_instance(&self, bootstrap: BootstrapInstance) -> Result<ProviderInstance>;

    /// Get an instance by name or provider id.
    async fn get_instance(&self, instance: &str) -> Result<ProviderInstance>;

    /// List all instances of a pool.
    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>>;

    /// Delete an instance. Deleting an absent instance succeeds.
    async fn delete_instance(&self, instance: &str) -> Result<()>;

    /// Delete every instance owned by this controller, best effort.
    async fn remove_all_instances(&self) -> Result<()>;

    /// Stop an instance.
    async fn stop(&self, instance: &str, force: bool) -> Result<()>;

    /// Start a stopped instance.
    async fn start(&self, instance: &str) -> Result<()>;
}

/// [`Provider`] that runs every instance as a single Pod.
pub struct KubernetesProvider<C> {
    client: C,
    config: Arc<ProviderConfig>,
    controller_id: String,
    pool_id: Option<String>,
}

impl<C: ClusterClient> KubernetesProvider<C> {
    #[must_use]
    pub fn new(
        client: C,
        config: Arc<ProviderConfig>,
        controller_id: impl Into<String>,
        pool_id: Option<String>,
    ) -> Self {
        Self {
            client,
            config,
            controller_id: controller_id.into(),
            pool_id: pool_id.filter(|p| !p.is_empty()),
        }
    }

    fn namespace(&self) -> &str {
        &self.config.runner_namespace
    }

    /// Build and merge the Pod for `bootstrap` without touching the cluster.
    pub fn render_pod(&self, bootstrap: &BootstrapInstance) -> Result<Pod> {
        let scope = GitHubScope::classify(&bootstrap.repo_url)?;
        let labels = identity_labels(&self.controller_id, bootstrap);
        let resources = flavor::resolve(&bootstrap.flavor, self.config.flavors.as_ref());

        let base = RunnerPodBuilder::new(&self.config).build(bootstrap, labels, resources, &scope)?;
        let pod = merge_pod_template(&base, &self.config.pod_template)?;

        if pod.spec.as_ref().is_none_or(|spec| spec.containers.is_empty()) {
            return Err(ProviderError::MissingContainerSpec(
                pod.metadata.name.clone().unwrap_or_default(),
            ));
        }
        Ok(pod)
    }

    /// Find the single Pod of `instance` within this controller's scope.
    async fn find_instance_pod(&self, instance: &str) -> Result<Option<Pod>> {
        let selector = to_selector(&scope_selector(&self.controller_id, self.pool_id.as_deref()));
        let mut matches: Vec<Pod> = self
            .client
            .list_pods(self.namespace(), &selector)
            .await?
            .into_iter()
            .filter(|pod| matches_instance(pod, instance))
            .collect();

        match matches.len() {
            0 => Ok(None),
            1 => Ok(matches.pop()),
            count => Err(ProviderError::AmbiguousInstance {
                instance: instance.to_string(),
                count,
            }),
        }
    }
}

#[async_trait]
impl<C: ClusterClient> Provider for KubernetesProvider<C> {
    #[instrument(skip(self, bootstrap), fields(instance = %bootstrap.name, pool = %bootstrap.pool_id))]
    async fn create_instance(&self, bootstrap: BootstrapInstance) -> Result<ProviderInstance> {
        let pod = self.render_pod(&bootstrap)?;
        let namespace = self.namespace();

        self.client.ensure_namespace(namespace).await?;
        let created = self.client.create_pod(namespace, &pod).await?;
        info!(
            pod = ?created.metadata.name,
            namespace = %namespace,
            "Created runner pod"
        );

        // GARM expects a usable handle right away, whatever the Pod phase.
        to_instance(&created, Some(InstanceStatus::Running))
    }

    #[instrument(skip(self))]
    async fn get_instance(&self, instance: &str) -> Result<ProviderInstance> {
        let pod = self.find_instance_pod(instance).await?.ok_or_else(|| {
            ProviderError::NotFound(format!(
                "instance {instance} in namespace {}",
                self.namespace()
            ))
        })?;
        to_instance(&pod, None)
    }

    #[instrument(skip(self))]
    async fn list_instances(&self, pool_id: &str) -> Result<Vec<ProviderInstance>> {
        let selector = to_selector(&scope_selector(&self.controller_id, Some(pool_id)));
        let pods = self.client.list_pods(self.namespace(), &selector).await?;
        debug!(count = pods.len(), "Listed pool pods");
        pods.iter().map(|pod| to_instance(pod, None)).collect()
    }

    #[instrument(skip(self))]
    async fn delete_instance(&self, instance: &str) -> Result<()> {
        let Some(pod) = self.find_instance_pod(instance).await? else {
            info!("Instance already absent");
            return Ok(());
        };
        let name = pod.metadata.name.clone().unwrap_or_default();
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| self.namespace().to_string());

        match self.client.delete_pod(&namespace, &name).await {
            Ok(()) => {
                info!(pod = %name, namespace = %namespace, "Deleted runner pod");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    #[instrument(skip(self), fields(controller = %self.controller_id))]
    async fn remove_all_instances(&self) -> Result<()> {
        let selector = to_selector(&scope_selector(&self.controller_id, None));
        let pods = self.client.list_pods_all_namespaces(&selector).await?;
        info!(count = pods.len(), "Removing all runner pods");

        let deletions = pods.iter().map(|pod| async move {
            let name = pod.metadata.name.clone().unwrap_or_default();
            let namespace = pod
                .metadata
                .namespace
                .clone()
                .unwrap_or_else(|| self.namespace().to_string());
            let result = self.client.delete_pod(&namespace, &name).await;
            (name, namespace, result)
        });

        let mut failures = 0usize;
        for (name, namespace, result) in join_all(deletions).await {
            match result {
                Ok(()) => debug!(pod = %name, namespace = %namespace, "Deleted runner pod"),
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    failures += 1;
                    error!(pod = %name, namespace = %namespace, error = %e, "Failed to delete runner pod");
                }
            }
        }

        if failures > 0 {
            warn!(failures, "Some runner pods could not be deleted");
        }
        Ok(())
    }

    async fn stop(&self, instance: &str, force: bool) -> Result<()> {
        Err(ProviderError::Unsupported(format!(
            "Stop (instance {instance}, force {force})"
        )))
    }

    async fn start(&self, instance: &str) -> Result<()> {
        Err(ProviderError::Unsupported(format!("Start (instance {instance})")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MockClusterClient;
    use crate::config::PodTemplate;
    use crate::labels::{CONTROLLER_ID_LABEL, POOL_ID_LABEL, RUNNER_NAME_LABEL};
    use k8s_openapi::api::core::v1::PodStatus;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn config() -> Arc<ProviderConfig> {
        Arc::new(ProviderConfig {
            container_registry: "localhost:5000".to_string(),
            ..Default::default()
        })
    }

    fn bootstrap() -> BootstrapInstance {
        BootstrapInstance {
            name: "garm-abc".to_string(),
            pool_id: "pool-1".to_string(),
            flavor: "small".to_string(),
            image: "runner:ubuntu-22.04".to_string(),
            repo_url: "https://github.com/testorg".to_string(),
            ..Default::default()
        }
    }

    fn runner_pod(name: &str, namespace: &str, phase: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(BTreeMap::from([
                    (RUNNER_NAME_LABEL.to_string(), name.to_string()),
                    (CONTROLLER_ID_LABEL.to_string(), "ctrl".to_string()),
                    (POOL_ID_LABEL.to_string(), "pool-1".to_string()),
                ])),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some(phase.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn env_value(pod: &Pod, name: &str) -> Option<String> {
        pod.spec.as_ref()?.containers[0]
            .env
            .as_ref()?
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.value.clone())
    }

    #[tokio::test]
    async fn test_create_instance_end_to_end() {
        let mut client = MockClusterClient::new();
        client
            .expect_ensure_namespace()
            .withf(|ns| ns == "runner")
            .times(1)
            .returning(|_| Ok(()));
        client
            .expect_create_pod()
            .withf(|ns, pod| {
                ns == "runner"
                    && pod.spec.as_ref().unwrap().containers[0].image.as_deref()
                        == Some("localhost:5000/runner:ubuntu-22.04")
                    && env_value(pod, "RUNNER_ORG").as_deref() == Some("testorg")
                    && env_value(pod, "RUNNER_REPO").as_deref() == Some("")
            })
            .times(1)
            .returning(|_, pod| {
                let mut created = pod.clone();
                created.status = Some(PodStatus {
                    phase: Some("Pending".to_string()),
                    ..Default::default()
                });
                Ok(created)
            });

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        let instance = provider.create_instance(bootstrap()).await.unwrap();

        assert_eq!(instance.provider_id, "garm-abc");
        assert_eq!(instance.name, "garm-abc");
        assert_eq!(instance.status, InstanceStatus::Running);
    }

    #[tokio::test]
    async fn test_create_instance_invalid_scope_submits_nothing() {
        let mut client = MockClusterClient::new();
        client.expect_ensure_namespace().never();
        client.expect_create_pod().never();

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        let mut bootstrap = bootstrap();
        bootstrap.repo_url = "https://github.com/a/b/c".to_string();

        let err = provider.create_instance(bootstrap).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidScope { .. }));
    }

    #[tokio::test]
    async fn test_create_instance_without_containers_fails() {
        let mut client = MockClusterClient::new();
        client.expect_create_pod().never();
        let config = Arc::new(ProviderConfig {
            pod_template: PodTemplate::from_value(json!({
                "spec": {"containers": [{"name": "runner", "$patch": "delete"}]}
            }))
            .unwrap(),
            ..Default::default()
        });

        let provider = KubernetesProvider::new(client, config, "ctrl", None);
        let err = provider.create_instance(bootstrap()).await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingContainerSpec(_)));
    }

    #[tokio::test]
    async fn test_get_instance() {
        let mut client = MockClusterClient::new();
        let pods = vec![
            runner_pod("garm-abc", "runner", "Running"),
            runner_pod("garm-def", "runner", "Pending"),
        ];
        client
            .expect_list_pods()
            .withf(|ns, selector| ns == "runner" && selector == "garm/controllerID=ctrl,garm/poolID=pool-1")
            .returning(move |_, _| Ok(pods.clone()));

        let provider = KubernetesProvider::new(client, config(), "ctrl", Some("pool-1".to_string()));
        let instance = provider.get_instance("garm-def").await.unwrap();
        assert_eq!(instance.name, "garm-def");
        assert_eq!(instance.status, InstanceStatus::PendingCreate);
    }

    #[tokio::test]
    async fn test_get_instance_not_found() {
        let mut client = MockClusterClient::new();
        client.expect_list_pods().returning(|_, _| Ok(vec![]));

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        let err = provider.get_instance("garm-abc").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_get_instance_ambiguous() {
        let mut client = MockClusterClient::new();
        let pods = vec![
            runner_pod("garm-abc", "runner", "Running"),
            runner_pod("garm-abc", "runner", "Running"),
        ];
        client
            .expect_list_pods()
            .returning(move |_, _| Ok(pods.clone()));

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        let err = provider.get_instance("garm-abc").await.unwrap_err();
        assert!(matches!(
            err,
            ProviderError::AmbiguousInstance { count: 2, .. }
        ));
    }

    #[tokio::test]
    async fn test_list_instances() {
        let mut client = MockClusterClient::new();
        let pods = vec![
            runner_pod("garm-abc", "runner", "Running"),
            runner_pod("garm-def", "runner", "Succeeded"),
        ];
        client
            .expect_list_pods()
            .withf(|_, selector| selector == "garm/controllerID=ctrl,garm/poolID=pool-1")
            .returning(move |_, _| Ok(pods.clone()));

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        let instances = provider.list_instances("pool-1").await.unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[1].status, InstanceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_delete_missing_instance_succeeds() {
        let mut client = MockClusterClient::new();
        client.expect_list_pods().returning(|_, _| Ok(vec![]));
        client.expect_delete_pod().never();

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        provider.delete_instance("garm-missing").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_instance_tolerates_concurrent_removal() {
        let mut client = MockClusterClient::new();
        let pods = vec![runner_pod("garm-abc", "runner", "Running")];
        client
            .expect_list_pods()
            .returning(move |_, _| Ok(pods.clone()));
        client
            .expect_delete_pod()
            .withf(|ns, name| ns == "runner" && name == "garm-abc")
            .times(1)
            .returning(|_, name| Err(ProviderError::NotFound(name.to_string())));

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        provider.delete_instance("garm-abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_instance_surfaces_other_errors() {
        let mut client = MockClusterClient::new();
        let pods = vec![runner_pod("garm-abc", "runner", "Running")];
        client
            .expect_list_pods()
            .returning(move |_, _| Ok(pods.clone()));
        client
            .expect_delete_pod()
            .returning(|_, _| Err(ProviderError::Config("forbidden".to_string())));

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        assert!(provider.delete_instance("garm-abc").await.is_err());
    }

    #[tokio::test]
    async fn test_remove_all_continues_past_failures() {
        let mut client = MockClusterClient::new();
        let pods = vec![
            runner_pod("garm-a", "runner", "Running"),
            runner_pod("garm-b", "team-runners", "Running"),
            runner_pod("garm-c", "runner", "Running"),
        ];
        client
            .expect_list_pods_all_namespaces()
            .withf(|selector| selector == "garm/controllerID=ctrl")
            .returning(move |_| Ok(pods.clone()));
        client
            .expect_delete_pod()
            .times(3)
            .returning(|_, name| {
                if name == "garm-b" {
                    Err(ProviderError::Config("boom".to_string()))
                } else {
                    Ok(())
                }
            });

        let provider = KubernetesProvider::new(client, config(), "ctrl", Some("pool-1".to_string()));
        provider.remove_all_instances().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_all_fails_when_listing_fails() {
        let mut client = MockClusterClient::new();
        client
            .expect_list_pods_all_namespaces()
            .returning(|_| Err(ProviderError::Config("unreachable".to_string())));
        client.expect_delete_pod().never();

        let provider = KubernetesProvider::new(client, config(), "ctrl", None);
        assert!(provider.remove_all_instances().await.is_err());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_unsupported() {
        let provider = KubernetesProvider::new(MockClusterClient::new(), config(), "ctrl", None);
        assert!(matches!(
            provider.stop("garm-abc", true).await,
            Err(ProviderError::Unsupported(_))
        ));
        assert!(matches!(
            provider.start("garm-abc").await,
            Err(ProviderError::Unsupported(_))
        ));
    }
}
