//! Runner Pod assembly from bootstrap parameters.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, EmptyDirVolumeSource, EnvVar, LocalObjectReference, Pod, PodSpec,
    ResourceRequirements, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tracing::debug;

use crate::config::{PodTemplate, ProviderConfig};
use crate::error::{ProviderError, Result};
use crate::params::BootstrapInstance;
use crate::scope::GitHubScope;

pub const RUNNER_CONTAINER_NAME: &str = "runner";
pub const RUNNER_VOLUME_NAME: &str = "runner";
pub const RUNNER_VOLUME_MOUNT_PATH: &str = "/runner";
pub const RUNNER_WORKDIR: &str = "/runner/_work/";

/// Builds the base runner Pod that the configured template is merged over.
pub struct RunnerPodBuilder<'a> {
    registry: &'a str,
    namespace: &'a str,
    template: &'a PodTemplate,
    image_pull_secrets: &'a [String],
}

impl<'a> RunnerPodBuilder<'a> {
    #[must_use]
    pub fn new(config: &'a ProviderConfig) -> Self {
        Self {
            registry: &config.container_registry,
            namespace: &config.runner_namespace,
            template: &config.pod_template,
            image_pull_secrets: &config.image_pull_secrets,
        }
    }

    /// Assemble the runner Pod.
    ///
    /// The scratch volume and its mount are skipped when the template
    /// already declares them, so the merge never produces duplicates.
    pub fn build(
        &self,
        bootstrap: &BootstrapInstance,
        labels: BTreeMap<String, String>,
        resources: ResourceRequirements,
        scope: &GitHubScope,
    ) -> Result<Pod> {
        let pod_name = bootstrap.name.to_lowercase();
        let image = full_image_path(self.registry, &bootstrap.image);
        debug!(pod = %pod_name, image = %image, "Building runner pod");

        let runner = Container {
            name: RUNNER_CONTAINER_NAME.to_string(),
            image: Some(image),
            image_pull_policy: Some("Always".to_string()),
            resources: Some(resources),
            env: Some(runner_env(scope, bootstrap)),
            ..Default::default()
        };

        let image_pull_secrets = (!self.image_pull_secrets.is_empty()).then(|| {
            self.image_pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect()
        });

        let mut pod = Pod {
            metadata: ObjectMeta {
                name: Some(pod_name),
                namespace: Some(self.namespace.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            spec: Some(PodSpec {
                restart_policy: Some("Never".to_string()),
                containers: vec![runner],
                image_pull_secrets,
                ..Default::default()
            }),
            ..Default::default()
        };

        self.add_runner_volume(&mut pod)?;
        Ok(pod)
    }

    fn add_runner_volume(&self, pod: &mut Pod) -> Result<()> {
        let pod_name = pod.metadata.name.clone().unwrap_or_default();
        let spec = pod
            .spec
            .as_mut()
            .filter(|spec| !spec.containers.is_empty())
            .ok_or(ProviderError::MissingContainerSpec(pod_name))?;

        if !template_declares_runner_volume(self.template) {
            spec.volumes.get_or_insert_with(Vec::new).push(Volume {
                name: RUNNER_VOLUME_NAME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            });
        }

        if !template_declares_runner_mount(self.template) {
            spec.containers[0]
                .volume_mounts
                .get_or_insert_with(Vec::new)
                .push(VolumeMount {
                    name: RUNNER_VOLUME_NAME.to_string(),
                    mount_path: RUNNER_VOLUME_MOUNT_PATH.to_string(),
                    ..Default::default()
                });
        }
        Ok(())
    }
}

fn template_declares_runner_volume(template: &PodTemplate) -> bool {
    template
        .spec()
        .spec
        .as_ref()
        .and_then(|spec| spec.volumes.as_ref())
        .is_some_and(|volumes| volumes.iter().any(|v| v.name == RUNNER_VOLUME_NAME))
}

fn template_declares_runner_mount(template: &PodTemplate) -> bool {
    let Some(spec) = template.spec().spec.as_ref() else {
        return false;
    };
    let runner_path = clean_path(RUNNER_VOLUME_MOUNT_PATH);
    spec.containers
        .iter()
        .filter(|c| c.name == RUNNER_CONTAINER_NAME)
        .filter_map(|c| c.volume_mounts.as_ref())
        .flatten()
        .any(|m| m.name == RUNNER_VOLUME_NAME || clean_path(&m.mount_path) == runner_path)
}

/// Environment handed to the runner container, in a fixed order.
#[must_use]
pub fn runner_env(scope: &GitHubScope, bootstrap: &BootstrapInstance) -> Vec<EnvVar> {
    [
        ("RUNNER_ORG", scope.org().to_string()),
        ("RUNNER_REPO", scope.repo().to_string()),
        ("RUNNER_ENTERPRISE", scope.enterprise().to_string()),
        ("RUNNER_GROUP", bootstrap.github_runner_group.clone()),
        ("RUNNER_NAME", bootstrap.name.clone()),
        ("RUNNER_LABELS", bootstrap.labels.join(",")),
        ("RUNNER_WORKDIR", RUNNER_WORKDIR.to_string()),
        ("GITHUB_URL", scope.base_url.clone()),
        ("RUNNER_EPHEMERAL", "true".to_string()),
        // Registration happens through the metadata/callback URLs.
        ("RUNNER_TOKEN", "dummy".to_string()),
        ("METADATA_URL", bootstrap.metadata_url.clone()),
        ("BEARER_TOKEN", bootstrap.instance_token.clone()),
        ("CALLBACK_URL", bootstrap.callback_url.clone()),
    ]
    .into_iter()
    .map(|(name, value)| EnvVar {
        name: name.to_string(),
        value: Some(value),
        ..Default::default()
    })
    .collect()
}

/// Join the cleaned registry path with `image`; an empty registry leaves
/// the image untouched.
#[must_use]
pub fn full_image_path(registry: &str, image: &str) -> String {
    let registry = clean_path(registry);
    if registry.is_empty() || registry == "." {
        return image.to_string();
    }
    format!("{registry}/{image}")
}

/// Lexically clean a slash separated path: drop empty and `.` segments,
/// resolve `..`, strip trailing slashes. `/runner/` and `/runner` compare equal.
#[must_use]
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if segments.last().is_some_and(|s| *s != "..") {
                    segments.pop();
                } else if !rooted {
                    segments.push("..");
                }
            }
            s => segments.push(s),
        }
    }

    let joined = segments.join("/");
    if rooted {
        format!("/{joined}")
    } else {
        joined
    }
}
