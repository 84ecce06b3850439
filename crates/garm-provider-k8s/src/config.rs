//! Provider configuration
//!
//! Loaded once from the YAML file GARM points us at and handed to the
//! provider as an explicit, read-only value.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value as JsonValue};
use tracing::debug;

use crate::error::ProviderError;
use crate::flavor::FlavorTable;

pub const DEFAULT_RUNNER_NAMESPACE: &str = "runner";

const MAX_DNS_SUBDOMAIN_LENGTH: usize = 253;

lazy_static! {
    static ref DNS_SUBDOMAIN: Regex =
        Regex::new(r"^[a-z0-9]([-a-z0-9]*[a-z0-9])?(\.[a-z0-9]([-a-z0-9]*[a-z0-9])?)*$")
            .expect("static regex compiles");
}

/// Main provider configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Path to a kubeconfig; unset means in-cluster / inferred config
    #[serde(default)]
    pub kube_config_path: Option<PathBuf>,

    /// Registry prefixed to the bootstrap image (e.g. "localhost:5000")
    #[serde(default)]
    pub container_registry: String,

    /// Namespace runner Pods are created in
    #[serde(default = "default_runner_namespace")]
    pub runner_namespace: String,

    /// Pod template merged over every generated runner Pod
    #[serde(default)]
    pub pod_template: PodTemplate,

    /// Flavor -> resource requirements table
    #[serde(default, alias = "flavours", deserialize_with = "deserialize_flavors")]
    pub flavors: Option<FlavorTable>,

    /// Image pull secrets for private registries
    #[serde(default)]
    pub image_pull_secrets: Vec<String>,
}

fn default_runner_namespace() -> String {
    DEFAULT_RUNNER_NAMESPACE.to_string()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            kube_config_path: None,
            container_registry: String::new(),
            runner_namespace: default_runner_namespace(),
            pod_template: PodTemplate::default(),
            flavors: None,
            image_pull_secrets: Vec::new(),
        }
    }
}

impl ProviderConfig {
    /// Load and validate configuration from a YAML file.
    pub fn from_file(config_path: &Path) -> anyhow::Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
        let config = Self::from_yaml(&config_str)?;
        debug!(
            path = %config_path.display(),
            namespace = %config.runner_namespace,
            "Loaded provider configuration"
        );
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn from_yaml(config_str: &str) -> anyhow::Result<Self> {
        let mut config: ProviderConfig = if config_str.trim().is_empty() {
            ProviderConfig::default()
        } else {
            serde_yaml::from_str(config_str).context("Failed to parse config YAML")?
        };

        if config.runner_namespace.is_empty() {
            config.runner_namespace = default_runner_namespace();
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that serde cannot express.
    pub fn validate(&self) -> anyhow::Result<()> {
        validate_namespace(&self.runner_namespace)
            .context("Failed to validate runnerNamespace")?;

        for secret in &self.image_pull_secrets {
            if secret.trim().is_empty() {
                bail!("imagePullSecrets must not contain empty names");
            }
        }
        Ok(())
    }
}

/// Check that `namespace` is a valid DNS-1123 subdomain.
pub fn validate_namespace(namespace: &str) -> anyhow::Result<()> {
    if namespace.len() > MAX_DNS_SUBDOMAIN_LENGTH {
        bail!(
            "namespace {namespace} is invalid: must be no more than {MAX_DNS_SUBDOMAIN_LENGTH} characters"
        );
    }
    if !DNS_SUBDOMAIN.is_match(namespace) {
        bail!(
            "namespace {namespace} is invalid: must consist of lower case alphanumeric characters, '-' or '.', and must start and end with an alphanumeric character"
        );
    }
    Ok(())
}

/// User supplied Pod template.
///
/// The raw document is kept next to the typed view: explicit `null`s and
/// `$patch` directives only exist in the raw form and drive the merge.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PodTemplate {
    raw: JsonValue,
    spec: PodTemplateSpec,
}

impl PodTemplate {
    /// Build a template, rejecting documents that do not decode as a
    /// `PodTemplateSpec`.
    pub fn from_value(raw: JsonValue) -> Result<Self, ProviderError> {
        if raw.is_null() {
            return Ok(Self::default());
        }
        let mut raw = raw;
        // `spec:` left blank in YAML arrives as null and means "no override".
        if let JsonValue::Object(sections) = &mut raw {
            sections.retain(|_, section| !section.is_null());
        }
        normalize_quantities(&mut raw);
        let spec: PodTemplateSpec = serde_json::from_value(raw.clone())
            .map_err(|e| ProviderError::Config(format!("podTemplate is not a valid PodTemplateSpec: {e}")))?;
        Ok(Self { raw, spec })
    }

    /// `true` when merging this template cannot change anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.raw {
            JsonValue::Null => true,
            JsonValue::Object(map) => map.values().all(is_empty_value),
            _ => false,
        }
    }

    #[must_use]
    pub fn raw(&self) -> &JsonValue {
        &self.raw
    }

    #[must_use]
    pub fn spec(&self) -> &PodTemplateSpec {
        &self.spec
    }
}

fn is_empty_value(value: &JsonValue) -> bool {
    match value {
        JsonValue::Null => true,
        JsonValue::Object(map) => map.values().all(is_empty_value),
        _ => false,
    }
}

impl<'de> Deserialize<'de> for PodTemplate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = JsonValue::deserialize(deserializer)?;
        PodTemplate::from_value(raw).map_err(serde::de::Error::custom)
    }
}

fn deserialize_flavors<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<FlavorTable>, D::Error> {
    let Some(mut raw) = Option::<JsonValue>::deserialize(deserializer)? else {
        return Ok(None);
    };
    if let JsonValue::Object(entries) = &mut raw {
        for resources in entries.values_mut() {
            normalize_resource_requirements(resources);
        }
    }
    serde_json::from_value(raw)
        .map(Some)
        .map_err(|e| serde::de::Error::custom(format!("invalid flavors table: {e}")))
}

/// YAML happily produces numbers for `cpu: 1`; quantities must be strings.
///
/// Covers every `Quantity` field a Pod template can carry: resource
/// requirements, `overhead`, `emptyDir.sizeLimit` and downward API `divisor`.
fn normalize_quantities(value: &mut JsonValue) {
    match value {
        JsonValue::Object(map) => {
            for (key, child) in map.iter_mut() {
                match (key.as_str(), child) {
                    ("resources", resources) => {
                        normalize_resource_requirements(resources);
                    }
                    ("overhead", JsonValue::Object(quantities)) => stringify_numbers(quantities),
                    ("sizeLimit" | "divisor", quantity) if quantity.is_number() => {
                        *quantity = JsonValue::String(quantity.to_string());
                    }
                    (_, child) => normalize_quantities(child),
                }
            }
        }
        JsonValue::Array(items) => items.iter_mut().for_each(normalize_quantities),
        _ => {}
    }
}

fn normalize_resource_requirements(resources: &mut JsonValue) {
    let Some(map) = resources.as_object_mut() else {
        return;
    };
    for key in ["limits", "requests"] {
        if let Some(JsonValue::Object(quantities)) = map.get_mut(key) {
            stringify_numbers(quantities);
        }
    }
}

fn stringify_numbers(quantities: &mut Map<String, JsonValue>) {
    for quantity in quantities.values_mut() {
        if let JsonValue::Number(n) = quantity {
            *quantity = JsonValue::String(n.to_string());
        }
    }
}
