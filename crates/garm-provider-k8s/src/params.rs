//! Wire types exchanged with the GARM orchestrator.
//!
//! Field names follow the JSON GARM writes to the provider's stdin and
//! expects back on stdout, so these structs are serialized as-is.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Operating system family of a runner image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsType {
    Linux,
    Windows,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OsType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linux => "linux",
            Self::Windows => "windows",
            Self::Unknown => "unknown",
        }
    }

    /// Parse a (possibly label-sanitized) value, falling back to `Unknown`.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "linux" => Self::Linux,
            "windows" => Self::Windows,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for OsType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// CPU architecture of a runner image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OsArch {
    Amd64,
    Arm,
    Arm64,
    #[default]
    #[serde(other)]
    Unknown,
}

impl OsArch {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Amd64 => "amd64",
            Self::Arm => "arm",
            Self::Arm64 => "arm64",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "amd64" => Self::Amd64,
            "arm" => Self::Arm,
            "arm64" => Self::Arm64,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for OsArch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status reported back to the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Stopped,
    PendingCreate,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::PendingCreate => write!(f, "pending_create"),
            Self::Error => write!(f, "error"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Instruction to create one runner instance.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BootstrapInstance {
    pub name: String,
    #[serde(default)]
    pub pool_id: String,
    #[serde(default)]
    pub flavor: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub repo_url: String,
    #[serde(default, rename = "callback-url")]
    pub callback_url: String,
    #[serde(default, rename = "metadata-url")]
    pub metadata_url: String,
    #[serde(default, rename = "instance-token")]
    pub instance_token: String,
    #[serde(default, rename = "github-runner-group")]
    pub github_runner_group: String,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default, rename = "arch")]
    pub os_arch: OsArch,
    #[serde(default)]
    pub labels: Vec<String>,
    /// Free-form JSON; only `os_name`/`os_version` are interpreted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_specs: Option<JsonValue>,
    #[serde(default)]
    pub jit_config_enabled: bool,
}

/// OS details optionally carried in `extra_specs`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ExtraSpecs {
    #[serde(default, alias = "OSName", alias = "osName", alias = "osname")]
    pub os_name: String,
    #[serde(default, alias = "OSVersion", alias = "osVersion", alias = "osversion")]
    pub os_version: String,
}

impl BootstrapInstance {
    /// Decode the OS details from `extra_specs`, if they parse.
    #[must_use]
    pub fn extra_specs(&self) -> Option<ExtraSpecs> {
        self.extra_specs
            .as_ref()
            .and_then(|raw| serde_json::from_value(raw.clone()).ok())
    }
}

/// Instance as seen by the orchestrator; derived from a live Pod on every read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderInstance {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub provider_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub os_type: OsType,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub os_version: String,
    #[serde(default)]
    pub os_arch: OsArch,
    #[serde(default)]
    pub status: InstanceStatus,
}
