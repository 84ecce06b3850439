//! GARM external provider invocation protocol.
//!
//! GARM runs the provider binary once per operation. The command and the
//! identifiers it applies to arrive as environment variables, the bootstrap
//! request (for `CreateInstance`) on stdin, and the result goes to stdout as
//! JSON.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tracing::debug;

use crate::error::{ProviderError, Result};
use crate::params::BootstrapInstance;
use crate::provider::Provider;

/// Version reported by `GetVersion`.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Operation requested through `GARM_COMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Command {
    #[value(name = "CreateInstance")]
    CreateInstance,
    #[value(name = "GetInstance")]
    GetInstance,
    #[value(name = "ListInstances")]
    ListInstances,
    #[value(name = "DeleteInstance")]
    DeleteInstance,
    #[value(name = "RemoveAllInstances")]
    RemoveAllInstances,
    #[value(name = "StartInstance")]
    StartInstance,
    #[value(name = "StopInstance")]
    StopInstance,
    #[value(name = "GetVersion")]
    GetVersion,
}

impl Command {
    fn needs_instance_id(self) -> bool {
        matches!(
            self,
            Self::GetInstance | Self::DeleteInstance | Self::StartInstance | Self::StopInstance
        )
    }
}

/// Invocation environment of the provider binary.
#[derive(Debug, Clone, Parser)]
#[command(name = "garm-provider-k8s")]
#[command(about = "GARM external provider running GitHub Actions runners as Kubernetes Pods")]
#[command(version)]
pub struct Environment {
    /// Operation to execute.
    #[arg(long, env = "GARM_COMMAND", value_enum)]
    pub command: Command,

    /// ID of the GARM controller owning the instances.
    #[arg(long, env = "GARM_CONTROLLER_ID", default_value = "")]
    pub controller_id: String,

    /// Pool the operation applies to.
    #[arg(long, env = "GARM_POOL_ID", default_value = "")]
    pub pool_id: String,

    /// Instance the operation applies to.
    #[arg(long, env = "GARM_INSTANCE_ID", default_value = "")]
    pub instance_id: String,

    /// Provider configuration file.
    #[arg(long = "configpath", env = "GARM_PROVIDER_CONFIG_FILE")]
    pub config_path: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    pub verbose: bool,
}

impl Environment {
    /// Check that everything `command` needs is present.
    pub fn validate(&self) -> Result<()> {
        if self.command == Command::GetVersion {
            return Ok(());
        }
        if self.controller_id.is_empty() {
            return Err(ProviderError::InvalidEnvironment(
                "missing GARM_CONTROLLER_ID".to_string(),
            ));
        }
        if self.config_path.is_none() {
            return Err(ProviderError::InvalidEnvironment(
                "missing GARM_PROVIDER_CONFIG_FILE".to_string(),
            ));
        }
        if self.command.needs_instance_id() && self.instance_id.is_empty() {
            return Err(ProviderError::InvalidEnvironment(format!(
                "missing GARM_INSTANCE_ID for {:?}",
                self.command
            )));
        }
        if self.command == Command::ListInstances && self.pool_id.is_empty() {
            return Err(ProviderError::InvalidEnvironment(
                "missing GARM_POOL_ID for ListInstances".to_string(),
            ));
        }
        Ok(())
    }

    /// Pool id, when GARM supplied one.
    #[must_use]
    pub fn pool(&self) -> Option<String> {
        Some(self.pool_id.clone()).filter(|p| !p.is_empty())
    }
}

/// Execute the command of `env` against `provider`.
///
/// Returns what has to be written to stdout; commands without a result
/// yield an empty string.
pub async fn run<P: Provider + ?Sized>(provider: &P, env: &Environment, stdin: &str) -> Result<String> {
    env.validate()?;
    debug!(command = ?env.command, instance = %env.instance_id, pool = %env.pool_id, "Executing command");

    match env.command {
        Command::CreateInstance => {
            let bootstrap = parse_bootstrap(stdin)?;
            let instance = provider.create_instance(bootstrap).await?;
            Ok(serde_json::to_string(&instance)?)
        }
        Command::GetInstance => {
            let instance = provider.get_instance(&env.instance_id).await?;
            Ok(serde_json::to_string(&instance)?)
        }
        Command::ListInstances => {
            let instances = provider.list_instances(&env.pool_id).await?;
            Ok(serde_json::to_string(&instances)?)
        }
        Command::DeleteInstance => {
            provider.delete_instance(&env.instance_id).await?;
            Ok(String::new())
        }
        Command::RemoveAllInstances => {
            provider.remove_all_instances().await?;
            Ok(String::new())
        }
        Command::StartInstance => {
            provider.start(&env.instance_id).await?;
            Ok(String::new())
        }
        Command::StopInstance => {
            provider.stop(&env.instance_id, true).await?;
            Ok(String::new())
        }
        Command::GetVersion => Ok(VERSION.to_string()),
    }
}

fn parse_bootstrap(stdin: &str) -> Result<BootstrapInstance> {
    if stdin.trim().is_empty() {
        return Err(ProviderError::InvalidEnvironment(
            "CreateInstance expects a bootstrap request on stdin".to_string(),
        ));
    }
    serde_json::from_str(stdin)
        .map_err(|e| ProviderError::InvalidEnvironment(format!("invalid bootstrap request: {e}")))
}
