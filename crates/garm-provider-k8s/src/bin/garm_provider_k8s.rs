//! garm-provider-k8s - GARM external provider binary.
//!
//! Invoked by GARM once per operation; stdout carries the JSON result, logs
//! go to stderr.

use std::io::Read;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use garm_provider_k8s::execution::{self, Command, Environment};
use garm_provider_k8s::{cluster, KubeClusterClient, KubernetesProvider, ProviderConfig};

#[tokio::main]
async fn main() {
    let env = Environment::parse();

    let filter = if env.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match execute(&env).await {
        Ok(output) => {
            if !output.is_empty() {
                println!("{output}");
            }
        }
        Err(e) => {
            error!(command = ?env.command, "Command failed: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn execute(env: &Environment) -> Result<String> {
    if env.command == Command::GetVersion {
        return Ok(execution::VERSION.to_string());
    }
    env.validate()?;

    let config_path = env
        .config_path
        .as_deref()
        .context("GARM_PROVIDER_CONFIG_FILE is not set")?;
    let config = Arc::new(ProviderConfig::from_file(config_path)?);

    let client = cluster::connect(config.kube_config_path.as_deref())
        .await
        .context("Failed to create Kubernetes client")?;
    let provider = KubernetesProvider::new(
        KubeClusterClient::new(client),
        config,
        env.controller_id.clone(),
        env.pool(),
    );

    let stdin = if env.command == Command::CreateInstance {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read bootstrap request from stdin")?;
        buf
    } else {
        String::new()
    };

    let output = execution::run(&provider, env, &stdin)
        .await
        .with_context(|| format!("{:?} failed", env.command))?;
    Ok(output)
}
