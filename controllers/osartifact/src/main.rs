//! OSArtifact Controller
//!
//! Builds bootable OS artifacts (ISOs, netboot files, cloud and ARM disk
//! images) declared as `OSArtifact` resources.
//!
//! Each artifact moves through Pending, Building, Exporting and Ready (or
//! Error): a builder pod renders the artifact into a volume claim, then one
//! job per exporter copies or pushes the result.

mod backoff;
mod config;
mod controller;
mod error;
mod factory;
mod health;
mod metrics;
mod probes;
mod reconciler;
mod retry;
mod routing;
mod watcher;

#[cfg(test)]
mod test_utils;

use crate::config::OperatorConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting OSArtifact Controller");

    let config = OperatorConfig::from_env()?;
    info!("Configuration:");
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Tool image: {}", config.tool_image);
    info!("  Exporter image: {}", config.exporter_image);
    info!("  Probe address: {}", config.probe_bind_address);
    if let Some(target) = &config.copy_target {
        info!(
            "  Copy target: {} pods labeled {} at {} (role {})",
            target.namespace, target.pod_label, target.path, target.role
        );
    }

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
