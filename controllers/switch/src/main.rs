//! Switch Controller
//!
//! Builds and maintains the view of a leaf/spine switch fabric from the LLDP
//! data each switch reports:
//! - Switch: classifies ports, computes connection levels and roles from the
//!   operator-assigned roots, and requests south subnets and per-port
//!   addresses from IPAM
//! - SwitchConnection: the adjacency record of each switch
//! - SwitchAssignment: operator designation of topology roots

mod backoff;
mod config;
mod controller;
mod error;
mod index;
mod reconciler;
mod store;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // kube's rustls-tls feature needs a process-wide crypto provider
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        warn!("A rustls crypto provider was already installed");
    }

    info!("Starting Switch Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Requeue interval: {:?} (fast: {:?})", config.requeue_interval, config.fast_requeue);
    info!("  Config agent timeout: {:?}", config.config_agent_timeout);
    info!("  Subnet pools: {} / {}", config.subnet_pool_v4, config.subnet_pool_v6);
    info!("  Management port prefixes: {}", config.management_port_prefixes.join(", "));
    info!("  Concurrency: {}", config.concurrency);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
