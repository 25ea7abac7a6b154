//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the reconciler and the resource watchers together. It manages
//! three CRD types:
//! - Switch: topology, levelling and south-bound addressing
//! - SwitchConnection: adjacency records, kept in step with their switch
//! - SwitchAssignment: operator root designations

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::Watcher;
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

/// Main controller for the switch fabric.
pub struct Controller {
    switch_watcher: JoinHandle<Result<(), ControllerError>>,
    switch_connection_watcher: JoinHandle<Result<(), ControllerError>>,
    switch_assignment_watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts its watchers.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing Switch Controller");

        let kube_client = Client::try_default().await.map_err(ControllerError::Kube)?;

        // The same client backs both the object store and IPAM requests
        let store = KubeStore::new(kube_client.clone());
        let namespace = config.namespace.clone();
        let reconciler = Arc::new(Reconciler::new(store.clone(), store, config));

        let watcher_instance = Arc::new(Watcher::new(reconciler, kube_client, namespace));

        let switch_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switches().await })
        };

        let switch_connection_watcher = {
            let watcher = watcher_instance.clone();
            tokio::spawn(async move { watcher.watch_switch_connections().await })
        };

        let switch_assignment_watcher = {
            let watcher = watcher_instance;
            tokio::spawn(async move { watcher.watch_switch_assignments().await })
        };

        Ok(Self {
            switch_watcher,
            switch_connection_watcher,
            switch_assignment_watcher,
        })
    }

    /// Runs the controller until shutdown.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("Switch Controller running");

        // Watchers run forever; the first one to exit ends the process
        tokio::select! {
            result = &mut self.switch_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("Switch watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("Switch watcher error: {}", e)))?;
            }
            result = &mut self.switch_connection_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SwitchConnection watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("SwitchConnection watcher error: {}", e)))?;
            }
            result = &mut self.switch_assignment_watcher => {
                result.map_err(|e| ControllerError::Watch(format!("SwitchAssignment watcher panicked: {}", e)))?
                    .map_err(|e| ControllerError::Watch(format!("SwitchAssignment watcher error: {}", e)))?;
            }
        }

        Ok(())
    }
}
