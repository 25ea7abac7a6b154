//! Reconciliation logic for the switch fabric.
//!
//! - `switch`: the phase chain over a `Switch` (one file per phase group)
//! - `connection`: name resolution inside `SwitchConnection` records
//! - `assignment`: correlation labels and status of `SwitchAssignment`s
//!
//! The pure parts (port classification, levelling, address arithmetic and
//! convergence detection) live in their own modules and carry no I/O.

pub mod addressing;
pub mod chain;
pub mod convergence;
pub mod ports;
pub mod topology;

pub mod assignment;
mod connection;
mod switch;

#[cfg(test)]
mod topology_test;

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::store::{FabricStore, IpamClient};
use chain::{Persist, Phase};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::warn;

/// Backoff state for a resource
#[derive(Debug, Clone)]
struct BackoffState {
    backoff: FibonacciBackoff,
    error_count: u32,
}

impl BackoffState {
    fn new(config: &ControllerConfig) -> Self {
        Self {
            backoff: FibonacciBackoff::new(config.error_backoff_min_secs, config.error_backoff_max_secs),
            error_count: 0,
        }
    }

    fn increment_error(&mut self) {
        self.error_count += 1;
    }

    fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Outcome of one pass over a switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassOutcome {
    /// Phase the pass stopped in
    pub phase: Phase,
    /// What was written back
    pub persisted: Persist,
    /// The pass changed the switch or another object
    pub changed: bool,
    /// When to look at the switch again
    pub requeue_after: Duration,
}

/// Reconciles switch fabric resources.
pub struct Reconciler {
    pub(crate) store: Box<dyn FabricStore>,
    pub(crate) ipam: Box<dyn IpamClient>,
    pub(crate) config: ControllerConfig,
    /// Error count tracking per resource (namespace/name -> BackoffState)
    backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl Reconciler {
    /// Creates a new reconciler instance.
    pub fn new(
        store: impl FabricStore + 'static,
        ipam: impl IpamClient + 'static,
        config: ControllerConfig,
    ) -> Self {
        Self {
            store: Box::new(store),
            ipam: Box::new(ipam),
            config,
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Get the Fibonacci backoff duration for a resource based on its error count
    ///
    /// Returns (backoff_seconds, error_count)
    pub fn get_backoff_for_resource(&self, resource_key: &str) -> (u64, u32) {
        match self.backoff_states.lock() {
            Ok(mut states) => {
                let state = states
                    .entry(resource_key.to_string())
                    .or_insert_with(|| BackoffState::new(&self.config));
                let backoff_seconds = state.backoff.next_backoff_seconds();
                (backoff_seconds, state.error_count)
            }
            Err(e) => {
                warn!("Failed to lock backoff_states: {}, using maximum backoff", e);
                (self.config.error_backoff_max_secs, 0)
            }
        }
    }

    /// Increment error count for a resource
    pub fn increment_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            states
                .entry(resource_key.to_string())
                .or_insert_with(|| BackoffState::new(&self.config))
                .increment_error();
        }
    }

    /// Reset error count for a resource (on successful reconciliation)
    pub fn reset_error(&self, resource_key: &str) {
        if let Ok(mut states) = self.backoff_states.lock() {
            if let Some(state) = states.get_mut(resource_key) {
                state.reset();
            }
        }
    }
}
