//! Convergence detection.
//!
//! A pass is compared against the object it started from through a hash of
//! the canonical serialization of everything the controller writes on a
//! switch. Unchanged hash and no writes to other objects means the switch has
//! settled and can wait for the steady interval.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crds::Switch;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::time::Duration;

/// Hash of the controller-managed parts of a switch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint finalizers, labels, spec and status.
    ///
    /// Labels and interfaces are ordered maps, so equal content always
    /// serializes to the same bytes.
    pub fn of(switch: &Switch) -> Result<Self, ControllerError> {
        let canonical = serde_json::to_vec(&(
            &switch.metadata.finalizers,
            &switch.metadata.labels,
            &switch.spec,
            &switch.status,
        ))?;
        let mut hasher = DefaultHasher::new();
        canonical.hash(&mut hasher);
        Ok(Self(hasher.finish()))
    }
}

/// Whether a pass moved the fabric
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convergence {
    /// Something changed; come back soon
    Converging,
    /// Nothing changed; come back on the steady interval
    Settled,
}

impl Convergence {
    #[must_use]
    pub fn decide(before: Fingerprint, after: Fingerprint, wrote_other_objects: bool) -> Self {
        if before != after || wrote_other_objects {
            Convergence::Converging
        } else {
            Convergence::Settled
        }
    }

    #[must_use]
    pub fn requeue_after(self, config: &ControllerConfig) -> Duration {
        match self {
            Convergence::Converging => config.fast_requeue,
            Convergence::Settled => config.requeue_interval,
        }
    }
}
