//! The phase chain of a switch pass.
//!
//! A pass walks the phases in a fixed order. Each phase either hands over to
//! the next one or stops the pass and names what has to be written back:
//! nothing, the object (metadata and spec) or the status. At most one write
//! of the switch happens per pass.

use chrono::{DateTime, Utc};
use crds::{ObjectKeyRef, Switch, SwitchState, SwitchStatus};
use std::collections::BTreeSet;
use std::fmt;

/// Phases of a switch pass, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Finalizer and correlation label
    Preparation,
    /// Initial status
    Creation,
    /// Peer classification and adjacency record
    Peers,
    /// Manual root assignment
    Assignment,
    /// Level, role and upstream/downstream split
    Connections,
    /// South subnets
    Subnets,
    /// Per-port addresses
    Addresses,
    /// Configuration agent heartbeat
    Heartbeat,
    /// Release of external resources (only for switches being deleted)
    Deletion,
}

impl Phase {
    /// Entry phase for a switch
    #[must_use]
    pub fn first(switch: &Switch) -> Self {
        if switch.metadata.deletion_timestamp.is_some() {
            Phase::Deletion
        } else {
            Phase::Preparation
        }
    }

    /// The phase that follows, `None` at the end of the chain
    #[must_use]
    pub fn next(self) -> Option<Self> {
        match self {
            Phase::Preparation => Some(Phase::Creation),
            Phase::Creation => Some(Phase::Peers),
            Phase::Peers => Some(Phase::Assignment),
            Phase::Assignment => Some(Phase::Connections),
            Phase::Connections => Some(Phase::Subnets),
            Phase::Subnets => Some(Phase::Addresses),
            Phase::Addresses => Some(Phase::Heartbeat),
            Phase::Heartbeat | Phase::Deletion => None,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What to write back at the end of a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Persist {
    Nothing,
    /// Metadata and spec
    Object,
    /// Status subresource
    Status,
}

/// Result of one phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Stop(Persist),
}

/// Working state of one pass over a switch
#[derive(Debug, Clone)]
pub struct Pass {
    pub key: ObjectKeyRef,
    /// Working copy, mutated by the phases
    pub switch: Switch,
    pub now: DateTime<Utc>,
    /// Set by the assignment phase when a `SwitchAssignment` binds this switch
    pub assigned: bool,
    /// Chassis IDs of neighbours above this switch, set by the connections phase
    pub upstream: BTreeSet<String>,
    /// Set when the pass wrote an object other than the switch itself
    pub wrote_other_objects: bool,
}

impl Pass {
    pub fn new(key: ObjectKeyRef, switch: Switch, now: DateTime<Utc>) -> Self {
        Self {
            key,
            switch,
            now,
            assigned: false,
            upstream: BTreeSet::new(),
            wrote_other_objects: false,
        }
    }

    pub fn status(&self) -> SwitchStatus {
        self.switch.status.clone().unwrap_or_default()
    }

    pub fn status_mut(&mut self) -> &mut SwitchStatus {
        self.switch.status.get_or_insert_with(SwitchStatus::default)
    }

    /// Stop the pass in `state`, writing the status only when it moves.
    pub fn settle_in(&mut self, state: SwitchState) -> Step {
        let status = self.status_mut();
        if status.state == state {
            Step::Stop(Persist::Nothing)
        } else {
            status.state = state;
            Step::Stop(Persist::Status)
        }
    }
}
