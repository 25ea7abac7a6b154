//! Connection level and role assignment.
//!
//! A switch bound by a `SwitchAssignment` is a root at level 0. Every other
//! switch sits one level below the shallowest resolved neighbour that lists
//! it as downstream in its adjacency record. Nothing else is trusted: a
//! neighbour's level only counts when that neighbour's record agrees it is
//! the parent, so a single switch cannot promote itself by claiming a low
//! level.
//!
//! A resolved switch only takes a parent shallower than its current level.
//! When it loses every such parent it drops back to
//! `CONNECTION_LEVEL_UNRESOLVED` and is levelled again from there, so peers
//! on the same level cannot keep raising each other once their root is gone.
//!
//! Repeated application across all switches reaches a fixed point in a
//! number of rounds bounded by the diameter of the graph. Cycles without a
//! root never resolve and stay at `CONNECTION_LEVEL_UNRESOLVED`.

use crds::{ObjectKeyRef, PeerSwitchRef, SwitchConnectionSpec, SwitchRole, CONNECTION_LEVEL_UNRESOLVED};

/// A neighbouring switch as seen during one pass
#[derive(Debug, Clone)]
pub struct NeighborView<'a> {
    /// Canonical chassis ID from LLDP
    pub chassis_id: &'a str,
    /// The neighbour's `Switch` object, when one exists
    pub key: Option<&'a ObjectKeyRef>,
    /// The neighbour's own connection level
    pub connection_level: u8,
    /// The neighbour's adjacency record, when one exists
    pub record: Option<&'a SwitchConnectionSpec>,
}

impl NeighborView<'_> {
    fn resolved_level(&self) -> Option<u8> {
        (self.key.is_some() && self.connection_level != CONNECTION_LEVEL_UNRESOLVED)
            .then_some(self.connection_level)
    }

    fn peer_ref(&self) -> PeerSwitchRef {
        match self.key {
            Some(key) => PeerSwitchRef::resolved(self.chassis_id, key),
            None => PeerSwitchRef::unresolved(self.chassis_id),
        }
    }

    /// Whether this neighbour's record names `chassis_id` as its child
    fn claims_as_child(&self, chassis_id: &str) -> bool {
        self.record.is_some_and(|r| r.lists_downstream(chassis_id))
    }
}

/// Outcome of levelling one switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub connection_level: u8,
    pub role: SwitchRole,
    pub upstream: Vec<PeerSwitchRef>,
    pub downstream: Vec<PeerSwitchRef>,
    /// Every resolved neighbour's record agrees with the split
    pub consistent: bool,
}

impl Resolution {
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.connection_level != CONNECTION_LEVEL_UNRESOLVED
    }
}

/// Compute level, role and the upstream/downstream split of one switch.
///
/// `current_level` is the level the switch holds before this pass.
/// `neighbors` must be ordered by chassis ID; the output lists keep that order.
#[must_use]
pub fn resolve(
    own_chassis_id: &str,
    current_level: u8,
    assigned: bool,
    has_machine_peer: bool,
    neighbors: &[NeighborView<'_>],
) -> Resolution {
    let connection_level = if assigned {
        0
    } else {
        neighbors
            .iter()
            .filter(|n| n.claims_as_child(own_chassis_id))
            .filter_map(NeighborView::resolved_level)
            .filter(|level| current_level == CONNECTION_LEVEL_UNRESOLVED || *level < current_level)
            .min()
            .and_then(|parent| parent.checked_add(1))
            .filter(|level| *level != CONNECTION_LEVEL_UNRESOLVED)
            .unwrap_or(CONNECTION_LEVEL_UNRESOLVED)
    };

    let role = if assigned {
        SwitchRole::Spine
    } else if has_machine_peer {
        SwitchRole::Leaf
    } else {
        SwitchRole::Spine
    };

    let mut upstream = Vec::new();
    let mut downstream = Vec::new();
    let mut consistent = true;
    for neighbor in neighbors {
        let above = connection_level != CONNECTION_LEVEL_UNRESOLVED
            && neighbor.resolved_level().is_some_and(|l| l < connection_level);
        if above {
            consistent &= neighbor.claims_as_child(own_chassis_id);
            upstream.push(neighbor.peer_ref());
        } else {
            let below = connection_level != CONNECTION_LEVEL_UNRESOLVED
                && neighbor.resolved_level().is_some_and(|l| l > connection_level);
            if below {
                consistent &= neighbor.record.is_some_and(|r| r.lists_upstream(own_chassis_id));
            }
            downstream.push(neighbor.peer_ref());
        }
    }

    Resolution {
        connection_level,
        role,
        upstream,
        downstream,
        consistent,
    }
}

/// Rewrite a child's record so that `parent` is listed upstream (resolved).
///
/// Returns whether the record changed.
pub fn adopt_parent(record: &mut SwitchConnectionSpec, parent: &PeerSwitchRef) -> bool {
    let before = record.clone();
    record.downstream.retain(|p| p.chassis_id != parent.chassis_id);
    match record.upstream.iter_mut().find(|p| p.chassis_id == parent.chassis_id) {
        Some(existing) => *existing = parent.clone(),
        None => {
            record.upstream.push(parent.clone());
            record.upstream.sort();
        }
    }
    *record != before
}
