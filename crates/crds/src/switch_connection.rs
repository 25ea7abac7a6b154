//! SwitchConnection CRD
//!
//! The adjacency record of a switch: which neighbouring switches sit above it
//! (upstream, closer to a root) and which sit below it (downstream). Named
//! after its switch; created and maintained by the controller.

use crate::references::{ObjectKeyRef, PeerSwitchRef};
use crate::switch::CONNECTION_LEVEL_UNRESOLVED;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SwitchConnectionSpec holds the adjacency of one switch
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "SwitchConnection",
    namespaced,
    shortname = "swc",
    printcolumn = r#"{"name":"Chassis", "type":"string", "jsonPath":".spec.chassisId"}"#,
    printcolumn = r#"{"name":"Level", "type":"integer", "jsonPath":".spec.connectionLevel"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchConnectionSpec {
    /// The switch this record belongs to
    pub switch_ref: ObjectKeyRef,

    /// Canonical chassis ID of the switch
    pub chassis_id: String,

    /// Mirrored connection level of the switch
    #[serde(default = "default_level")]
    pub connection_level: u8,

    /// Neighbours closer to a topology root
    #[serde(default)]
    pub upstream: Vec<PeerSwitchRef>,

    /// Neighbours further from a topology root
    #[serde(default)]
    pub downstream: Vec<PeerSwitchRef>,
}

fn default_level() -> u8 {
    CONNECTION_LEVEL_UNRESOLVED
}

impl SwitchConnectionSpec {
    /// Whether `chassis_id` is listed as downstream of this switch
    #[must_use]
    pub fn lists_downstream(&self, chassis_id: &str) -> bool {
        self.downstream.iter().any(|p| p.chassis_id == chassis_id)
    }

    /// Whether `chassis_id` is listed as upstream of this switch
    #[must_use]
    pub fn lists_upstream(&self, chassis_id: &str) -> bool {
        self.upstream.iter().any(|p| p.chassis_id == chassis_id)
    }

    /// All neighbour chassis IDs, upstream first
    pub fn neighbor_chassis_ids(&self) -> impl Iterator<Item = &str> {
        self.upstream
            .iter()
            .chain(self.downstream.iter())
            .map(|p| p.chassis_id.as_str())
    }
}
