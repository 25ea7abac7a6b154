//! SwitchAssignment CRD
//!
//! Manual seed designating a physical switch as a topology root: the switch
//! with this chassis ID / serial becomes a level 0 spine.

use crate::references::ObjectKeyRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SwitchAssignmentSpec binds a chassis ID / serial pair to the spine role
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "SwitchAssignment",
    namespaced,
    status = "SwitchAssignmentStatus",
    shortname = "swa",
    printcolumn = r#"{"name":"Chassis", "type":"string", "jsonPath":".spec.chassisId"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchAssignmentSpec {
    /// Assigned role
    #[serde(default)]
    pub role: AssignedRole,

    /// Serial number of the switch
    pub serial: String,

    /// Chassis ID of the switch (colon-separated MAC)
    pub chassis_id: String,
}

/// Roles a switch can be assigned to
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum AssignedRole {
    /// Topology root spine
    #[default]
    Spine,
}

/// SwitchAssignmentStatus records which switch the assignment was bound to
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SwitchAssignmentStatus {
    /// Binding state
    pub state: AssignmentState,

    /// The bound switch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub switch_ref: Option<ObjectKeyRef>,
}

/// Assignment binding state
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum AssignmentState {
    /// No switch bound yet
    #[default]
    #[serde(alias = "pending")]
    Pending,
    /// Bound to a switch
    #[serde(alias = "finished")]
    Finished,
}
