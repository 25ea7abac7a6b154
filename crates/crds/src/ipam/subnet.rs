//! IPAM Subnet request

use super::IpamRequestStatus;
use crate::references::ObjectKeyRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// SubnetSpec requests a block of `capacity` addresses from a parent subnet
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "ipam.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Subnet",
    namespaced,
    status = "IpamRequestStatus",
    printcolumn = r#"{"name":"Parent", "type":"string", "jsonPath":".spec.parentSubnet"}"#,
    printcolumn = r#"{"name":"Reserved", "type":"string", "jsonPath":".status.reserved"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    /// Name of the parent subnet (pool) to carve from
    pub parent_subnet: String,

    /// Number of addresses requested; IPAM rounds up to a power of two
    pub capacity: u64,

    /// Object consuming this subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ObjectKeyRef>,
}
