//! IPAM Ip request

use super::IpamRequestStatus;
use crate::references::ObjectKeyRef;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// IpSpec requests a single address inside a subnet
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "ipam.dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Ip",
    namespaced,
    status = "IpamRequestStatus",
    printcolumn = r#"{"name":"Subnet", "type":"string", "jsonPath":".spec.subnet"}"#,
    printcolumn = r#"{"name":"Reserved", "type":"string", "jsonPath":".status.reserved"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IpSpec {
    /// Name of the subnet the address belongs to
    pub subnet: String,

    /// Specific address requested (CIDR notation)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Object consuming this address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumer: Option<ObjectKeyRef>,
}
