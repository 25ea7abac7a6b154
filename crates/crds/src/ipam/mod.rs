//! IPAM contract CRDs
//!
//! The IPAM subsystem is an external collaborator: it watches `Subnet` and
//! `Ip` requests, reserves CIDRs from its pools and reports the outcome in
//! `status`. The switch controller only creates these requests, reads their
//! status and ownership labels, and deletes them when a switch goes away.

pub mod subnet;
pub mod ip;

pub use subnet::*;
pub use ip::*;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Progress of an IPAM request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "PascalCase")]
pub enum IpamState {
    /// Request accepted, reservation in progress
    #[default]
    #[serde(alias = "processing")]
    Processing,
    /// Reservation done, `status.reserved` holds the CIDR
    #[serde(alias = "finished")]
    Finished,
    /// Reservation impossible (e.g. pool exhausted)
    #[serde(alias = "failed")]
    Failed,
}

/// IP address family
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    /// IPv4
    Ipv4,
    /// IPv6
    Ipv6,
}

impl AddressFamily {
    /// Both families, v4 first
    pub const ALL: [AddressFamily; 2] = [AddressFamily::Ipv4, AddressFamily::Ipv6];

    /// Value used for the address family label
    #[must_use]
    pub fn label_value(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "ipv4",
            AddressFamily::Ipv6 => "ipv6",
        }
    }

    /// Short suffix used in generated object names
    #[must_use]
    pub fn short(self) -> &'static str {
        match self {
            AddressFamily::Ipv4 => "v4",
            AddressFamily::Ipv6 => "v6",
        }
    }
}

impl fmt::Display for AddressFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label_value())
    }
}

/// Observed state of an IPAM request (shared by `Subnet` and `Ip`)
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IpamRequestStatus {
    /// Request progress
    pub state: IpamState,

    /// Reserved CIDR once finished
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved: Option<String>,

    /// Failure reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
