//! Switch CRD
//!
//! One physical switch. Raw LLDP neighbour data arrives in
//! `spec.interfaces[*].lldp`; the controller derives peer classification,
//! port counts, role, connection level, south subnets and per-port addresses.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Connection level of a switch whose place in the hierarchy is not known yet.
pub const CONNECTION_LEVEL_UNRESOLVED: u8 = 255;

/// SwitchSpec describes identity, discovered interfaces and derived topology
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[kube(
    group = "dcops.microscaler.io",
    version = "v1alpha1",
    kind = "Switch",
    namespaced,
    status = "SwitchStatus",
    shortname = "sw",
    printcolumn = r#"{"name":"Hostname", "type":"string", "jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Role", "type":"string", "jsonPath":".spec.role"}"#,
    printcolumn = r#"{"name":"Level", "type":"integer", "jsonPath":".spec.connectionLevel"}"#,
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SwitchSpec {
    /// Switch hostname
    pub hostname: String,

    /// Hardware identity
    pub chassis: ChassisInfo,

    /// Number of interfaces reported for this switch
    #[serde(default)]
    pub total_ports: u32,

    /// Number of non-management interfaces
    #[serde(default)]
    pub switch_ports: u32,

    /// Fabric role
    #[serde(default)]
    pub role: SwitchRole,

    /// Distance from a topology root (255 = unresolved)
    #[serde(default = "default_connection_level")]
    pub connection_level: u8,

    /// Re-derive peer classification from LLDP data on every pass
    #[serde(default = "default_scan_ports")]
    pub scan_ports: bool,

    /// Interfaces keyed by port name
    #[serde(default)]
    pub interfaces: BTreeMap<String, InterfaceSpec>,

    /// South-bound subnets allocated through IPAM
    #[serde(default)]
    pub south_subnets: SouthSubnets,
}

fn default_connection_level() -> u8 {
    CONNECTION_LEVEL_UNRESOLVED
}

fn default_scan_ports() -> bool {
    true
}

impl Default for SwitchSpec {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            chassis: ChassisInfo::default(),
            total_ports: 0,
            switch_ports: 0,
            role: SwitchRole::Undefined,
            connection_level: CONNECTION_LEVEL_UNRESOLVED,
            scan_ports: true,
            interfaces: BTreeMap::new(),
            south_subnets: SouthSubnets::default(),
        }
    }
}

/// Hardware identity of a switch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ChassisInfo {
    /// MAC-derived chassis identifier (colon-hex)
    pub chassis_id: String,

    /// Serial number
    pub serial_number: String,

    /// Manufacturer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    /// Stock keeping unit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
}

/// One switch interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct InterfaceSpec {
    /// Interface MAC address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,

    /// Raw neighbour data as reported by LLDP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lldp: Option<LldpNeighbor>,

    /// Classified neighbour (derived from `lldp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peer: Option<PeerInfo>,

    /// Address assigned to this port from the IPv4 south subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    /// Address assigned to this port from the IPv6 south subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

/// Raw LLDP neighbour record
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct LldpNeighbor {
    /// Neighbour chassis ID
    pub chassis_id: String,

    /// Neighbour system name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,

    /// Neighbour port ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,

    /// Neighbour port description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_description: Option<String>,

    /// Advertised system capabilities (e.g. "Bridge", "Router", "Station")
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Classified neighbour of an interface
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    /// Machine or switch
    pub peer_type: PeerType,

    /// Canonical chassis ID of the neighbour
    pub chassis_id: String,

    /// Neighbour system name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_name: Option<String>,

    /// Neighbour port ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_id: Option<String>,

    /// Neighbour port description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port_description: Option<String>,
}

/// Kind of device on the other end of a port
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
#[serde(rename_all = "PascalCase")]
pub enum PeerType {
    /// A server / end station
    Machine,
    /// Another switch
    Switch,
}

/// Fabric role of a switch
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SwitchRole {
    /// Not determined yet
    #[default]
    Undefined,
    /// Connects machines
    Leaf,
    /// Aggregates other switches
    Spine,
}

impl fmt::Display for SwitchRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchRole::Undefined => "Undefined",
            SwitchRole::Leaf => "Leaf",
            SwitchRole::Spine => "Spine",
        };
        f.write_str(s)
    }
}

/// References to the south-bound subnets of a switch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SouthSubnets {
    /// IPv4 south subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v4: Option<SubnetRef>,

    /// IPv6 south subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v6: Option<SubnetRef>,
}

impl SouthSubnets {
    /// Number of families with a subnet defined
    #[must_use]
    pub fn defined(&self) -> u32 {
        u32::from(self.v4.is_some()) + u32::from(self.v6.is_some())
    }
}

/// Reference to an IPAM `Subnet` and the CIDR it reserved
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SubnetRef {
    /// Name of the IPAM `Subnet` object
    pub name: String,

    /// Reserved CIDR
    pub cidr: String,
}

/// SwitchStatus defines the observed state of a switch
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct SwitchStatus {
    /// Discrete reconciliation state
    pub state: SwitchState,

    /// Number of south subnets resolved and still owned
    #[serde(default)]
    pub subnets: u32,

    /// Number of interfaces with an owned address assigned
    #[serde(default)]
    pub addresses: u32,

    /// Tracking of the external configuration agent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_agent: Option<ConfigAgentStatus>,

    /// When the switch entered the Configuring state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuring_since: Option<DateTime<Utc>>,

    /// Error condition (e.g. failed resource release during deletion)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Configuration agent heartbeat, written by the agent and checked by the controller
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ConfigAgentStatus {
    /// The switch is managed by a configuration agent
    #[serde(default)]
    pub managed: bool,

    /// Last time the agent reported a successful configuration check
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_check: Option<DateTime<Utc>>,

    /// Set by the controller when the heartbeat timed out
    #[serde(default)]
    pub failed: bool,
}

/// Switch reconciliation state
///
/// Serializes as PascalCase ("Discovery", "Ready", etc.) but deserializes
/// lowercase too.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "PascalCase")]
pub enum SwitchState {
    /// Neighbour data is being collected
    #[default]
    #[serde(alias = "discovery")]
    Discovery,
    /// Waiting for neighbours to resolve
    #[serde(alias = "definePeers")]
    DefinePeers,
    /// Waiting for subnets and addresses
    #[serde(alias = "defineAddresses")]
    DefineAddresses,
    /// Addresses assigned, waiting for the configuration agent
    #[serde(alias = "configuring")]
    Configuring,
    /// Configuration agent reports a healthy heartbeat
    #[serde(alias = "ready")]
    Ready,
    /// Configuration agent heartbeat timed out
    #[serde(alias = "failed")]
    Failed,
}

impl fmt::Display for SwitchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SwitchState::Discovery => "Discovery",
            SwitchState::DefinePeers => "DefinePeers",
            SwitchState::DefineAddresses => "DefineAddresses",
            SwitchState::Configuring => "Configuring",
            SwitchState::Ready => "Ready",
            SwitchState::Failed => "Failed",
        };
        f.write_str(s)
    }
}
