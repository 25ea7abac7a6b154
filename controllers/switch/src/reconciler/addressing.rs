//! Per-port address derivation from a south subnet.
//!
//! Each non-management port owns a fixed-size block of the switch's south
//! subnet, picked by the port's ordinal: a /30 per port for IPv4 and a /127
//! per port for IPv6. The switch side takes the first usable address of the
//! block (network + 1 for a /30, the lower address of a /127), the machine
//! or downstream switch gets the other one.
//!
//! Derivation is pure integer arithmetic, so the same subnet and ordinal
//! always produce the same address and distinct ordinals never overlap.

use crate::error::ControllerError;
use crds::AddressFamily;
use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Prefix length of the per-port IPv4 block
pub const V4_PORT_PREFIX_LEN: u8 = 30;

/// Prefix length of the per-port IPv6 block
pub const V6_PORT_PREFIX_LEN: u8 = 127;

/// Prefix length of the per-port block for a family
#[must_use]
pub fn port_prefix_len(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::Ipv4 => V4_PORT_PREFIX_LEN,
        AddressFamily::Ipv6 => V6_PORT_PREFIX_LEN,
    }
}

/// Full prefix length of a family (32 or 128)
#[must_use]
pub fn max_prefix_len(family: AddressFamily) -> u8 {
    match family {
        AddressFamily::Ipv4 => 32,
        AddressFamily::Ipv6 => 128,
    }
}

/// Addresses consumed by one port (4 for IPv4, 2 for IPv6)
#[must_use]
pub fn addresses_per_port(family: AddressFamily) -> u64 {
    1u64 << (max_prefix_len(family) - port_prefix_len(family))
}

/// Number of addresses to request for a south subnet
#[must_use]
pub fn subnet_capacity(family: AddressFamily, switch_ports: u32) -> u64 {
    u64::from(switch_ports.max(1)) * addresses_per_port(family)
}

/// Longest prefix that still holds a block for every port
#[must_use]
pub fn required_prefix_len(family: AddressFamily, switch_ports: u32) -> u8 {
    let capacity = subnet_capacity(family, switch_ports).next_power_of_two();
    let host_bits = u8::try_from(capacity.trailing_zeros()).unwrap_or(u8::MAX);
    max_prefix_len(family).saturating_sub(host_bits)
}

/// Family of a network
#[must_use]
pub fn family_of(net: &IpNetwork) -> AddressFamily {
    match net {
        IpNetwork::V4(_) => AddressFamily::Ipv4,
        IpNetwork::V6(_) => AddressFamily::Ipv6,
    }
}

/// The network with its host bits cleared
#[must_use]
pub fn truncate(net: IpNetwork) -> IpNetwork {
    IpNetwork::new(net.network(), net.prefix()).unwrap_or(net)
}

/// The `index`-th block of length `prefix_len` inside `parent`, in address order.
///
/// `None` when the block does not fit in `parent`.
#[must_use]
pub fn nth_block(parent: &IpNetwork, prefix_len: u8, index: u64) -> Option<IpNetwork> {
    if prefix_len < parent.prefix() {
        return None;
    }
    match parent {
        IpNetwork::V4(net) => {
            if prefix_len > 32 {
                return None;
            }
            let count = 1u64 << (prefix_len - net.prefix());
            if index >= count {
                return None;
            }
            let offset = index << (32 - prefix_len);
            let host = u32::try_from(u64::from(u32::from(net.network())) + offset).ok()?;
            Ipv4Network::new(Ipv4Addr::from(host), prefix_len).ok().map(IpNetwork::V4)
        }
        IpNetwork::V6(net) => {
            if prefix_len > 128 {
                return None;
            }
            let fits = 1u128
                .checked_shl(u32::from(prefix_len - net.prefix()))
                .is_none_or(|count| u128::from(index) < count);
            if !fits {
                return None;
            }
            let offset = u128::from(index).checked_shl(u32::from(128 - prefix_len))?;
            let host = u128::from(net.network()).checked_add(offset)?;
            Ipv6Network::new(Ipv6Addr::from(host), prefix_len).ok().map(IpNetwork::V6)
        }
    }
}

/// Parse a reserved south subnet and check it is large enough for the switch.
pub fn parse_south_subnet(
    cidr: &str,
    family: AddressFamily,
    switch_ports: u32,
) -> Result<IpNetwork, ControllerError> {
    let net: IpNetwork = cidr
        .parse()
        .map_err(|e| ControllerError::AddressDerivation(format!("invalid subnet '{cidr}': {e}")))?;
    if family_of(&net) != family {
        return Err(ControllerError::AddressDerivation(format!(
            "subnet {net} is not {family}"
        )));
    }
    let required = required_prefix_len(family, switch_ports);
    if net.prefix() > required {
        return Err(ControllerError::AddressDerivation(format!(
            "subnet {net} is too small for {switch_ports} ports (need /{required})"
        )));
    }
    Ok(truncate(net))
}

/// Switch-side address of the port with the given ordinal.
pub fn port_address(south: &IpNetwork, ordinal: u32) -> Result<IpNetwork, ControllerError> {
    let out_of_range = || {
        ControllerError::AddressDerivation(format!("port ordinal {ordinal} does not fit in {south}"))
    };

    let family = family_of(south);
    let block = nth_block(&truncate(*south), port_prefix_len(family), u64::from(ordinal))
        .ok_or_else(out_of_range)?;
    match block {
        IpNetwork::V4(net) => {
            let host = u32::from(net.network()).checked_add(1).ok_or_else(out_of_range)?;
            let net = Ipv4Network::new(Ipv4Addr::from(host), V4_PORT_PREFIX_LEN)
                .map_err(|e| ControllerError::AddressDerivation(e.to_string()))?;
            Ok(IpNetwork::V4(net))
        }
        IpNetwork::V6(_) => Ok(block),
    }
}

/// Address of the device on the other end of the port's block
#[must_use]
pub fn peer_address(port: &IpNetwork) -> IpAddr {
    match port {
        IpNetwork::V4(net) => IpAddr::V4(Ipv4Addr::from(u32::from(net.ip()).wrapping_add(1))),
        IpNetwork::V6(net) => IpAddr::V6(Ipv6Addr::from(u128::from(net.ip()).wrapping_add(1))),
    }
}
