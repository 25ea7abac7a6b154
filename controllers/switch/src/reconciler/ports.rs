//! Port classification from LLDP neighbour data.
//!
//! Every port with a neighbour record is classified as facing a machine or
//! another switch. Management ports are counted but never classified.

use crate::config::ControllerConfig;
use crds::{canonical_chassis_id, InterfaceSpec, LldpNeighbor, PeerInfo, PeerType, SwitchSpec};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// LLDP capability advertised by end stations
const STATION_CAPABILITY: &str = "station";

/// Classify the device behind an LLDP record.
///
/// A neighbour advertising no capabilities, or the station capability, is a
/// machine. Anything else is a switch.
#[must_use]
pub fn classify(neighbor: &LldpNeighbor) -> PeerType {
    let is_station = neighbor.capabilities.is_empty()
        || neighbor
            .capabilities
            .iter()
            .any(|cap| cap.trim().eq_ignore_ascii_case(STATION_CAPABILITY));
    if is_station { PeerType::Machine } else { PeerType::Switch }
}

fn peer_from(neighbor: &LldpNeighbor) -> Option<PeerInfo> {
    if neighbor.chassis_id.trim().is_empty() {
        return None;
    }
    Some(PeerInfo {
        peer_type: classify(neighbor),
        chassis_id: canonical_chassis_id(&neighbor.chassis_id),
        system_name: neighbor.system_name.clone(),
        port_id: neighbor.port_id.clone(),
        port_description: neighbor.port_description.clone(),
    })
}

/// Re-derive peers and port counts from the LLDP data in `spec`.
///
/// Returns whether anything changed.
pub fn apply_peers(spec: &mut SwitchSpec, config: &ControllerConfig) -> bool {
    let mut changed = false;
    let mut switch_ports = 0u32;

    for (name, interface) in &mut spec.interfaces {
        let management = config.is_management_port(name);
        if !management {
            switch_ports += 1;
        }
        let peer = if management {
            None
        } else {
            interface.lldp.as_ref().and_then(peer_from)
        };
        if interface.peer != peer {
            interface.peer = peer;
            changed = true;
        }
    }

    let total_ports = u32::try_from(spec.interfaces.len()).unwrap_or(u32::MAX);
    if spec.total_ports != total_ports || spec.switch_ports != switch_ports {
        spec.total_ports = total_ports;
        spec.switch_ports = switch_ports;
        changed = true;
    }
    changed
}

/// Canonical chassis IDs of all neighbouring switches
#[must_use]
pub fn switch_neighbors(interfaces: &BTreeMap<String, InterfaceSpec>) -> BTreeSet<String> {
    interfaces
        .values()
        .filter_map(|i| i.peer.as_ref())
        .filter(|p| p.peer_type == PeerType::Switch)
        .map(|p| p.chassis_id.clone())
        .collect()
}

/// Whether any port faces a machine
#[must_use]
pub fn has_machine_peer(interfaces: &BTreeMap<String, InterfaceSpec>) -> bool {
    interfaces
        .values()
        .filter_map(|i| i.peer.as_ref())
        .any(|p| p.peer_type == PeerType::Machine)
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Text(&'a str),
    Number(u64),
}

fn segments(name: &str) -> Vec<Segment<'_>> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut in_digits = None;
    for (i, c) in name.char_indices() {
        let digit = c.is_ascii_digit();
        match in_digits {
            Some(prev) if prev != digit => {
                out.push(segment(&name[start..i], prev));
                start = i;
            }
            _ => {}
        }
        in_digits = Some(digit);
    }
    if let Some(digit) = in_digits {
        out.push(segment(&name[start..], digit));
    }
    out
}

fn segment(part: &str, digits: bool) -> Segment<'_> {
    if digits {
        part.parse().map_or(Segment::Text(part), Segment::Number)
    } else {
        Segment::Text(part)
    }
}

/// Natural ordering of port names: `Ethernet2` sorts before `Ethernet10`
#[must_use]
pub fn compare_ports(a: &str, b: &str) -> Ordering {
    segments(a).cmp(&segments(b)).then_with(|| a.cmp(b))
}

/// Non-management ports in natural order. A port's position in this list is
/// its ordinal for address derivation.
#[must_use]
pub fn ordered_switch_ports<'a>(
    interfaces: &'a BTreeMap<String, InterfaceSpec>,
    config: &ControllerConfig,
) -> Vec<&'a str> {
    let mut ports: Vec<&str> = interfaces
        .keys()
        .map(String::as_str)
        .filter(|name| !config.is_management_port(name))
        .collect();
    ports.sort_by(|a, b| compare_ports(a, b));
    ports
}
