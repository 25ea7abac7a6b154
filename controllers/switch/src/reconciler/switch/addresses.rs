//! Addresses phase: per-port addresses derived from the south subnets.
//!
//! Every south-facing port (a port with a machine or a downstream switch
//! behind it) gets the switch-side address of its block in each family with
//! a south subnet. The address is only written to the spec once IPAM has
//! confirmed the reservation and the `Ip` object still carries our owner
//! label.

use super::subnets::south_ref;
use crate::error::ControllerError;
use crate::reconciler::addressing::{peer_address, port_address};
use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::{ports, Reconciler};
use crate::store::object_key;
use crds::{
    AddressFamily, InterfaceSpec, Ip, IpSpec, IpamState, SwitchState, ADDRESS_FAMILY_LABEL,
    INTERFACE_LABEL, OWNER_LABEL,
};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

type Slot = (String, AddressFamily);

/// Interface name as a label value (`/` and other separators become `_`)
fn interface_label(interface: &str) -> String {
    interface
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect()
}

/// Interface name as part of an object name
fn interface_name_part(interface: &str) -> String {
    interface
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect()
}

fn address_of(interface: &InterfaceSpec, family: AddressFamily) -> Option<&String> {
    match family {
        AddressFamily::Ipv4 => interface.ipv4.as_ref(),
        AddressFamily::Ipv6 => interface.ipv6.as_ref(),
    }
}

fn set_address(interface: &mut InterfaceSpec, family: AddressFamily, value: Option<String>) -> bool {
    let slot = match family {
        AddressFamily::Ipv4 => &mut interface.ipv4,
        AddressFamily::Ipv6 => &mut interface.ipv6,
    };
    if *slot == value {
        false
    } else {
        *slot = value;
        true
    }
}

fn slot_of(ip: &Ip) -> Option<(String, AddressFamily)> {
    let labels = ip.labels();
    let family = match labels.get(ADDRESS_FAMILY_LABEL).map(String::as_str) {
        Some("ipv4") => AddressFamily::Ipv4,
        Some("ipv6") => AddressFamily::Ipv6,
        _ => return None,
    };
    Some((labels.get(INTERFACE_LABEL)?.clone(), family))
}

fn granted(ip: &Ip) -> Option<String> {
    let status = ip.status.as_ref()?;
    (status.state == IpamState::Finished).then(|| status.reserved.clone()).flatten()
}

impl Reconciler {
    /// Desired switch-side address per (port, family)
    fn desired_addresses(&self, pass: &Pass) -> Result<BTreeMap<Slot, IpNetwork>, ControllerError> {
        let spec = &pass.switch.spec;
        let mut desired = BTreeMap::new();
        for family in AddressFamily::ALL {
            let Some(subnet) = south_ref(&spec.south_subnets, family) else {
                continue;
            };
            let south: IpNetwork = subnet.cidr.parse().map_err(|e| {
                ControllerError::AddressDerivation(format!("invalid south subnet '{}': {e}", subnet.cidr))
            })?;
            for (ordinal, port) in ports::ordered_switch_ports(&spec.interfaces, &self.config).into_iter().enumerate() {
                let south_facing = spec.interfaces[port]
                    .peer
                    .as_ref()
                    .is_some_and(|peer| !pass.upstream.contains(&peer.chassis_id));
                if !south_facing {
                    continue;
                }
                let ordinal = u32::try_from(ordinal)
                    .map_err(|_| ControllerError::AddressDerivation(format!("too many ports on {}", pass.key)))?;
                desired.insert((port.to_string(), family), port_address(&south, ordinal)?);
            }
        }
        Ok(desired)
    }

    pub(super) async fn assign_addresses(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        let desired = self.desired_addresses(pass)?;
        let owned = self
            .ipam
            .list_ips(&pass.key.namespace, &[(OWNER_LABEL, pass.key.name.as_str())])
            .await?;

        let mut by_slot: BTreeMap<Slot, Vec<&Ip>> = BTreeMap::new();
        for ip in &owned {
            match slot_of(ip) {
                Some(slot) => by_slot.entry(slot).or_default().push(ip),
                None => debug!("Ignoring unlabelled address {} of switch {}", ip.name_any(), pass.key),
            }
        }

        // Addresses currently in the spec that are still backed by an owned Ip
        let still_owned = pass
            .switch
            .spec
            .interfaces
            .iter()
            .flat_map(|(name, iface)| AddressFamily::ALL.map(|f| (name, iface, f)))
            .filter(|(name, iface, family)| {
                address_of(iface, *family).is_some_and(|current| {
                    by_slot
                        .get(&(interface_label(name), *family))
                        .is_some_and(|ips| ips.iter().any(|ip| granted(ip).as_ref() == Some(current)))
                })
            })
            .count();
        let still_owned = u32::try_from(still_owned).unwrap_or(u32::MAX);
        if pass.status().addresses != still_owned {
            pass.status_mut().addresses = still_owned;
            return Ok(Step::Stop(Persist::Status));
        }

        let mut spec_changed = false;
        let mut pending = false;
        let mut wanted_slots = BTreeSet::new();
        for ((port, family), want) in &desired {
            let label = interface_label(port);
            wanted_slots.insert((label.clone(), *family));
            let want_text = want.to_string();
            let subnet_name = south_ref(&pass.switch.spec.south_subnets, *family).map(|r| r.name.as_str());

            let mut confirmed = None;
            let mut live_request = false;
            for ip in by_slot.get(&(label.clone(), *family)).into_iter().flatten() {
                if ip.spec.ip.as_deref() != Some(want_text.as_str()) || Some(ip.spec.subnet.as_str()) != subnet_name {
                    debug!("Releasing stale address {} of switch {}", ip.name_any(), pass.key);
                    self.ipam.delete_ip(&object_key(*ip)?).await?;
                    pass.wrote_other_objects = true;
                    continue;
                }
                match ip.status.as_ref().map(|s| s.state).unwrap_or_default() {
                    IpamState::Finished if granted(ip).as_deref() == Some(want_text.as_str()) => {
                        confirmed = Some(want_text.clone());
                        live_request = true;
                    }
                    IpamState::Processing => live_request = true,
                    _ => {
                        let reason = ip.status.as_ref().and_then(|s| s.message.clone());
                        warn!(
                            "IPAM rejected {} for {} on switch {}: {}",
                            want_text,
                            port,
                            pass.key,
                            reason.as_deref().unwrap_or("no reason given")
                        );
                        self.ipam.delete_ip(&object_key(*ip)?).await?;
                        live_request = true;
                    }
                }
            }

            if confirmed.is_none() {
                pending = true;
                if !live_request {
                    let request = self.ip_request(pass, port, *family, &want_text, &label);
                    let created = self.ipam.create_ip(&request).await?;
                    pass.wrote_other_objects = true;
                    info!("Requested {} for {} on switch {} ({})", want_text, port, pass.key, created.name_any());
                }
            } else if address_of(&pass.switch.spec.interfaces[port], *family) != confirmed.as_ref() {
                info!(
                    "Switch {} {} {} address {} (peer side {})",
                    pass.key,
                    port,
                    family,
                    want_text,
                    peer_address(want)
                );
            }

            if let Some(interface) = pass.switch.spec.interfaces.get_mut(port) {
                spec_changed |= set_address(interface, *family, confirmed);
            }
        }

        // Addresses no longer wanted: release the request, clear the port
        for (slot, ips) in &by_slot {
            if wanted_slots.contains(slot) {
                continue;
            }
            for ip in ips {
                debug!("Releasing address {} of switch {}", ip.name_any(), pass.key);
                self.ipam.delete_ip(&object_key(*ip)?).await?;
                pass.wrote_other_objects = true;
            }
        }
        for (name, interface) in &mut pass.switch.spec.interfaces {
            for family in AddressFamily::ALL {
                if !desired.contains_key(&(name.clone(), family)) {
                    spec_changed |= set_address(interface, family, None);
                }
            }
        }

        if spec_changed {
            return Ok(Step::Stop(Persist::Object));
        }
        if pending {
            return Ok(pass.settle_in(SwitchState::DefineAddresses));
        }
        Ok(Step::Continue)
    }

    fn ip_request(&self, pass: &Pass, port: &str, family: AddressFamily, address: &str, label: &str) -> Ip {
        let mut ip = Ip::new(
            "",
            IpSpec {
                subnet: south_ref(&pass.switch.spec.south_subnets, family)
                    .map(|r| r.name.clone())
                    .unwrap_or_default(),
                ip: Some(address.to_string()),
                consumer: Some(pass.key.clone()),
            },
        );
        ip.metadata.name = None;
        ip.metadata.generate_name = Some(format!(
            "{}-{}-{}-",
            pass.key.name,
            interface_name_part(port),
            family.short()
        ));
        ip.metadata.namespace = Some(pass.key.namespace.clone());
        ip.metadata.labels = Some(BTreeMap::from([
            (OWNER_LABEL.to_string(), pass.key.name.clone()),
            (ADDRESS_FAMILY_LABEL.to_string(), family.label_value().to_string()),
            (INTERFACE_LABEL.to_string(), label.to_string()),
        ]));
        ip
    }
}
