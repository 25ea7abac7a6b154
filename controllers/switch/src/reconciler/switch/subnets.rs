//! Subnets phase: one south subnet per address family, reserved via IPAM.
//!
//! Ownership is re-checked on every pass through the owner label on the IPAM
//! object. A reference whose subnet lost the label (or vanished) is counted
//! out of the status first, then dropped from the spec, then re-requested.
//! A subnet the switch has outgrown goes the same way, except that it is
//! still ours and gets released when the reference is dropped.

use crate::error::ControllerError;
use crate::reconciler::addressing::{parse_south_subnet, subnet_capacity, truncate};
use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::Reconciler;
use crds::{
    AddressFamily, IpamState, SouthSubnets, Subnet, SubnetRef, SubnetSpec, SwitchState,
    ADDRESS_FAMILY_LABEL, OWNER_LABEL,
};
use ipnetwork::IpNetwork;
use kube::ResourceExt;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

pub(super) fn south_ref(subnets: &SouthSubnets, family: AddressFamily) -> Option<&SubnetRef> {
    match family {
        AddressFamily::Ipv4 => subnets.v4.as_ref(),
        AddressFamily::Ipv6 => subnets.v6.as_ref(),
    }
}

fn set_south_ref(subnets: &mut SouthSubnets, family: AddressFamily, value: Option<SubnetRef>) {
    match family {
        AddressFamily::Ipv4 => subnets.v4 = value,
        AddressFamily::Ipv6 => subnets.v6 = value,
    }
}

fn is_family(subnet: &Subnet, family: AddressFamily) -> bool {
    subnet.labels().get(ADDRESS_FAMILY_LABEL).map(String::as_str) == Some(family.label_value())
}

fn reserved(subnet: &Subnet) -> Option<IpNetwork> {
    let status = subnet.status.as_ref()?;
    if status.state != IpamState::Finished {
        return None;
    }
    status.reserved.as_deref()?.parse::<IpNetwork>().ok().map(truncate)
}

/// Whether `subnet` backs the spec reference `r`
fn backs(subnet: &Subnet, family: AddressFamily, r: &SubnetRef) -> bool {
    subnet.name_any() == r.name
        && is_family(subnet, family)
        && reserved(subnet).is_some_and(|net| Some(net) == r.cidr.parse::<IpNetwork>().ok().map(truncate))
}

impl Reconciler {
    pub(super) async fn ensure_south_subnets(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        let owned = self
            .ipam
            .list_subnets(&pass.key.namespace, &[(OWNER_LABEL, pass.key.name.as_str())])
            .await?;

        let switch_ports = pass.switch.spec.switch_ports;
        let mut still_owned = 0u32;
        let mut revoked = Vec::new();
        let mut outgrown = Vec::new();
        for family in AddressFamily::ALL {
            if let Some(r) = south_ref(&pass.switch.spec.south_subnets, family) {
                match owned.iter().find(|s| backs(s, family, r)) {
                    Some(_) if parse_south_subnet(&r.cidr, family, switch_ports).is_ok() => still_owned += 1,
                    Some(subnet) => outgrown.push((family, subnet)),
                    None => revoked.push(family),
                }
            }
        }

        if pass.status().subnets != still_owned {
            pass.status_mut().subnets = still_owned;
            return Ok(Step::Stop(Persist::Status));
        }
        if !revoked.is_empty() || !outgrown.is_empty() {
            for family in revoked {
                warn!(
                    "Switch {} no longer owns its {} south subnet, requesting a new one",
                    pass.key, family
                );
                set_south_ref(&mut pass.switch.spec.south_subnets, family, None);
            }
            for (family, subnet) in outgrown {
                info!(
                    "Switch {} outgrew its {} south subnet {} ({} ports), requesting a larger one",
                    pass.key,
                    family,
                    subnet.name_any(),
                    switch_ports
                );
                self.ipam.delete_subnet(&crate::store::object_key(subnet)?).await?;
                pass.wrote_other_objects = true;
                set_south_ref(&mut pass.switch.spec.south_subnets, family, None);
            }
            return Ok(Step::Stop(Persist::Object));
        }

        let mut spec_changed = false;
        let mut pending = false;
        for family in AddressFamily::ALL {
            let mut candidates: Vec<&Subnet> = owned.iter().filter(|s| is_family(s, family)).collect();
            candidates.sort_by_key(|s| s.name_any());

            if let Some(current) = south_ref(&pass.switch.spec.south_subnets, family) {
                for extra in candidates.iter().filter(|s| s.name_any() != current.name) {
                    info!("Releasing surplus {} subnet {} of switch {}", family, extra.name_any(), pass.key);
                    self.ipam.delete_subnet(&crate::store::object_key(*extra)?).await?;
                    pass.wrote_other_objects = true;
                }
                continue;
            }

            let mut usable = None;
            let mut in_flight = false;
            let mut rejected = Vec::new();
            for candidate in &candidates {
                let state = candidate.status.as_ref().map(|s| s.state).unwrap_or_default();
                match state {
                    IpamState::Processing => in_flight = true,
                    IpamState::Finished => {
                        let cidr = candidate.status.as_ref().and_then(|s| s.reserved.clone()).unwrap_or_default();
                        match parse_south_subnet(&cidr, family, switch_ports) {
                            Ok(net) if usable.is_none() => usable = Some((candidate.name_any(), net)),
                            Ok(_) => {}
                            Err(e) => rejected.push((*candidate, e.to_string())),
                        }
                    }
                    IpamState::Failed => {
                        let message = candidate.status.as_ref().and_then(|s| s.message.clone());
                        rejected.push((*candidate, message.unwrap_or_else(|| "no reason given".to_string())));
                    }
                }
            }

            if let Some((name, net)) = usable {
                info!("Switch {} {} south subnet is {} ({})", pass.key, family, net, name);
                set_south_ref(
                    &mut pass.switch.spec.south_subnets,
                    family,
                    Some(SubnetRef { name, cidr: net.to_string() }),
                );
                spec_changed = true;
                continue;
            }

            pending = true;

            // Failed requests are dropped without counting as progress so
            // the new request goes out on the steady interval.
            let failed = !rejected.is_empty();
            for (subnet, reason) in rejected {
                warn!("IPAM could not provide {} subnet {} for switch {}: {}", family, subnet.name_any(), pass.key, reason);
                self.ipam.delete_subnet(&crate::store::object_key(subnet)?).await?;
            }
            if failed {
                continue;
            }

            if in_flight {
                debug!("Switch {} waiting for {} subnet", pass.key, family);
                continue;
            }
            let request = self.subnet_request(pass, family);
            let created = self.ipam.create_subnet(&request).await?;
            pass.wrote_other_objects = true;
            info!("Requested {} south subnet {} for switch {}", family, created.name_any(), pass.key);
        }

        if spec_changed {
            return Ok(Step::Stop(Persist::Object));
        }
        if pending {
            return Ok(pass.settle_in(SwitchState::DefineAddresses));
        }
        Ok(Step::Continue)
    }

    fn subnet_request(&self, pass: &Pass, family: AddressFamily) -> Subnet {
        let mut subnet = Subnet::new(
            "",
            SubnetSpec {
                parent_subnet: self.config.subnet_pool(family).to_string(),
                capacity: subnet_capacity(family, pass.switch.spec.switch_ports),
                consumer: Some(pass.key.clone()),
            },
        );
        subnet.metadata.name = None;
        subnet.metadata.generate_name = Some(format!("{}-south-{}-", pass.key.name, family.short()));
        subnet.metadata.namespace = Some(pass.key.namespace.clone());
        subnet.metadata.labels = Some(BTreeMap::from([
            (OWNER_LABEL.to_string(), pass.key.name.clone()),
            (ADDRESS_FAMILY_LABEL.to_string(), family.label_value().to_string()),
        ]));
        subnet
    }
}
