//! Connections phase: level, role and the adjacency split.

use crate::error::ControllerError;
use crate::index::ChassisIndex;
use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::topology::{self, NeighborView};
use crate::reconciler::{ports, Reconciler};
use crds::{canonical_chassis_id, PeerSwitchRef, SwitchConnection, SwitchConnectionSpec, SwitchState, CONNECTION_LEVEL_UNRESOLVED};
use kube::ResourceExt;
use std::collections::HashMap;
use tracing::{debug, info};

impl Reconciler {
    pub(super) async fn resolve_connections(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        let namespace = pass.key.namespace.clone();
        let own_chassis = canonical_chassis_id(&pass.switch.spec.chassis.chassis_id);

        let switches = self.store.list_switches(&namespace).await?;
        let index = ChassisIndex::build(&switches);
        let records = self.store.list_connections(&namespace).await?;
        let by_chassis: HashMap<String, &SwitchConnection> = records
            .iter()
            .map(|r| (canonical_chassis_id(&r.spec.chassis_id), r))
            .collect();

        let mut neighbors = ports::switch_neighbors(&pass.switch.spec.interfaces);
        neighbors.remove(&own_chassis);
        let views: Vec<NeighborView<'_>> = neighbors
            .iter()
            .map(|chassis| {
                let indexed = index.get(chassis);
                NeighborView {
                    chassis_id: chassis,
                    key: indexed.map(|i| &i.key),
                    connection_level: indexed.map_or(CONNECTION_LEVEL_UNRESOLVED, |i| i.connection_level),
                    record: indexed.and(by_chassis.get(chassis)).map(|r| &r.spec),
                }
            })
            .collect();

        let resolution = topology::resolve(
            &own_chassis,
            pass.switch.spec.connection_level,
            pass.assigned,
            ports::has_machine_peer(&pass.switch.spec.interfaces),
            &views,
        );
        pass.upstream = resolution.upstream.iter().map(|p| p.chassis_id.clone()).collect();

        let Some(own_record) = records.iter().find(|r| r.name_any() == pass.key.name) else {
            debug!("SwitchConnection {} not found yet", pass.key);
            return Ok(pass.settle_in(SwitchState::Discovery));
        };
        let desired = SwitchConnectionSpec {
            switch_ref: pass.key.clone(),
            chassis_id: own_chassis.clone(),
            connection_level: resolution.connection_level,
            upstream: resolution.upstream.clone(),
            downstream: resolution.downstream.clone(),
        };
        if own_record.spec != desired {
            let mut updated = own_record.clone();
            updated.spec = desired;
            self.store.replace_connection(&updated).await?;
            pass.wrote_other_objects = true;
        }

        // Resolved children learn about their parent right away
        if resolution.is_resolved() {
            let parent = PeerSwitchRef::resolved(own_chassis.as_str(), &pass.key);
            for child in &views {
                let deeper = child.key.is_some()
                    && child.connection_level != CONNECTION_LEVEL_UNRESOLVED
                    && child.connection_level > resolution.connection_level;
                let Some(record) = by_chassis.get(child.chassis_id).filter(|_| deeper) else {
                    continue;
                };
                let mut updated = (*record).clone();
                if topology::adopt_parent(&mut updated.spec, &parent) {
                    debug!("Listing {} as upstream of {}", pass.key, updated.name_any());
                    self.store.replace_connection(&updated).await?;
                    pass.wrote_other_objects = true;
                }
            }
        }

        let spec = &mut pass.switch.spec;
        if spec.connection_level != resolution.connection_level || spec.role != resolution.role {
            info!(
                "Switch {} level {} -> {}, role {} -> {}",
                pass.key, spec.connection_level, resolution.connection_level, spec.role, resolution.role
            );
            spec.connection_level = resolution.connection_level;
            spec.role = resolution.role;
            return Ok(Step::Stop(Persist::Object));
        }

        if !resolution.is_resolved() || !resolution.consistent {
            return Ok(pass.settle_in(SwitchState::DefinePeers));
        }
        Ok(Step::Continue)
    }
}
