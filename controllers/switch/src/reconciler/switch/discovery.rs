//! Peer discovery and assignment phases.

use crate::error::ControllerError;
use crate::reconciler::assignment::assignment_matches;
use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::ports;
use crate::reconciler::Reconciler;
use crds::{
    canonical_chassis_id, chassis_label_value, AssignmentState, PeerSwitchRef, SwitchAssignment,
    SwitchAssignmentStatus, SwitchConnection, SwitchConnectionSpec, SwitchState, CHASSIS_ID_LABEL,
};
use kube::ResourceExt;
use std::collections::{BTreeMap, BTreeSet};
use tracing::info;

impl Reconciler {
    /// Classify peers from LLDP data and keep the adjacency record's
    /// neighbour set in line with them.
    pub(super) async fn discover_peers(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        if pass.switch.spec.scan_ports && ports::apply_peers(&mut pass.switch.spec, &self.config) {
            info!(
                "Switch {} peers updated ({} ports, {} switch ports)",
                pass.key, pass.switch.spec.total_ports, pass.switch.spec.switch_ports
            );
            return Ok(Step::Stop(Persist::Object));
        }

        let chassis_id = canonical_chassis_id(&pass.switch.spec.chassis.chassis_id);
        let mut neighbors = ports::switch_neighbors(&pass.switch.spec.interfaces);
        neighbors.remove(&chassis_id);

        let Some(record) = self.store.get_connection(&pass.key).await? else {
            let mut record = SwitchConnection::new(
                &pass.key.name,
                SwitchConnectionSpec {
                    switch_ref: pass.key.clone(),
                    chassis_id: chassis_id.clone(),
                    connection_level: pass.switch.spec.connection_level,
                    upstream: Vec::new(),
                    downstream: neighbors.iter().map(PeerSwitchRef::unresolved).collect(),
                },
            );
            record.metadata.namespace = Some(pass.key.namespace.clone());
            if let Some(label) = chassis_label_value(&chassis_id) {
                record.metadata.labels = Some(BTreeMap::from([(CHASSIS_ID_LABEL.to_string(), label)]));
            }
            self.store.create_connection(&record).await?;
            pass.wrote_other_objects = true;
            info!("Created SwitchConnection {} with {} neighbours", pass.key, neighbors.len());
            return Ok(pass.settle_in(SwitchState::Discovery));
        };

        let recorded: BTreeSet<&str> = record.spec.neighbor_chassis_ids().collect();
        let current: BTreeSet<&str> = neighbors.iter().map(String::as_str).collect();
        if recorded == current {
            return Ok(Step::Continue);
        }

        let mut updated = record.clone();
        updated.spec.upstream.retain(|p| neighbors.contains(&p.chassis_id));
        updated.spec.downstream.retain(|p| neighbors.contains(&p.chassis_id));
        for added in current.difference(&recorded) {
            updated.spec.downstream.push(PeerSwitchRef::unresolved(*added));
        }
        updated.spec.downstream.sort();
        self.store.replace_connection(&updated).await?;
        pass.wrote_other_objects = true;
        info!(
            "SwitchConnection {} neighbours changed: {} -> {}",
            pass.key,
            recorded.len(),
            current.len()
        );
        Ok(pass.settle_in(SwitchState::Discovery))
    }

    /// Look for a `SwitchAssignment` naming this switch and bind it.
    pub(super) async fn bind_assignment(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        let chassis_id = &pass.switch.spec.chassis.chassis_id;
        let serial = &pass.switch.spec.chassis.serial_number;

        let mut assignments: Vec<SwitchAssignment> = self
            .store
            .list_assignments(&pass.key.namespace)
            .await?
            .into_iter()
            .filter(|a| assignment_matches(a, chassis_id, serial))
            .collect();
        assignments.sort_by_key(|a| a.name_any());

        let Some(assignment) = assignments.into_iter().next() else {
            return Ok(Step::Continue);
        };
        pass.assigned = true;

        let bound = SwitchAssignmentStatus {
            state: AssignmentState::Finished,
            switch_ref: Some(pass.key.clone()),
        };
        if assignment.status.as_ref() != Some(&bound) {
            let mut updated = assignment;
            info!("Binding SwitchAssignment {} to switch {}", updated.name_any(), pass.key);
            updated.status = Some(bound);
            self.store.replace_assignment_status(&updated).await?;
            pass.wrote_other_objects = true;
        }
        Ok(Step::Continue)
    }
}
