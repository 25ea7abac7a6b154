//! Test utilities for unit testing reconcilers
//!
//! Builders for switches, LLDP neighbours and assignments, plus a driver
//! that runs switch passes against a `MockCluster` until the fabric settles.

use crate::reconciler::Reconciler;
use crate::store::mock::MockCluster;
use chrono::{DateTime, Utc};
use crds::*;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Helper to create a switch with the given ports and their LLDP neighbours
pub fn switch_with_ports(name: &str, chassis_id: &str, ports: &[(&str, Option<LldpNeighbor>)]) -> Switch {
    let interfaces: BTreeMap<String, InterfaceSpec> = ports
        .iter()
        .map(|(port, lldp)| {
            (
                (*port).to_string(),
                InterfaceSpec {
                    lldp: lldp.clone(),
                    ..Default::default()
                },
            )
        })
        .collect();

    Switch {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: SwitchSpec {
            hostname: name.to_string(),
            chassis: ChassisInfo {
                chassis_id: chassis_id.to_string(),
                serial_number: format!("SN-{name}"),
                ..Default::default()
            },
            interfaces,
            ..Default::default()
        },
        status: None,
    }
}

/// LLDP record of a neighbouring switch
pub fn lldp_switch(chassis_id: &str) -> LldpNeighbor {
    LldpNeighbor {
        chassis_id: chassis_id.to_string(),
        system_name: Some(format!("sw-{chassis_id}")),
        capabilities: vec!["Bridge".to_string(), "Router".to_string()],
        ..Default::default()
    }
}

/// LLDP record of a server
pub fn lldp_machine(chassis_id: &str) -> LldpNeighbor {
    LldpNeighbor {
        chassis_id: chassis_id.to_string(),
        capabilities: vec!["Station".to_string()],
        ..Default::default()
    }
}

/// Helper to create a spine assignment
pub fn assignment(name: &str, chassis_id: &str, serial: &str) -> SwitchAssignment {
    SwitchAssignment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: SwitchAssignmentSpec {
            role: AssignedRole::Spine,
            serial: serial.to_string(),
            chassis_id: chassis_id.to_string(),
        },
        status: None,
    }
}

/// Run passes over every switch until a full round changes nothing.
///
/// Returns the number of rounds it took; panics when the fabric has not
/// settled after `max_rounds`.
pub async fn run_until_settled(
    reconciler: &Reconciler,
    cluster: &MockCluster,
    now: DateTime<Utc>,
    max_rounds: usize,
) -> usize {
    for round in 1..=max_rounds {
        let mut changed = false;
        for key in cluster.switch_keys() {
            let Some(switch) = cluster.switch(&key) else {
                continue;
            };
            let outcome = reconciler
                .reconcile_switch(&switch, now)
                .await
                .unwrap_or_else(|e| panic!("pass over {key} failed: {e}"));
            changed |= outcome.changed;
        }
        if !changed {
            return round;
        }
    }
    panic!("fabric did not settle within {max_rounds} rounds");
}

/// One pass over a single switch, read fresh from the cluster
pub async fn pass(reconciler: &Reconciler, cluster: &MockCluster, key: &ObjectKeyRef, now: DateTime<Utc>) -> crate::reconciler::PassOutcome {
    let switch = cluster.switch(key).unwrap_or_else(|| panic!("switch {key} missing"));
    reconciler
        .reconcile_switch(&switch, now)
        .await
        .unwrap_or_else(|e| panic!("pass over {key} failed: {e}"))
}
