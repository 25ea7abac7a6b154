//! Levelling over whole graphs, without a cluster.
//!
//! `Fabric` applies `topology::resolve` to every switch in turn and writes
//! the outcome back the way a switch pass does: its own record, its level and
//! role, and the parent entry in the records of its resolved children.

use super::topology::{adopt_parent, resolve, NeighborView};
use crds::{
    ObjectKeyRef, PeerSwitchRef, SwitchConnectionSpec, SwitchRole, CONNECTION_LEVEL_UNRESOLVED,
};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Default)]
struct Fabric {
    links: BTreeMap<String, BTreeSet<String>>,
    roots: BTreeSet<String>,
    with_machines: BTreeSet<String>,
    keys: BTreeMap<String, ObjectKeyRef>,
    levels: BTreeMap<String, u8>,
    roles: BTreeMap<String, SwitchRole>,
    records: BTreeMap<String, SwitchConnectionSpec>,
}

impl Fabric {
    fn new(edges: &[(&str, &str)]) -> Self {
        let mut fabric = Fabric::default();
        for (a, b) in edges {
            fabric.links.entry((*a).to_string()).or_default().insert((*b).to_string());
            fabric.links.entry((*b).to_string()).or_default().insert((*a).to_string());
        }
        for (chassis, neighbors) in &fabric.links {
            let key = ObjectKeyRef::new(format!("sw-{}", chassis.replace(':', "")), "default");
            fabric.records.insert(
                chassis.clone(),
                SwitchConnectionSpec {
                    switch_ref: key.clone(),
                    chassis_id: chassis.clone(),
                    connection_level: CONNECTION_LEVEL_UNRESOLVED,
                    upstream: Vec::new(),
                    downstream: neighbors.iter().map(PeerSwitchRef::unresolved).collect(),
                },
            );
            fabric.keys.insert(chassis.clone(), key);
            fabric.levels.insert(chassis.clone(), CONNECTION_LEVEL_UNRESOLVED);
            fabric.roles.insert(chassis.clone(), SwitchRole::Undefined);
        }
        fabric
    }

    fn root(mut self, chassis: &str) -> Self {
        self.roots.insert(chassis.to_string());
        self
    }

    fn machines_on(mut self, chassis: &str) -> Self {
        self.with_machines.insert(chassis.to_string());
        self
    }

    /// One pass over every switch; returns whether anything changed
    fn round(&mut self) -> bool {
        let mut changed = false;
        let order: Vec<String> = self.links.keys().cloned().collect();
        for chassis in order {
            let resolution = {
                let views: Vec<NeighborView<'_>> = self.links[&chassis]
                    .iter()
                    .map(|n| NeighborView {
                        chassis_id: n,
                        key: self.keys.get(n),
                        connection_level: self.levels[n],
                        record: self.records.get(n),
                    })
                    .collect();
                resolve(
                    &chassis,
                    self.levels[&chassis],
                    self.roots.contains(&chassis),
                    self.with_machines.contains(&chassis),
                    &views,
                )
            };

            let record = self.records.get_mut(&chassis).unwrap();
            let desired = SwitchConnectionSpec {
                connection_level: resolution.connection_level,
                upstream: resolution.upstream.clone(),
                downstream: resolution.downstream.clone(),
                ..record.clone()
            };
            if *record != desired {
                *record = desired;
                changed = true;
            }

            if resolution.is_resolved() {
                let parent = PeerSwitchRef::resolved(chassis.as_str(), &self.keys[&chassis]);
                for child in &self.links[&chassis] {
                    let level = self.levels[child];
                    if level != CONNECTION_LEVEL_UNRESOLVED && level > resolution.connection_level {
                        changed |= adopt_parent(self.records.get_mut(child).unwrap(), &parent);
                    }
                }
            }

            if self.levels[&chassis] != resolution.connection_level || self.roles[&chassis] != resolution.role {
                self.levels.insert(chassis.clone(), resolution.connection_level);
                self.roles.insert(chassis.clone(), resolution.role);
                changed = true;
            }
        }
        changed
    }

    fn settle(&mut self, max_rounds: usize) -> usize {
        for round in 1..=max_rounds {
            if !self.round() {
                return round;
            }
        }
        panic!("levels did not settle within {max_rounds} rounds");
    }

    fn level(&self, chassis: &str) -> u8 {
        self.levels[chassis]
    }

    fn upstream(&self, chassis: &str) -> Vec<&str> {
        self.records[chassis].upstream.iter().map(|p| p.chassis_id.as_str()).collect()
    }
}

const A: &str = "00:00:00:00:00:01";
const B: &str = "00:00:00:00:00:02";
const C: &str = "00:00:00:00:00:03";
const D: &str = "00:00:00:00:00:04";
const E: &str = "00:00:00:00:00:05";

#[test]
fn test_chain_converges_from_the_far_end() {
    // Processed in chassis order, the root comes last in every round
    let mut fabric = Fabric::new(&[(A, B), (B, C), (C, D)]).root(D);

    let rounds = fabric.settle(10);

    assert_eq!(fabric.level(D), 0);
    assert_eq!(fabric.level(C), 1);
    assert_eq!(fabric.level(B), 2);
    assert_eq!(fabric.level(A), 3);
    assert_eq!(fabric.upstream(A), vec![B]);
    assert_eq!(fabric.upstream(D), Vec::<&str>::new());
    assert!(rounds <= 6, "took {rounds} rounds");
}

#[test]
fn test_diamond_with_cross_link() {
    //      A
    //     / \
    //    B - C
    //     \ /
    //      D
    let mut fabric = Fabric::new(&[(A, B), (A, C), (B, C), (B, D), (C, D)])
        .root(A)
        .machines_on(D);

    fabric.settle(10);

    assert_eq!(fabric.level(A), 0);
    assert_eq!(fabric.level(B), 1);
    assert_eq!(fabric.level(C), 1);
    assert_eq!(fabric.level(D), 2);
    assert_eq!(fabric.upstream(D), vec![B, C]);
    // Peers on the same level are not each other's parent
    assert_eq!(fabric.upstream(B), vec![A]);
    assert_eq!(fabric.roles[D], SwitchRole::Leaf);
    assert_eq!(fabric.roles[B], SwitchRole::Spine);
}

#[test]
fn test_cycle_without_root_stays_unresolved() {
    let mut fabric = Fabric::new(&[(A, B), (B, C), (C, A)]);

    fabric.settle(10);

    for chassis in [A, B, C] {
        assert_eq!(fabric.level(chassis), CONNECTION_LEVEL_UNRESOLVED);
        assert!(fabric.upstream(chassis).is_empty());
    }
}

#[test]
fn test_withdrawn_root_leaves_the_triangle_unresolved() {
    let mut fabric = Fabric::new(&[(A, B), (A, C), (B, C)]).root(A);
    fabric.settle(10);
    assert_eq!(fabric.level(B), 1);
    assert_eq!(fabric.level(C), 1);

    fabric.roots.remove(A);
    let rounds = fabric.settle(10);

    // B and C list each other as downstream, which must not make either
    // the other's parent
    for chassis in [A, B, C] {
        assert_eq!(fabric.level(chassis), CONNECTION_LEVEL_UNRESOLVED);
        assert!(fabric.upstream(chassis).is_empty());
    }
    assert!(rounds <= 3, "took {rounds} rounds");
}

#[test]
fn test_level_only_drops_through_a_shallower_parent() {
    let key = ObjectKeyRef::new("sw-b", "default");
    let record = SwitchConnectionSpec {
        switch_ref: key.clone(),
        chassis_id: B.to_string(),
        connection_level: 1,
        upstream: Vec::new(),
        downstream: vec![PeerSwitchRef::unresolved(A)],
    };
    let views = [NeighborView {
        chassis_id: B,
        key: Some(&key),
        connection_level: 1,
        record: Some(&record),
    }];

    // A same-level neighbour is no parent for a resolved switch
    assert_eq!(resolve(A, 1, false, false, &views).connection_level, CONNECTION_LEVEL_UNRESOLVED);
    // A deeper or unresolved switch takes it
    assert_eq!(resolve(A, 3, false, false, &views).connection_level, 2);
    assert_eq!(resolve(A, CONNECTION_LEVEL_UNRESOLVED, false, false, &views).connection_level, 2);
}

#[test]
fn test_second_spine_below_the_root() {
    let mut fabric = Fabric::new(&[(A, B)]).root(A);

    fabric.settle(10);

    assert_eq!(fabric.level(B), 1);
    assert_eq!(fabric.roles[B], SwitchRole::Spine);
    assert_eq!(fabric.roles[A], SwitchRole::Spine);
}

#[test]
fn test_island_stays_unresolved_next_to_a_rooted_fabric() {
    let mut fabric = Fabric::new(&[(A, B), (D, E)]).root(A);

    fabric.settle(10);

    assert_eq!(fabric.level(B), 1);
    assert_eq!(fabric.level(D), CONNECTION_LEVEL_UNRESOLVED);
    assert_eq!(fabric.level(E), CONNECTION_LEVEL_UNRESOLVED);
}

#[test]
fn test_neighbour_claiming_a_low_level_is_not_trusted() {
    // B says it is at level 0, but its record does not list A as a child
    let record = SwitchConnectionSpec {
        switch_ref: ObjectKeyRef::new("sw-b", "default"),
        chassis_id: B.to_string(),
        connection_level: 0,
        upstream: vec![PeerSwitchRef::unresolved(A)],
        downstream: Vec::new(),
    };
    let key = ObjectKeyRef::new("sw-b", "default");
    let views = [NeighborView {
        chassis_id: B,
        key: Some(&key),
        connection_level: 0,
        record: Some(&record),
    }];

    let resolution = resolve(A, CONNECTION_LEVEL_UNRESOLVED, false, false, &views);

    assert_eq!(resolution.connection_level, CONNECTION_LEVEL_UNRESOLVED);
    assert!(!resolution.is_resolved());
    assert_eq!(resolution.downstream, vec![PeerSwitchRef::resolved(B, &key)]);
}
