//! In-memory cluster for unit tests
//!
//! Implements both `FabricStore` and `IpamClient`. Writes bump a
//! `resourceVersion` and stale writes fail with a conflict, like the API
//! server. With `auto_fulfill` on (the default) the mock also plays the IPAM
//! subsystem and answers subnet and address requests at creation time.

use super::{FabricStore, IpamClient, LabelFilters};
use crate::error::ControllerError;
use crate::reconciler::addressing::{family_of, max_prefix_len, nth_block};
use chrono::{DateTime, Utc};
use crds::{
    ConfigAgentStatus, Ip, IpamRequestStatus, IpamState, ObjectKeyRef, Subnet, Switch,
    SwitchAssignment, SwitchConnection,
};
use ipnetwork::IpNetwork;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::Resource;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

type Objects<K> = BTreeMap<ObjectKeyRef, K>;

#[derive(Default)]
struct MockState {
    switches: Objects<Switch>,
    connections: Objects<SwitchConnection>,
    assignments: Objects<SwitchAssignment>,
    subnets: Objects<Subnet>,
    ips: Objects<Ip>,
    version: u64,
    generated: u64,
    writes: usize,
    pools: HashMap<String, IpNetwork>,
    auto_fulfill: bool,
    fail_deletes: bool,
}

impl MockState {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.writes += 1;
        self.version.to_string()
    }
}

/// Mock cluster for testing
#[derive(Clone)]
pub struct MockCluster {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockCluster {
    fn default() -> Self {
        Self::new()
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKeyRef {
    let meta = obj.meta();
    ObjectKeyRef::new(
        meta.name.clone().unwrap_or_default(),
        meta.namespace.clone().unwrap_or_else(|| "default".to_string()),
    )
}

fn matches_labels<K: Resource>(obj: &K, labels: LabelFilters<'_>) -> bool {
    let present = obj.meta().labels.as_ref();
    labels
        .iter()
        .all(|(k, v)| present.and_then(|l| l.get(*k)).is_some_and(|value| value == v))
}

fn conflict(key: &ObjectKeyRef, reason: &str) -> ControllerError {
    ControllerError::Conflict(format!("{key}: {reason}"))
}

fn insert_new<K: Resource + Clone>(
    state: &mut MockState,
    objects: fn(&mut MockState) -> &mut Objects<K>,
    obj: &K,
) -> Result<K, ControllerError> {
    let mut obj = obj.clone();
    if obj.meta().name.is_none() {
        state.generated += 1;
        let prefix = obj.meta().generate_name.clone().unwrap_or_default();
        obj.meta_mut().name = Some(format!("{prefix}{:05}", state.generated));
    }
    if obj.meta().namespace.is_none() {
        obj.meta_mut().namespace = Some("default".to_string());
    }
    let key = key_of(&obj);
    if objects(state).contains_key(&key) {
        return Err(conflict(&key, "already exists"));
    }
    obj.meta_mut().resource_version = Some(state.next_version());
    objects(state).insert(key, obj.clone());
    Ok(obj)
}

/// Replace a stored object after checking its resourceVersion. `merge` copies
/// the written parts of `incoming` onto the stored object.
fn replace_in<K: Resource + Clone>(
    state: &mut MockState,
    objects: fn(&mut MockState) -> &mut Objects<K>,
    incoming: &K,
    merge: impl FnOnce(&mut K, &K),
) -> Result<K, ControllerError> {
    let key = key_of(incoming);
    let stored = objects(state)
        .get(&key)
        .cloned()
        .ok_or_else(|| conflict(&key, "not found"))?;
    if stored.meta().resource_version != incoming.meta().resource_version {
        return Err(conflict(&key, "resourceVersion mismatch"));
    }
    let mut updated = stored;
    merge(&mut updated, incoming);
    updated.meta_mut().resource_version = Some(state.next_version());
    objects(state).insert(key, updated.clone());
    Ok(updated)
}

impl MockCluster {
    /// Create a mock cluster with the default south pools and IPAM auto-fulfilment
    pub fn new() -> Self {
        let mut state = MockState {
            auto_fulfill: true,
            ..Default::default()
        };
        state.pools.insert("switch-south-v4".to_string(), "10.0.0.0/16".parse().unwrap());
        state.pools.insert("switch-south-v6".to_string(), "fd00::/48".parse().unwrap());
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Stop answering IPAM requests; they stay `Processing` until fulfilled by hand
    pub fn manual_ipam(self) -> Self {
        self.state.lock().unwrap().auto_fulfill = false;
        self
    }

    /// Replace the parent pool for IPAM subnet requests
    pub fn set_pool(&self, name: &str, cidr: &str) {
        self.state
            .lock()
            .unwrap()
            .pools
            .insert(name.to_string(), cidr.parse().unwrap());
    }

    /// Make every delete call fail
    pub fn set_fail_deletes(&self, fail: bool) {
        self.state.lock().unwrap().fail_deletes = fail;
    }

    /// Number of successful writes so far
    pub fn write_count(&self) -> usize {
        self.state.lock().unwrap().writes
    }

    /// Add a switch (for test setup)
    pub fn add_switch(&self, switch: Switch) -> ObjectKeyRef {
        let mut state = self.state.lock().unwrap();
        let created = insert_new(&mut state, |s| &mut s.switches, &switch).unwrap();
        key_of(&created)
    }

    /// Add a switch assignment (for test setup)
    pub fn add_assignment(&self, assignment: SwitchAssignment) -> ObjectKeyRef {
        let mut state = self.state.lock().unwrap();
        let created = insert_new(&mut state, |s| &mut s.assignments, &assignment).unwrap();
        key_of(&created)
    }

    pub fn switch(&self, key: &ObjectKeyRef) -> Option<Switch> {
        self.state.lock().unwrap().switches.get(key).cloned()
    }

    pub fn switch_keys(&self) -> Vec<ObjectKeyRef> {
        self.state.lock().unwrap().switches.keys().cloned().collect()
    }

    pub fn connection(&self, key: &ObjectKeyRef) -> Option<SwitchConnection> {
        self.state.lock().unwrap().connections.get(key).cloned()
    }

    pub fn assignment(&self, key: &ObjectKeyRef) -> Option<SwitchAssignment> {
        self.state.lock().unwrap().assignments.get(key).cloned()
    }

    pub fn subnets(&self) -> Vec<Subnet> {
        self.state.lock().unwrap().subnets.values().cloned().collect()
    }

    pub fn ips(&self) -> Vec<Ip> {
        self.state.lock().unwrap().ips.values().cloned().collect()
    }

    /// Mutate a stored switch out of band (simulates another writer)
    pub fn edit_switch(&self, key: &ObjectKeyRef, edit: impl FnOnce(&mut Switch)) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        let switch = state.switches.get_mut(key).unwrap();
        edit(switch);
        switch.metadata.resource_version = Some(version);
    }

    /// Set the deletion timestamp, as the API server does for objects with finalizers
    pub fn mark_switch_deleted(&self, key: &ObjectKeyRef, at: DateTime<Utc>) {
        let timestamp: Time = serde_json::from_value(serde_json::json!(at.to_rfc3339())).unwrap();
        self.edit_switch(key, |sw| sw.metadata.deletion_timestamp = Some(timestamp));
    }

    /// Record a configuration agent heartbeat
    pub fn heartbeat(&self, key: &ObjectKeyRef, at: DateTime<Utc>) {
        self.edit_switch(key, |sw| {
            let status = sw.status.get_or_insert_with(Default::default);
            let agent = status.config_agent.get_or_insert_with(ConfigAgentStatus::default);
            agent.managed = true;
            agent.last_check = Some(at);
        });
    }

    /// Remove a label from an IPAM subnet (simulates an operator revoking ownership)
    pub fn remove_subnet_label(&self, name: &str, label: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(subnet) = state.subnets.values_mut().find(|s| s.metadata.name.as_deref() == Some(name)) {
            if let Some(labels) = subnet.metadata.labels.as_mut() {
                labels.remove(label);
            }
            subnet.metadata.resource_version = Some(version);
        }
    }

    /// Remove a label from an IPAM address
    pub fn remove_ip_label(&self, name: &str, label: &str) {
        let mut state = self.state.lock().unwrap();
        let version = state.next_version();
        if let Some(ip) = state.ips.values_mut().find(|i| i.metadata.name.as_deref() == Some(name)) {
            if let Some(labels) = ip.metadata.labels.as_mut() {
                labels.remove(label);
            }
            ip.metadata.resource_version = Some(version);
        }
    }

    /// Finish a pending subnet request by hand
    pub fn finish_subnet(&self, name: &str, cidr: &str) {
        let mut state = self.state.lock().unwrap();
        if let Some(subnet) = state.subnets.values_mut().find(|s| s.metadata.name.as_deref() == Some(name)) {
            subnet.status = Some(IpamRequestStatus {
                state: IpamState::Finished,
                reserved: Some(cidr.to_string()),
                message: None,
            });
        }
    }
}

fn fulfill_subnet(state: &MockState, subnet: &mut Subnet) {
    let Some(pool) = state.pools.get(&subnet.spec.parent_subnet) else {
        subnet.status = Some(failed(format!("unknown parent subnet {}", subnet.spec.parent_subnet)));
        return;
    };
    let host_bits = subnet.spec.capacity.max(1).next_power_of_two().trailing_zeros();
    let Some(prefix_len) = u32::from(max_prefix_len(family_of(pool)))
        .checked_sub(host_bits)
        .and_then(|len| u8::try_from(len).ok())
    else {
        subnet.status = Some(failed("capacity too large".to_string()));
        return;
    };

    let taken: Vec<IpNetwork> = state
        .subnets
        .values()
        .filter(|s| s.spec.parent_subnet == subnet.spec.parent_subnet)
        .filter_map(|s| s.status.as_ref()?.reserved.as_ref()?.parse().ok())
        .collect();
    let free = (0..)
        .map_while(|index| nth_block(pool, prefix_len, index))
        .find(|c| !taken.iter().any(|t| t.contains(c.network()) || c.contains(t.network())));

    subnet.status = Some(match free {
        Some(cidr) => IpamRequestStatus {
            state: IpamState::Finished,
            reserved: Some(cidr.to_string()),
            message: None,
        },
        None => failed("pool exhausted".to_string()),
    });
}

fn fulfill_ip(state: &MockState, ip: &mut Ip) {
    let Some(requested) = ip.spec.ip.as_deref().and_then(|raw| raw.parse::<IpNetwork>().ok()) else {
        ip.status = Some(failed("no address requested".to_string()));
        return;
    };
    let parent = state
        .subnets
        .values()
        .find(|s| s.metadata.name.as_deref() == Some(ip.spec.subnet.as_str()))
        .and_then(|s| s.status.as_ref()?.reserved.as_ref()?.parse::<IpNetwork>().ok());
    let in_use = state.ips.values().any(|other| {
        other.status.as_ref().and_then(|s| s.reserved.as_deref()) == ip.spec.ip.as_deref()
    });

    ip.status = Some(match parent {
        Some(parent) if parent.contains(requested.ip()) && !in_use => IpamRequestStatus {
            state: IpamState::Finished,
            reserved: Some(requested.to_string()),
            message: None,
        },
        Some(_) if in_use => failed("address in use".to_string()),
        _ => failed("address outside subnet".to_string()),
    });
}

fn failed(message: String) -> IpamRequestStatus {
    IpamRequestStatus {
        state: IpamState::Failed,
        reserved: None,
        message: Some(message),
    }
}

#[async_trait::async_trait]
impl FabricStore for MockCluster {
    async fn get_switch(&self, key: &ObjectKeyRef) -> Result<Option<Switch>, ControllerError> {
        Ok(self.switch(key))
    }

    async fn list_switches(&self, namespace: &str) -> Result<Vec<Switch>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .switches
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn replace_switch(&self, switch: &Switch) -> Result<Switch, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let updated = replace_in(&mut state, |s| &mut s.switches, switch, |stored, incoming| {
            stored.metadata = incoming.metadata.clone();
            stored.spec = incoming.spec.clone();
        })?;
        let finalized = updated.metadata.deletion_timestamp.is_some()
            && updated.metadata.finalizers.as_ref().is_none_or(|f| f.is_empty());
        if finalized {
            state.switches.remove(&key_of(&updated));
        }
        Ok(updated)
    }

    async fn replace_switch_status(&self, switch: &Switch) -> Result<Switch, ControllerError> {
        let mut state = self.state.lock().unwrap();
        replace_in(&mut state, |s| &mut s.switches, switch, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
    }

    async fn get_connection(&self, key: &ObjectKeyRef) -> Result<Option<SwitchConnection>, ControllerError> {
        Ok(self.connection(key))
    }

    async fn list_connections(&self, namespace: &str) -> Result<Vec<SwitchConnection>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .connections
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError> {
        let mut state = self.state.lock().unwrap();
        insert_new(&mut state, |s| &mut s.connections, connection)
    }

    async fn replace_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError> {
        let mut state = self.state.lock().unwrap();
        replace_in(&mut state, |s| &mut s.connections, connection, |stored, incoming| {
            stored.metadata = incoming.metadata.clone();
            stored.spec = incoming.spec.clone();
        })
    }

    async fn delete_connection(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ControllerError::Watch(format!("delete of {key} refused")));
        }
        state.connections.remove(key);
        Ok(())
    }

    async fn list_assignments(&self, namespace: &str) -> Result<Vec<SwitchAssignment>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .assignments
            .iter()
            .filter(|(k, _)| k.namespace == namespace)
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn replace_assignment(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError> {
        let mut state = self.state.lock().unwrap();
        replace_in(&mut state, |s| &mut s.assignments, assignment, |stored, incoming| {
            stored.metadata = incoming.metadata.clone();
            stored.spec = incoming.spec.clone();
        })
    }

    async fn replace_assignment_status(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError> {
        let mut state = self.state.lock().unwrap();
        replace_in(&mut state, |s| &mut s.assignments, assignment, |stored, incoming| {
            stored.status = incoming.status.clone();
        })
    }
}

#[async_trait::async_trait]
impl IpamClient for MockCluster {
    async fn list_subnets(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Subnet>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .subnets
            .iter()
            .filter(|(k, v)| k.namespace == namespace && matches_labels(*v, labels))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create_subnet(&self, subnet: &Subnet) -> Result<Subnet, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let mut request = subnet.clone();
        request.status = Some(IpamRequestStatus::default());
        if state.auto_fulfill {
            fulfill_subnet(&state, &mut request);
        }
        insert_new(&mut state, |s| &mut s.subnets, &request)
    }

    async fn delete_subnet(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ControllerError::Ipam(format!("delete of subnet {key} refused")));
        }
        state.subnets.remove(key);
        Ok(())
    }

    async fn list_ips(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Ip>, ControllerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .ips
            .iter()
            .filter(|(k, v)| k.namespace == namespace && matches_labels(*v, labels))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create_ip(&self, ip: &Ip) -> Result<Ip, ControllerError> {
        let mut state = self.state.lock().unwrap();
        let mut request = ip.clone();
        request.status = Some(IpamRequestStatus::default());
        if state.auto_fulfill {
            fulfill_ip(&state, &mut request);
        }
        insert_new(&mut state, |s| &mut s.ips, &request)
    }

    async fn delete_ip(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_deletes {
            return Err(ControllerError::Ipam(format!("delete of address {key} refused")));
        }
        state.ips.remove(key);
        Ok(())
    }
}
