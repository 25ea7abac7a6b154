//! Access to the object store and to the IPAM subsystem.
//!
//! Both are traits so the reconciliation engine can be driven against an
//! in-memory cluster in unit tests. The concrete implementation talks to the
//! Kubernetes API (`KubeStore`).
//!
//! Writes are optimistic: `replace_*` calls carry the `resourceVersion` read
//! at the start of the pass and fail with a conflict when the object changed
//! in between.

mod kube_store;
#[cfg(test)]
pub mod mock;

pub use kube_store::KubeStore;

use crate::error::ControllerError;
use crds::{Ip, ObjectKeyRef, Subnet, Switch, SwitchAssignment, SwitchConnection};

/// Label equality filters, e.g. `&[(OWNER_LABEL, "spine-1")]`
pub type LabelFilters<'a> = &'a [(&'a str, &'a str)];

/// Fabric objects owned by this controller
#[async_trait::async_trait]
pub trait FabricStore: Send + Sync {
    // Switch
    async fn get_switch(&self, key: &ObjectKeyRef) -> Result<Option<Switch>, ControllerError>;
    async fn list_switches(&self, namespace: &str) -> Result<Vec<Switch>, ControllerError>;
    /// Replace metadata and spec
    async fn replace_switch(&self, switch: &Switch) -> Result<Switch, ControllerError>;
    /// Replace the status subresource
    async fn replace_switch_status(&self, switch: &Switch) -> Result<Switch, ControllerError>;

    // SwitchConnection
    async fn get_connection(&self, key: &ObjectKeyRef) -> Result<Option<SwitchConnection>, ControllerError>;
    async fn list_connections(&self, namespace: &str) -> Result<Vec<SwitchConnection>, ControllerError>;
    async fn create_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError>;
    async fn replace_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError>;
    /// Delete; a missing object is not an error
    async fn delete_connection(&self, key: &ObjectKeyRef) -> Result<(), ControllerError>;

    // SwitchAssignment
    async fn list_assignments(&self, namespace: &str) -> Result<Vec<SwitchAssignment>, ControllerError>;
    async fn replace_assignment(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError>;
    async fn replace_assignment_status(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError>;
}

/// Requests against the IPAM subsystem
#[async_trait::async_trait]
pub trait IpamClient: Send + Sync {
    async fn list_subnets(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Subnet>, ControllerError>;
    /// Create a subnet request (`generateName` is honoured)
    async fn create_subnet(&self, subnet: &Subnet) -> Result<Subnet, ControllerError>;
    /// Delete; a missing object is not an error
    async fn delete_subnet(&self, key: &ObjectKeyRef) -> Result<(), ControllerError>;

    async fn list_ips(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Ip>, ControllerError>;
    /// Create an address request (`generateName` is honoured)
    async fn create_ip(&self, ip: &Ip) -> Result<Ip, ControllerError>;
    /// Delete; a missing object is not an error
    async fn delete_ip(&self, key: &ObjectKeyRef) -> Result<(), ControllerError>;
}

/// Render label filters as a Kubernetes label selector
#[must_use]
pub fn label_selector(labels: LabelFilters<'_>) -> String {
    labels
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// `namespace/name` key of any namespaced object
pub fn object_key<K: kube::Resource>(obj: &K) -> Result<ObjectKeyRef, ControllerError> {
    let meta = obj.meta();
    let name = meta
        .name
        .clone()
        .ok_or_else(|| ControllerError::InvalidConfig("object has no name".to_string()))?;
    let namespace = meta.namespace.clone().unwrap_or_else(|| "default".to_string());
    Ok(ObjectKeyRef::new(name, namespace))
}
