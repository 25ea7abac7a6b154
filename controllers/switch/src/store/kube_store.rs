//! Kubernetes-backed `FabricStore` and `IpamClient`.

use super::{label_selector, FabricStore, IpamClient, LabelFilters};
use crate::error::ControllerError;
use crds::{Ip, ObjectKeyRef, Subnet, Switch, SwitchAssignment, SwitchConnection};
use kube::api::{DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Store implementation over the Kubernetes API
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    /// Creates a new store on top of a Kubernetes client.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        K::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), namespace)
    }
}

/// Status patch carrying the `resourceVersion` precondition.
///
/// Optional status fields that serialize to nothing are sent as explicit
/// nulls, otherwise a merge patch would leave the stale value in place.
pub(crate) fn status_patch<S: Serialize>(
    resource_version: Option<&str>,
    status: &S,
    optional_fields: &[&str],
) -> Result<serde_json::Value, ControllerError> {
    let mut status = serde_json::to_value(status)?;
    if let Some(fields) = status.as_object_mut() {
        for field in optional_fields {
            fields.entry(*field).or_insert(serde_json::Value::Null);
        }
    }
    Ok(serde_json::json!({
        "metadata": { "resourceVersion": resource_version },
        "status": status,
    }))
}

/// A write refused on a stale `resourceVersion` becomes a `Conflict`
fn write_error(err: kube::Error) -> ControllerError {
    match err {
        kube::Error::Api(response) if response.code == 409 => ControllerError::Conflict(response.message.clone()),
        e => e.into(),
    }
}

/// Wrap a failed IPAM call with what was being done
fn ipam_error(action: &str, target: &str, err: ControllerError) -> ControllerError {
    ControllerError::Ipam(format!("{action} {target}: {err}"))
}

async fn get_opt<K>(api: Api<K>, name: &str) -> Result<Option<K>, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    Ok(api.get_opt(name).await?)
}

async fn list<K>(api: Api<K>, labels: LabelFilters<'_>) -> Result<Vec<K>, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let selector = label_selector(labels);
    let params = if selector.is_empty() {
        ListParams::default()
    } else {
        ListParams::default().labels(&selector)
    };
    Ok(api.list(&params).await?.items)
}

async fn create<K>(api: Api<K>, obj: &K) -> Result<K, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    Ok(api.create(&PostParams::default(), obj).await?)
}

async fn replace<K>(api: Api<K>, obj: &K) -> Result<K, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
{
    let name = obj
        .meta()
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("object has no name".to_string()))?;
    api.replace(name, &PostParams::default(), obj).await.map_err(write_error)
}

async fn patch_status<K>(api: Api<K>, name: &str, patch: serde_json::Value) -> Result<K, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
        .map_err(write_error)
}

async fn delete<K>(api: Api<K>, name: &str) -> Result<(), ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(name, &DeleteParams::default()).await {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => {
            debug!("{} already gone", name);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn name_of<K: Resource>(obj: &K) -> Result<&str, ControllerError> {
    obj.meta()
        .name
        .as_deref()
        .ok_or_else(|| ControllerError::InvalidConfig("object has no name".to_string()))
}

fn namespace_of<K: Resource>(obj: &K) -> &str {
    obj.meta().namespace.as_deref().unwrap_or("default")
}

#[async_trait::async_trait]
impl FabricStore for KubeStore {
    async fn get_switch(&self, key: &ObjectKeyRef) -> Result<Option<Switch>, ControllerError> {
        get_opt(self.api::<Switch>(&key.namespace), &key.name).await
    }

    async fn list_switches(&self, namespace: &str) -> Result<Vec<Switch>, ControllerError> {
        list(self.api::<Switch>(namespace), &[]).await
    }

    async fn replace_switch(&self, switch: &Switch) -> Result<Switch, ControllerError> {
        replace(self.api::<Switch>(namespace_of(switch)), switch).await
    }

    async fn replace_switch_status(&self, switch: &Switch) -> Result<Switch, ControllerError> {
        let status = switch.status.clone().unwrap_or_default();
        let patch = status_patch(
            switch.metadata.resource_version.as_deref(),
            &status,
            &["configAgent", "configuringSince", "message"],
        )?;
        patch_status(self.api::<Switch>(namespace_of(switch)), name_of(switch)?, patch).await
    }

    async fn get_connection(&self, key: &ObjectKeyRef) -> Result<Option<SwitchConnection>, ControllerError> {
        get_opt(self.api::<SwitchConnection>(&key.namespace), &key.name).await
    }

    async fn list_connections(&self, namespace: &str) -> Result<Vec<SwitchConnection>, ControllerError> {
        list(self.api::<SwitchConnection>(namespace), &[]).await
    }

    async fn create_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError> {
        create(self.api::<SwitchConnection>(namespace_of(connection)), connection).await
    }

    async fn replace_connection(&self, connection: &SwitchConnection) -> Result<SwitchConnection, ControllerError> {
        replace(self.api::<SwitchConnection>(namespace_of(connection)), connection).await
    }

    async fn delete_connection(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        delete(self.api::<SwitchConnection>(&key.namespace), &key.name).await
    }

    async fn list_assignments(&self, namespace: &str) -> Result<Vec<SwitchAssignment>, ControllerError> {
        list(self.api::<SwitchAssignment>(namespace), &[]).await
    }

    async fn replace_assignment(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError> {
        replace(self.api::<SwitchAssignment>(namespace_of(assignment)), assignment).await
    }

    async fn replace_assignment_status(&self, assignment: &SwitchAssignment) -> Result<SwitchAssignment, ControllerError> {
        let status = assignment.status.clone().unwrap_or_default();
        let patch = status_patch(
            assignment.metadata.resource_version.as_deref(),
            &status,
            &["switchRef"],
        )?;
        patch_status(
            self.api::<SwitchAssignment>(namespace_of(assignment)),
            name_of(assignment)?,
            patch,
        )
        .await
    }
}

#[async_trait::async_trait]
impl IpamClient for KubeStore {
    async fn list_subnets(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Subnet>, ControllerError> {
        list(self.api::<Subnet>(namespace), labels)
            .await
            .map_err(|e| ipam_error("listing subnets in", namespace, e))
    }

    async fn create_subnet(&self, subnet: &Subnet) -> Result<Subnet, ControllerError> {
        create(self.api::<Subnet>(namespace_of(subnet)), subnet)
            .await
            .map_err(|e| ipam_error("requesting subnet from", &subnet.spec.parent_subnet, e))
    }

    async fn delete_subnet(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        delete(self.api::<Subnet>(&key.namespace), &key.name)
            .await
            .map_err(|e| ipam_error("releasing subnet", &key.to_string(), e))
    }

    async fn list_ips(&self, namespace: &str, labels: LabelFilters<'_>) -> Result<Vec<Ip>, ControllerError> {
        list(self.api::<Ip>(namespace), labels)
            .await
            .map_err(|e| ipam_error("listing addresses in", namespace, e))
    }

    async fn create_ip(&self, ip: &Ip) -> Result<Ip, ControllerError> {
        create(self.api::<Ip>(namespace_of(ip)), ip)
            .await
            .map_err(|e| ipam_error("requesting address from", &ip.spec.subnet, e))
    }

    async fn delete_ip(&self, key: &ObjectKeyRef) -> Result<(), ControllerError> {
        delete(self.api::<Ip>(&key.namespace), &key.name)
            .await
            .map_err(|e| ipam_error("releasing address", &key.to_string(), e))
    }
}
