//! Kubernetes resource watchers.
//!
//! Every watched kind runs through the generic `watch_resource()` helper on
//! top of `kube_runtime::Controller`, which handles reconnection, per-object
//! serialization and requeueing.
//!
//! The Switch controller also watches the objects a switch pass reads, so a
//! change to any of them re-enqueues the switches it concerns:
//! - a `SwitchConnection` maps to its own switch and every resolved neighbour
//! - a `SwitchAssignment` maps to the switches it designates (looked up in
//!   the controller's own cache) and to the switch it is bound to
//! - IPAM `Subnet` and `Ip` objects map to the switch in their owner label

use crate::error::ControllerError;
use crate::reconciler::assignment::assignment_matches;
use crate::reconciler::Reconciler;
use chrono::Utc;
use crds::{
    chassis_label_value, Ip, Subnet, Switch, SwitchAssignment, SwitchConnection, CHASSIS_ID_LABEL,
    OWNER_LABEL,
};
use futures::StreamExt;
use kube::{Api, Client, ResourceExt};
use kube_runtime::controller::{Action, Config as RuntimeConfig, Error as RuntimeError};
use kube_runtime::reflector::{ObjectRef, Store};
use kube_runtime::{watcher, Controller};
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<Action, ControllerError>> + Send>>;

/// `namespace/name` of an object, the key of its backoff state
fn resource_key<K: kube::Resource>(obj: &K) -> String {
    format!(
        "{}/{}",
        obj.namespace().unwrap_or_else(|| "default".to_string()),
        obj.name_any()
    )
}

/// Generic watcher helper on top of `kube_runtime::Controller`.
///
/// Conflicts are retried right away from fresh state; any other error
/// requeues with the per-object Fibonacci backoff, which a successful
/// reconciliation resets.
async fn watch_resource<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    resource_name: &str,
) -> Result<(), ControllerError>
where
    K: kube::Resource + Clone + Send + Sync + 'static + Debug + serde::de::DeserializeOwned,
    K::DynamicType: Default + Eq + std::hash::Hash + Clone + Debug + Unpin,
    F: Fn(Arc<Reconciler>, Arc<K>) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", resource_name);

    let error_policy = |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = resource_key(obj.as_ref());
        if error.is_conflict() {
            return Action::requeue(ctx.config().fast_requeue);
        }
        ctx.increment_error(&key);
        let (backoff_seconds, error_count) = ctx.get_backoff_for_resource(&key);
        error!(
            "Reconciliation error for {} {} (error {}), retrying in {}s: {}",
            resource_name, key, error_count, backoff_seconds, error
        );
        Action::requeue(Duration::from_secs(backoff_seconds))
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        let resource_name = resource_name.to_string();
        async move {
            let key = resource_key(obj.as_ref());
            debug!("Reconciling {} {}", resource_name, key);
            let action = reconcile_fn(ctx.clone(), obj).await?;
            ctx.reset_error(&key);
            Ok(action)
        }
    };

    let concurrency = reconciler.config().concurrency;
    controller
        .with_config(RuntimeConfig::default().concurrency(concurrency))
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, action)) => debug!("{} {} reconciled: {:?}", resource_name, obj, action),
                Err(RuntimeError::ReconcilerFailed(e, obj)) if e.is_conflict() => {
                    debug!("Conflict on {} {}: {}", resource_name, obj, e)
                }
                Err(e) => error!("Controller error for {}: {}", resource_name, e),
            }
        })
        .await;

    Ok(())
}

/// Switches affected by a change to an adjacency record
fn connection_targets(connection: &SwitchConnection) -> Vec<ObjectRef<Switch>> {
    let namespace = connection.namespace().unwrap_or_else(|| "default".to_string());
    let owner = if connection.spec.switch_ref.name.is_empty() {
        ObjectRef::new(&connection.name_any()).within(&namespace)
    } else {
        ObjectRef::new(&connection.spec.switch_ref.name).within(&connection.spec.switch_ref.namespace)
    };

    let mut targets = vec![owner];
    targets.extend(
        connection
            .spec
            .upstream
            .iter()
            .chain(connection.spec.downstream.iter())
            .filter_map(|peer| peer.object_key())
            .map(|key| ObjectRef::new(&key.name).within(&key.namespace)),
    );
    targets
}

/// Switches designated by, or bound to, an assignment
fn assignment_targets(switches: &Store<Switch>, assignment: &SwitchAssignment) -> Vec<ObjectRef<Switch>> {
    let label = chassis_label_value(&assignment.spec.chassis_id);
    let mut targets: Vec<ObjectRef<Switch>> = switches
        .state()
        .iter()
        .filter(|sw| {
            let labelled = label.is_some() && sw.labels().get(CHASSIS_ID_LABEL) == label.as_ref();
            labelled
                || assignment_matches(assignment, &sw.spec.chassis.chassis_id, &sw.spec.chassis.serial_number)
        })
        .map(|sw| ObjectRef::from_obj(&**sw))
        .collect();

    if let Some(bound) = assignment.status.as_ref().and_then(|s| s.switch_ref.as_ref()) {
        targets.push(ObjectRef::new(&bound.name).within(&bound.namespace));
    }
    targets
}

/// The switch named in an IPAM object's owner label
fn owner_target<K: kube::Resource>(obj: &K) -> Option<ObjectRef<Switch>> {
    let owner = obj.labels().get(OWNER_LABEL)?;
    let namespace = obj.namespace().unwrap_or_else(|| "default".to_string());
    Some(ObjectRef::new(owner).within(&namespace))
}

/// Watches Kubernetes resources for changes.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
}

impl Watcher {
    /// Creates a new watcher instance.
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: Option<String>) -> Self {
        Self {
            reconciler,
            client,
            namespace,
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope> + Clone + Debug + serde::de::DeserializeOwned,
        K::DynamicType: Default,
    {
        match self.namespace.as_deref() {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Starts watching Switch resources and everything a switch pass reads.
    pub async fn watch_switches(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<Switch>(), watcher::Config::default());
        let switches = controller.store();

        let controller = controller
            .watches(self.api::<SwitchConnection>(), watcher::Config::default(), |connection| {
                connection_targets(&connection)
            })
            .watches(self.api::<SwitchAssignment>(), watcher::Config::default(), move |assignment| {
                assignment_targets(&switches, &assignment)
            })
            .watches(
                self.api::<Subnet>(),
                watcher::Config::default().labels(OWNER_LABEL),
                |subnet| owner_target(&subnet),
            )
            .watches(
                self.api::<Ip>(),
                watcher::Config::default().labels(OWNER_LABEL),
                |ip| owner_target(&ip),
            );

        watch_resource(
            controller,
            self.reconciler.clone(),
            |reconciler, switch| {
                Box::pin(async move {
                    let outcome = reconciler.reconcile_switch(&switch, Utc::now()).await?;
                    Ok(Action::requeue(outcome.requeue_after))
                })
            },
            "Switch",
        )
        .await
    }

    /// Starts watching SwitchConnection resources.
    pub async fn watch_switch_connections(&self) -> Result<(), ControllerError> {
        watch_resource(
            Controller::new(self.api::<SwitchConnection>(), watcher::Config::default()),
            self.reconciler.clone(),
            |reconciler, connection| {
                Box::pin(async move {
                    let requeue = reconciler.reconcile_switch_connection(&connection).await?;
                    Ok(Action::requeue(requeue))
                })
            },
            "SwitchConnection",
        )
        .await
    }

    /// Starts watching SwitchAssignment resources.
    pub async fn watch_switch_assignments(&self) -> Result<(), ControllerError> {
        watch_resource(
            Controller::new(self.api::<SwitchAssignment>(), watcher::Config::default()),
            self.reconciler.clone(),
            |reconciler, assignment| {
                Box::pin(async move {
                    let requeue = reconciler.reconcile_switch_assignment(&assignment).await?;
                    Ok(Action::requeue(requeue))
                })
            },
            "SwitchAssignment",
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assignment, switch_with_ports};
    use crds::{
        AssignmentState, ObjectKeyRef, PeerSwitchRef, SwitchAssignmentStatus, SwitchConnectionSpec,
    };
    use kube_runtime::reflector::store;
    use kube_runtime::watcher::Event;

    #[test]
    fn test_connection_maps_to_owner_and_resolved_peers() {
        let mut connection = SwitchConnection::new(
            "leaf-1",
            SwitchConnectionSpec {
                switch_ref: ObjectKeyRef::new("leaf-1", "fabric"),
                chassis_id: "00:00:00:00:00:02".to_string(),
                connection_level: 1,
                upstream: vec![PeerSwitchRef::resolved("00:00:00:00:00:01", &ObjectKeyRef::new("spine-1", "fabric"))],
                downstream: vec![PeerSwitchRef::unresolved("00:00:00:00:00:03")],
            },
        );
        connection.metadata.namespace = Some("fabric".to_string());

        let targets = connection_targets(&connection);

        assert_eq!(
            targets,
            vec![
                ObjectRef::new("leaf-1").within("fabric"),
                ObjectRef::new("spine-1").within("fabric"),
            ]
        );
    }

    #[test]
    fn test_assignment_maps_through_the_cache() {
        let (reader, mut writer) = store::<Switch>();
        let mut labelled = switch_with_ports("spine-1", "68:21:5f:47:0d:6e", &[]);
        labelled.metadata.labels = Some([(CHASSIS_ID_LABEL.to_string(), "68-21-5f-47-0d-6e".to_string())].into());
        writer.apply_watcher_event(&Event::Apply(labelled));
        writer.apply_watcher_event(&Event::Apply(switch_with_ports("leaf-1", "68:21:5f:47:0d:70", &[])));

        let mut root = assignment("root", "68:21:5F:47:0D:6E", "");
        assert_eq!(
            assignment_targets(&reader, &root),
            vec![ObjectRef::new("spine-1").within("default")]
        );

        root.spec.chassis_id = "00:00:00:00:00:99".to_string();
        root.status = Some(SwitchAssignmentStatus {
            state: AssignmentState::Finished,
            switch_ref: Some(ObjectKeyRef::new("spine-1", "default")),
        });
        assert_eq!(
            assignment_targets(&reader, &root),
            vec![ObjectRef::new("spine-1").within("default")]
        );
    }

    #[test]
    fn test_ipam_objects_map_through_the_owner_label() {
        let mut subnet = Subnet::new(
            "spine-1-south-v4-00001",
            crds::SubnetSpec {
                parent_subnet: "switch-south-v4".to_string(),
                capacity: 4,
                consumer: None,
            },
        );
        subnet.metadata.namespace = Some("fabric".to_string());
        assert_eq!(owner_target(&subnet), None);

        subnet.metadata.labels = Some([(OWNER_LABEL.to_string(), "spine-1".to_string())].into());
        assert_eq!(owner_target(&subnet), Some(ObjectRef::new("spine-1").within("fabric")));
    }
}
