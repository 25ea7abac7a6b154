//! SwitchConnection reconciler
//!
//! Keeps an adjacency record in line with its switch: the mirrored level and
//! chassis ID, and the object names of neighbours that have appeared (or
//! disappeared) since the record was written. Removal of a record belongs to
//! the deletion phase of its switch.

use super::Reconciler;
use crate::error::ControllerError;
use crate::index::ChassisIndex;
use crate::store::object_key;
use crds::{canonical_chassis_id, PeerSwitchRef, SwitchConnection};
use std::time::Duration;
use tracing::{debug, warn};

fn resolve_names(peers: &mut [PeerSwitchRef], index: &ChassisIndex) {
    for peer in peers {
        *peer = match index.get(&peer.chassis_id) {
            Some(found) => PeerSwitchRef::resolved(peer.chassis_id.as_str(), &found.key),
            None => PeerSwitchRef::unresolved(peer.chassis_id.as_str()),
        };
    }
}

impl Reconciler {
    /// Reconcile one adjacency record; returns the requeue delay.
    pub async fn reconcile_switch_connection(
        &self,
        connection: &SwitchConnection,
    ) -> Result<Duration, ControllerError> {
        let key = object_key(connection)?;
        let owner_key = if connection.spec.switch_ref.name.is_empty() {
            key.clone()
        } else {
            connection.spec.switch_ref.clone()
        };

        let Some(owner) = self.store.get_switch(&owner_key).await? else {
            warn!("SwitchConnection {} has no switch {}", key, owner_key);
            return Ok(self.config.requeue_interval);
        };
        if owner.metadata.deletion_timestamp.is_some() {
            debug!("Switch {} is being deleted, leaving SwitchConnection {} to it", owner_key, key);
            return Ok(self.config.requeue_interval);
        }

        let switches = self.store.list_switches(&key.namespace).await?;
        let index = ChassisIndex::build(&switches);

        let mut updated = connection.clone();
        updated.spec.switch_ref = owner_key;
        updated.spec.chassis_id = canonical_chassis_id(&owner.spec.chassis.chassis_id);
        updated.spec.connection_level = owner.spec.connection_level;
        resolve_names(&mut updated.spec.upstream, &index);
        resolve_names(&mut updated.spec.downstream, &index);

        if updated.spec == connection.spec {
            return Ok(self.config.requeue_interval);
        }
        debug!("Updating SwitchConnection {}", key);
        self.store.replace_connection(&updated).await?;
        Ok(self.config.fast_requeue)
    }
}
