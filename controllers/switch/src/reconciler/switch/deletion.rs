//! Deletion phase: release everything the switch holds, then let it go.

use crate::error::ControllerError;
use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::Reconciler;
use crate::store::object_key;
use crds::{AssignmentState, SwitchAssignmentStatus, OWNER_LABEL, SWITCH_FINALIZER};
use kube::ResourceExt;
use tracing::{debug, error, info};

impl Reconciler {
    pub(super) async fn release(&self, pass: &mut Pass) -> Result<Step, ControllerError> {
        let holds_finalizer = pass.switch.finalizers().iter().any(|f| f == SWITCH_FINALIZER);
        if !holds_finalizer {
            debug!("Switch {} is being deleted and holds no finalizer", pass.key);
            return Ok(Step::Stop(Persist::Nothing));
        }

        if let Err(e) = self.release_resources(pass).await {
            error!("Failed to release resources of switch {}: {}", pass.key, e);
            pass.status_mut().message = Some(format!("failed to release resources: {e}"));
            if let Err(status_err) = self.store.replace_switch_status(&pass.switch).await {
                debug!("Could not record release failure on {}: {}", pass.key, status_err);
            }
            return Err(ControllerError::ResourceRelease(format!("{}: {e}", pass.key)));
        }

        if let Some(finalizers) = pass.switch.metadata.finalizers.as_mut() {
            finalizers.retain(|f| f != SWITCH_FINALIZER);
        }
        info!("Released switch {}, removing finalizer", pass.key);
        Ok(Step::Stop(Persist::Object))
    }

    async fn release_resources(&self, pass: &mut Pass) -> Result<(), ControllerError> {
        let owner = [(OWNER_LABEL, pass.key.name.as_str())];

        for ip in self.ipam.list_ips(&pass.key.namespace, &owner).await? {
            debug!("Releasing address {} of switch {}", ip.name_any(), pass.key);
            self.ipam.delete_ip(&object_key(&ip)?).await?;
        }
        for subnet in self.ipam.list_subnets(&pass.key.namespace, &owner).await? {
            debug!("Releasing subnet {} of switch {}", subnet.name_any(), pass.key);
            self.ipam.delete_subnet(&object_key(&subnet)?).await?;
        }

        self.store.delete_connection(&pass.key).await?;

        for assignment in self.store.list_assignments(&pass.key.namespace).await? {
            let bound_here = assignment
                .status
                .as_ref()
                .and_then(|s| s.switch_ref.as_ref())
                .is_some_and(|r| *r == pass.key);
            if !bound_here {
                continue;
            }
            let mut updated = assignment;
            info!("Unbinding SwitchAssignment {} from switch {}", updated.name_any(), pass.key);
            updated.status = Some(SwitchAssignmentStatus {
                state: AssignmentState::Pending,
                switch_ref: None,
            });
            self.store.replace_assignment_status(&updated).await?;
        }
        pass.wrote_other_objects = true;
        Ok(())
    }
}
