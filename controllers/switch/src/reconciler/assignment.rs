//! SwitchAssignment reconciler
//!
//! Assignments are bound by the switch pass; this side only maintains the
//! correlation labels, gives new assignments a Pending status and releases a
//! binding whose switch no longer exists or no longer matches.

use super::Reconciler;
use crate::error::ControllerError;
use crate::store::object_key;
use crds::{
    canonical_chassis_id, chassis_label_value, AssignmentState, SwitchAssignment,
    SwitchAssignmentStatus, CHASSIS_ID_LABEL, SERIAL_LABEL,
};
use std::time::Duration;
use tracing::{debug, info};

/// Whether `assignment` designates the switch with this chassis ID and serial.
///
/// Chassis IDs are compared in canonical form; a serial only matches when
/// both sides are non-empty.
#[must_use]
pub(crate) fn assignment_matches(assignment: &SwitchAssignment, chassis_id: &str, serial: &str) -> bool {
    let chassis_match = !assignment.spec.chassis_id.trim().is_empty()
        && canonical_chassis_id(&assignment.spec.chassis_id) == canonical_chassis_id(chassis_id);
    let serial = serial.trim();
    let serial_match = !serial.is_empty() && assignment.spec.serial.trim() == serial;
    chassis_match || serial_match
}

/// Label values are at most 63 characters of `[A-Za-z0-9_.-]`, alphanumeric at both ends
fn is_label_safe(value: &str) -> bool {
    !value.is_empty()
        && value.len() <= 63
        && value.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        && value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric())
}

impl Reconciler {
    /// Reconcile one assignment; returns the requeue delay.
    pub async fn reconcile_switch_assignment(
        &self,
        assignment: &SwitchAssignment,
    ) -> Result<Duration, ControllerError> {
        let key = object_key(assignment)?;

        let mut labelled = assignment.clone();
        let labels = labelled.metadata.labels.get_or_insert_with(Default::default);
        if let Some(chassis) = chassis_label_value(&assignment.spec.chassis_id) {
            labels.insert(CHASSIS_ID_LABEL.to_string(), chassis);
        }
        let serial = assignment.spec.serial.trim();
        if is_label_safe(serial) {
            labels.insert(SERIAL_LABEL.to_string(), serial.to_string());
        }
        if labelled.metadata.labels != assignment.metadata.labels {
            debug!("Labelling SwitchAssignment {}", key);
            self.store.replace_assignment(&labelled).await?;
            return Ok(self.config.fast_requeue);
        }

        let Some(status) = assignment.status.as_ref() else {
            let mut pending = assignment.clone();
            pending.status = Some(SwitchAssignmentStatus::default());
            self.store.replace_assignment_status(&pending).await?;
            return Ok(self.config.fast_requeue);
        };

        if let Some(bound) = status.switch_ref.as_ref() {
            let still_valid = match self.store.get_switch(bound).await? {
                Some(switch) => {
                    switch.metadata.deletion_timestamp.is_none()
                        && assignment_matches(
                            assignment,
                            &switch.spec.chassis.chassis_id,
                            &switch.spec.chassis.serial_number,
                        )
                }
                None => false,
            };
            if !still_valid {
                info!("SwitchAssignment {} lost switch {}, back to Pending", key, bound);
                let mut released = assignment.clone();
                released.status = Some(SwitchAssignmentStatus {
                    state: AssignmentState::Pending,
                    switch_ref: None,
                });
                self.store.replace_assignment_status(&released).await?;
                return Ok(self.config.fast_requeue);
            }
        }
        Ok(self.config.requeue_interval)
    }
}
