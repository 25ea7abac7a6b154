//! Preparation and creation phases.

use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::Reconciler;
use crds::{chassis_label_value, SwitchState, SwitchStatus, CHASSIS_ID_LABEL, SWITCH_FINALIZER};
use tracing::{debug, info};

impl Reconciler {
    /// Ensure the finalizer and the chassis correlation label.
    pub(super) fn prepare(&self, pass: &mut Pass) -> Step {
        let mut changed = false;

        let finalizers = pass.switch.metadata.finalizers.get_or_insert_with(Vec::new);
        if !finalizers.iter().any(|f| f == SWITCH_FINALIZER) {
            finalizers.push(SWITCH_FINALIZER.to_string());
            info!("Adding finalizer to switch {}", pass.key);
            changed = true;
        }

        match chassis_label_value(&pass.switch.spec.chassis.chassis_id) {
            Some(label) => {
                let labels = pass.switch.metadata.labels.get_or_insert_with(Default::default);
                if labels.get(CHASSIS_ID_LABEL) != Some(&label) {
                    debug!("Labelling switch {} with chassis {}", pass.key, label);
                    labels.insert(CHASSIS_ID_LABEL.to_string(), label);
                    changed = true;
                }
            }
            None => debug!(
                "Switch {} chassis ID '{}' cannot be used as a label",
                pass.key, pass.switch.spec.chassis.chassis_id
            ),
        }

        if changed { Step::Stop(Persist::Object) } else { Step::Continue }
    }

    /// Give a new switch its initial status.
    pub(super) fn initialize_status(&self, pass: &mut Pass) -> Step {
        if pass.switch.status.is_some() {
            return Step::Continue;
        }
        pass.switch.status = Some(SwitchStatus {
            state: SwitchState::Discovery,
            ..Default::default()
        });
        Step::Stop(Persist::Status)
    }
}
