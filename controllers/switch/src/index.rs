//! Chassis ID index over the switches of a namespace.
//!
//! Rebuilt from a fresh listing whenever a pass needs it; nothing here is
//! cached across passes, so a deleted or relabelled switch disappears from
//! lookups on the next pass.

use crds::{canonical_chassis_id, chassis_label_value, ObjectKeyRef, Switch, SwitchRole, CHASSIS_ID_LABEL};
use kube::ResourceExt;
use std::collections::HashMap;
use tracing::debug;

/// What a pass needs to know about a neighbouring switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSwitch {
    pub key: ObjectKeyRef,
    pub connection_level: u8,
    pub role: SwitchRole,
}

/// Lookup of switches by canonical chassis ID
#[derive(Debug, Default, Clone)]
pub struct ChassisIndex {
    by_chassis: HashMap<String, IndexedSwitch>,
}

impl ChassisIndex {
    /// Build the index from a switch listing.
    ///
    /// Switches being deleted are left out. When two switches claim the same
    /// chassis ID the first one by name wins.
    pub fn build<'a>(switches: impl IntoIterator<Item = &'a Switch>) -> Self {
        let mut live: Vec<&Switch> = switches
            .into_iter()
            .filter(|sw| sw.metadata.deletion_timestamp.is_none())
            .collect();
        live.sort_by(|a, b| a.name_any().cmp(&b.name_any()));

        let mut by_chassis = HashMap::new();
        for switch in live {
            let chassis = canonical_chassis_id(&switch.spec.chassis.chassis_id);
            let expected_label = chassis_label_value(&switch.spec.chassis.chassis_id);
            if expected_label.is_some() && switch.labels().get(CHASSIS_ID_LABEL) != expected_label.as_ref() {
                debug!("Switch {} chassis label is stale, indexing by spec", switch.name_any());
            }
            by_chassis.entry(chassis).or_insert_with(|| IndexedSwitch {
                key: ObjectKeyRef::new(
                    switch.name_any(),
                    switch.namespace().unwrap_or_else(|| "default".to_string()),
                ),
                connection_level: switch.spec.connection_level,
                role: switch.spec.role,
            });
        }
        Self { by_chassis }
    }

    /// Look up a switch by (any form of) chassis ID
    #[must_use]
    pub fn get(&self, chassis_id: &str) -> Option<&IndexedSwitch> {
        self.by_chassis.get(&canonical_chassis_id(chassis_id))
    }
}
