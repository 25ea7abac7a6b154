//! Object references between fabric resources
//!
//! References here are weak: they name an object by `namespace/name` and are
//! re-resolved on every pass instead of being trusted as permanent links.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a namespaced object by name
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectKeyRef {
    /// Name of the referenced object
    pub name: String,

    /// Namespace of the referenced object
    pub namespace: String,
}

impl ObjectKeyRef {
    /// Create a reference from a name and namespace
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl fmt::Display for ObjectKeyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// A neighbouring switch as seen from an adjacency record.
///
/// The chassis ID is always known (it comes from LLDP); the object name and
/// namespace are filled in once a `Switch` with that chassis ID is found.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[serde(rename_all = "camelCase")]
pub struct PeerSwitchRef {
    /// Canonical colon-hex chassis ID of the neighbour
    pub chassis_id: String,

    /// Name of the neighbour's `Switch` object, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace of the neighbour's `Switch` object, once resolved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl PeerSwitchRef {
    /// An unresolved neighbour known only by chassis ID
    pub fn unresolved(chassis_id: impl Into<String>) -> Self {
        Self {
            chassis_id: chassis_id.into(),
            name: None,
            namespace: None,
        }
    }

    /// A neighbour resolved to a `Switch` object
    pub fn resolved(chassis_id: impl Into<String>, key: &ObjectKeyRef) -> Self {
        Self {
            chassis_id: chassis_id.into(),
            name: Some(key.name.clone()),
            namespace: Some(key.namespace.clone()),
        }
    }

    /// The referenced object, if resolved
    #[must_use]
    pub fn object_key(&self) -> Option<ObjectKeyRef> {
        match (&self.name, &self.namespace) {
            (Some(name), Some(namespace)) => Some(ObjectKeyRef::new(name.clone(), namespace.clone())),
            _ => None,
        }
    }
}
