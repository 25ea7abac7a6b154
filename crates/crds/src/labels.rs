//! Labels, finalizers and chassis identifier helpers
//!
//! Cross-object correlation in the fabric is label based: switches and
//! assignments are matched through the `chassisId` label, and IPAM objects are
//! tied back to the switch that requested them through the owner label.

use std::fmt;
use thiserror::Error;

/// API group shared by every fabric resource.
pub const API_GROUP: &str = "dcops.microscaler.io";

/// Correlation label carrying the hyphenated chassis MAC.
pub const CHASSIS_ID_LABEL: &str = "chassisId";

/// Correlation label carrying the switch serial number.
pub const SERIAL_LABEL: &str = "serial";

/// Ownership label placed on IPAM `Subnet` and `Ip` objects (value: switch name).
pub const OWNER_LABEL: &str = "dcops.microscaler.io/owner";

/// Address family label on IPAM objects (`ipv4` or `ipv6`).
pub const ADDRESS_FAMILY_LABEL: &str = "dcops.microscaler.io/address-family";

/// Switch port name label on IPAM `Ip` objects.
pub const INTERFACE_LABEL: &str = "dcops.microscaler.io/interface";

/// Finalizer guarding release of IPAM objects and the adjacency record.
pub const SWITCH_FINALIZER: &str = "dcops.microscaler.io/switch";

/// Errors raised while parsing chassis identifiers
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChassisIdError {
    /// The identifier does not have six octets
    #[error("chassis ID '{0}' must have 6 octets")]
    OctetCount(String),

    /// One of the octets is not a two-digit hex number
    #[error("chassis ID '{0}' contains an invalid octet")]
    InvalidOctet(String),
}

/// A MAC-derived chassis identifier.
///
/// Accepts colon or hyphen separated input in any case. The canonical form
/// (`Display`) is lower-case colon-hex, the label form is lower-case hyphenated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChassisId([u8; 6]);

impl ChassisId {
    /// Parse a chassis identifier such as `68:21:5F:47:0D:6E` or `68-21-5f-47-0d-6e`.
    pub fn parse(raw: &str) -> Result<Self, ChassisIdError> {
        let trimmed = raw.trim();
        let parts: Vec<&str> = trimmed.split([':', '-']).collect();
        if parts.len() != 6 {
            return Err(ChassisIdError::OctetCount(raw.to_string()));
        }

        let mut octets = [0u8; 6];
        for (slot, part) in octets.iter_mut().zip(parts) {
            if part.len() != 2 || !part.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(ChassisIdError::InvalidOctet(raw.to_string()));
            }
            *slot = u8::from_str_radix(part, 16)
                .map_err(|_| ChassisIdError::InvalidOctet(raw.to_string()))?;
        }
        Ok(Self(octets))
    }

    /// Label-safe form: colons replaced by hyphens, lower-case.
    #[must_use]
    pub fn label_value(&self) -> String {
        self.to_string().replace(':', "-")
    }
}

impl fmt::Display for ChassisId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Canonical colon form of a chassis ID, or the trimmed lower-cased input when
/// it does not parse (LLDP peers may advertise non-MAC chassis IDs).
#[must_use]
pub fn canonical_chassis_id(raw: &str) -> String {
    ChassisId::parse(raw)
        .map_or_else(|_| raw.trim().to_lowercase(), |id| id.to_string())
}

/// Label value for a raw chassis ID, `None` when it cannot be expressed as a label.
#[must_use]
pub fn chassis_label_value(raw: &str) -> Option<String> {
    ChassisId::parse(raw).ok().map(|id| id.label_value())
}
