//! DCops Switch Fabric CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the switch fabric controller,
//! plus the IPAM request types it exchanges with the IPAM subsystem.

pub mod labels;
pub mod references;
pub mod switch;
pub mod switch_connection;
pub mod switch_assignment;
pub mod ipam;

pub use labels::*;
pub use references::*;
pub use switch::*;
pub use switch_connection::*;
pub use switch_assignment::*;
pub use ipam::*;
