//! Prints every CRD manifest of the switch fabric as multi-document YAML.
//!
//! ```text
//! cargo run -p crds --bin crdgen > deploy/crds.yaml
//! ```

use anyhow::Result;
use crds::{Ip, Subnet, Switch, SwitchAssignment, SwitchConnection};
use kube::CustomResourceExt;

fn main() -> Result<()> {
    let crds = [
        Switch::crd(),
        SwitchConnection::crd(),
        SwitchAssignment::crd(),
        Subnet::crd(),
        Ip::crd(),
    ];

    for crd in crds {
        print!("---\n{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
