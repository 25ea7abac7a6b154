//! Reconciliation of `Switch` resources.
//!
//! One pass runs the phase chain from `chain` against a working copy of the
//! switch, writes back at most once, and decides the requeue delay from the
//! convergence fingerprint.

mod addresses;
mod connections;
mod deletion;
mod discovery;
mod heartbeat;
mod preparation;
mod subnets;

use super::chain::{Pass, Persist, Phase, Step};
use super::convergence::{Convergence, Fingerprint};
use super::{PassOutcome, Reconciler};
use crate::error::ControllerError;
use crate::store::object_key;
use chrono::{DateTime, Utc};
use crds::Switch;
use tracing::{debug, info};

impl Reconciler {
    /// Run one pass over a switch.
    ///
    /// `now` is the pass clock used for heartbeat checks.
    pub async fn reconcile_switch(
        &self,
        switch: &Switch,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome, ControllerError> {
        let key = object_key(switch)?;
        let before = Fingerprint::of(switch)?;
        let mut pass = Pass::new(key, switch.clone(), now);

        let mut phase = Phase::first(switch);
        let persisted = loop {
            debug!("Switch {} phase {}", pass.key, phase);
            match self.run_phase(phase, &mut pass).await? {
                Step::Continue => match phase.next() {
                    Some(next) => phase = next,
                    None => break Persist::Nothing,
                },
                Step::Stop(persist) => break persist,
            }
        };

        match persisted {
            Persist::Nothing => {}
            Persist::Object => {
                self.store.replace_switch(&pass.switch).await?;
            }
            Persist::Status => {
                self.store.replace_switch_status(&pass.switch).await?;
            }
        }

        let after = Fingerprint::of(&pass.switch)?;
        let convergence = Convergence::decide(before, after, pass.wrote_other_objects);
        if convergence == Convergence::Converging {
            info!(
                "Switch {} progressed in phase {} (persisted {:?})",
                pass.key, phase, persisted
            );
        }

        Ok(PassOutcome {
            phase,
            persisted,
            changed: convergence == Convergence::Converging,
            requeue_after: convergence.requeue_after(&self.config),
        })
    }

    async fn run_phase(&self, phase: Phase, pass: &mut Pass) -> Result<Step, ControllerError> {
        match phase {
            Phase::Preparation => Ok(self.prepare(pass)),
            Phase::Creation => Ok(self.initialize_status(pass)),
            Phase::Peers => self.discover_peers(pass).await,
            Phase::Assignment => self.bind_assignment(pass).await,
            Phase::Connections => self.resolve_connections(pass).await,
            Phase::Subnets => self.ensure_south_subnets(pass).await,
            Phase::Addresses => self.assign_addresses(pass).await,
            Phase::Heartbeat => Ok(self.check_heartbeat(pass)),
            Phase::Deletion => self.release(pass).await,
        }
    }
}
