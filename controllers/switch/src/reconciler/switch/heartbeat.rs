//! Heartbeat phase: readiness as reported by the configuration agent.

use crate::reconciler::chain::{Pass, Persist, Step};
use crate::reconciler::Reconciler;
use crds::SwitchState;
use tracing::{info, warn};

impl Reconciler {
    /// Move the switch between Configuring, Ready and Failed.
    ///
    /// Only reached once every earlier phase has nothing left to do, so the
    /// switch is fully addressed here.
    pub(super) fn check_heartbeat(&self, pass: &mut Pass) -> Step {
        let before = pass.status();
        let key = pass.key.clone();
        let now = pass.now;
        let timeout = chrono::Duration::from_std(self.config.config_agent_timeout)
            .unwrap_or(chrono::Duration::MAX);

        let status = pass.status_mut();
        let managed = status.config_agent.as_ref().is_some_and(|a| a.managed);
        if !managed {
            status.state = SwitchState::Ready;
            status.configuring_since = None;
        } else {
            if !matches!(
                status.state,
                SwitchState::Configuring | SwitchState::Ready | SwitchState::Failed
            ) {
                status.state = SwitchState::Configuring;
                status.configuring_since = Some(now);
            }

            let last_check = status.config_agent.as_ref().and_then(|a| a.last_check);
            let fresh = last_check.is_some_and(|at| now.signed_duration_since(at) <= timeout);
            if fresh {
                status.state = SwitchState::Ready;
                status.configuring_since = None;
                if let Some(agent) = status.config_agent.as_mut() {
                    agent.failed = false;
                }
            } else if status.state != SwitchState::Failed {
                let since = last_check.or(status.configuring_since).unwrap_or(now);
                if now.signed_duration_since(since) > timeout {
                    warn!(
                        "Configuration agent of switch {} silent since {}, marking failed",
                        key, since
                    );
                    status.state = SwitchState::Failed;
                    if let Some(agent) = status.config_agent.as_mut() {
                        agent.failed = true;
                    }
                }
            }
        }

        if pass.status() == before {
            return Step::Continue;
        }
        if pass.status().state != before.state {
            info!("Switch {} {} -> {}", pass.key, before.state, pass.status().state);
        }
        Step::Stop(Persist::Status)
    }
}
