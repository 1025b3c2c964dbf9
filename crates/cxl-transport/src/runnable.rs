//! Lifecycle contract shared by every long-lived component.
//!
//! A component moves `New → Starting → Running → Stopping → Stopped` and
//! exposes `run`, `stop`, and `wait_for_ready` built on this state machine.
//! Parents start children concurrently, await their readiness signals, then
//! declare themselves running. Stopping is idempotent.

use tokio::sync::watch;

use crate::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    New,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Watchable component state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct Lifecycle {
    tx: watch::Sender<ComponentState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(ComponentState::New);
        Lifecycle { tx }
    }

    pub fn state(&self) -> ComponentState {
        *self.tx.borrow()
    }

    /// Claims the component for `run()`. Fails unless the component is fresh
    /// or fully stopped.
    pub fn begin_start(&self) -> Result<(), TransportError> {
        let mut ok = false;
        self.tx.send_modify(|state| {
            if matches!(*state, ComponentState::New | ComponentState::Stopped) {
                *state = ComponentState::Starting;
                ok = true;
            }
        });
        if ok {
            Ok(())
        } else {
            Err(TransportError::NotStartable(self.state()))
        }
    }

    /// Claims the component for `stop()`. Returns false when there is
    /// nothing to stop (already stopping, stopped, or never started).
    pub fn begin_stop(&self) -> bool {
        let mut ok = false;
        self.tx.send_modify(|state| {
            if matches!(*state, ComponentState::Starting | ComponentState::Running) {
                *state = ComponentState::Stopping;
                ok = true;
            }
        });
        ok
    }

    pub fn set_running(&self) {
        self.tx.send_modify(|state| {
            if *state == ComponentState::Starting {
                *state = ComponentState::Running;
            }
        });
    }

    pub fn set_stopped(&self) {
        let _ = self.tx.send(ComponentState::Stopped);
    }

    pub fn is_stopping(&self) -> bool {
        matches!(
            self.state(),
            ComponentState::Stopping | ComponentState::Stopped
        )
    }

    pub async fn wait_for(&self, target: ComponentState) {
        let mut rx = self.tx.subscribe();
        // A stopped component satisfies every wait; otherwise waiters on a
        // component that dies early would hang.
        let _ = rx
            .wait_for(|state| *state == target || *state == ComponentState::Stopped)
            .await;
    }

    /// Resolves once the component begins stopping (or is stopped).
    pub async fn stopping(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx
            .wait_for(|state| {
                matches!(*state, ComponentState::Stopping | ComponentState::Stopped)
            })
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_claims_once() {
        let lc = Lifecycle::new();
        assert!(lc.begin_start().is_ok());
        assert!(lc.begin_start().is_err());
        lc.set_running();
        assert_eq!(lc.state(), ComponentState::Running);
        assert!(lc.begin_stop());
        assert!(!lc.begin_stop());
        lc.set_stopped();
        // A stopped component may run again.
        assert!(lc.begin_start().is_ok());
    }

    #[tokio::test]
    async fn wait_for_running_unblocks_on_stop() {
        let lc = Lifecycle::new();
        let waiter = {
            let lc = lc.clone();
            tokio::spawn(async move { lc.wait_for(ComponentState::Running).await })
        };
        lc.set_stopped();
        waiter.await.unwrap();
    }
}
