//! Hardware interfaces: switch matrix, coil drivers.
//!
//! The crate programs against these traits only. `hw::sim` is the one
//! implementation that ships with the crate — a simulated board used by
//! tests and the `sim` binary, never a second production backend.

use std::future::Future;
use std::pin::Pin;

/// Reads switch state and notifies on edges. A "switch" here is any
/// position sensor: a ball-trough opto, an entrance beam, a jam switch.
pub trait SwitchController: Send + Sync {
    fn is_active(&self, switch: &str) -> bool;

    /// Resolves the next time `switch` changes active/inactive state.
    /// Returns the new state.
    fn wait_for_change<'a>(
        &'a self,
        switch: &'a str,
    ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>>;
}

/// Drives eject hardware: pulsed coils (trough kickers, VUK eject) and held
/// coils (gate/diverter style holds).
pub trait CoilController: Send + Sync {
    fn pulse(&self, coil: &str);
    fn enable(&self, coil: &str);
    fn disable(&self, coil: &str);
}

pub mod sim {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use tokio::sync::broadcast;

    /// In-memory switch matrix. Tests flip switches with [`SimSwitches::set`];
    /// device code observes them through [`SwitchController`].
    pub struct SimSwitches {
        state: Mutex<HashMap<String, bool>>,
        changes_tx: broadcast::Sender<(String, bool)>,
    }

    impl Default for SimSwitches {
        fn default() -> Self {
            Self::new()
        }
    }

    impl SimSwitches {
        pub fn new() -> Self {
            let (changes_tx, _) = broadcast::channel(256);
            Self {
                state: Mutex::new(HashMap::new()),
                changes_tx,
            }
        }

        /// Flip a switch's active state, as if a ball rolled over it.
        pub fn set(&self, switch: &str, active: bool) {
            self.state.lock().unwrap().insert(switch.to_string(), active);
            let _ = self.changes_tx.send((switch.to_string(), active));
        }
    }

    impl SwitchController for SimSwitches {
        fn is_active(&self, switch: &str) -> bool {
            *self.state.lock().unwrap().get(switch).unwrap_or(&false)
        }

        fn wait_for_change<'a>(
            &'a self,
            switch: &'a str,
        ) -> Pin<Box<dyn Future<Output = bool> + Send + 'a>> {
            Box::pin(async move {
                let mut rx = self.changes_tx.subscribe();
                loop {
                    match rx.recv().await {
                        Ok((name, active)) if name == switch => return active,
                        Ok(_) => continue,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => {
                            std::future::pending::<()>().await;
                            unreachable!()
                        }
                    }
                }
            })
        }
    }

    /// In-memory coil driver. Records pulses/enables/disables for tests to
    /// assert against.
    #[derive(Default)]
    pub struct SimCoils {
        log: Mutex<Vec<CoilAction>>,
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CoilAction {
        Pulse(String),
        Enable(String),
        Disable(String),
    }

    impl SimCoils {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn actions(&self) -> Vec<CoilAction> {
            self.log.lock().unwrap().clone()
        }

        pub fn pulse_count(&self, coil: &str) -> usize {
            self.log
                .lock()
                .unwrap()
                .iter()
                .filter(|a| matches!(a, CoilAction::Pulse(c) if c == coil))
                .count()
        }
    }

    impl CoilController for SimCoils {
        fn pulse(&self, coil: &str) {
            self.log.lock().unwrap().push(CoilAction::Pulse(coil.to_string()));
        }

        fn enable(&self, coil: &str) {
            self.log.lock().unwrap().push(CoilAction::Enable(coil.to_string()));
        }

        fn disable(&self, coil: &str) {
            self.log.lock().unwrap().push(CoilAction::Disable(coil.to_string()));
        }
    }

}
