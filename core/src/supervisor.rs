//! Machine-wide ball count supervisor: reconciles the sum of every
//! device's observed count against the machine's known total ball count,
//! and classifies any delta as an expected arrival, an unexpected arrival,
//! or a loss.

use std::collections::HashMap;

use tracing::{info, warn};

use crate::registry::Registry;
use crate::DeviceName;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    Balanced,
    /// Balls are accounted for by an in-flight eject chain's commitments.
    ExpectedArrival { delta: u32 },
    /// More balls observed machine-wide than the known total accounts for.
    UnexpectedArrival { delta: u32 },
    /// Fewer balls observed machine-wide than the known total; some balls
    /// are unaccounted for.
    Loss { delta: u32 },
}

/// Snapshot-based reconciler: takes per-device observed counts plus the
/// machine's configured ball count and classifies the difference. Carries
/// no state of its own between calls — the caller (the `Machine`) decides
/// what to do with the result.
pub struct BallCountSupervisor {
    pub total_balls: u32,
}

impl BallCountSupervisor {
    pub fn new(total_balls: u32) -> Self {
        Self { total_balls }
    }

    pub fn reconcile(&self, observed: &HashMap<DeviceName, u32>) -> Reconciliation {
        let sum: u32 = observed.values().sum();
        match sum.cmp(&self.total_balls) {
            std::cmp::Ordering::Equal => {
                info!(total = self.total_balls, "ball count balanced");
                Reconciliation::Balanced
            }
            std::cmp::Ordering::Greater => {
                let delta = sum - self.total_balls;
                warn!(delta, "more balls observed than configured total");
                Reconciliation::UnexpectedArrival { delta }
            }
            std::cmp::Ordering::Less => {
                let delta = self.total_balls - sum;
                warn!(delta, "fewer balls observed than configured total");
                Reconciliation::Loss { delta }
            }
        }
    }
}

/// Gathers every live device's physically observed ball count and
/// reconciles it against the machine's supervisor. Called from the
/// incoming/loss paths rather than only from this module's own tests.
/// Uses the hardware-observed count, not `available_balls` — the latter
/// includes virtual reservations for balls that haven't physically moved
/// yet, which would double-count against the device still holding them.
pub fn reconcile_now(registry: &Registry) -> Reconciliation {
    let observed: HashMap<DeviceName, u32> = registry
        .names()
        .filter_map(|name| registry.get(name).map(|handle| (name.clone(), handle.device.counter.count())))
        .collect();
    registry.supervisor().reconcile(&observed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn balanced_when_sum_matches_total() {
        let supervisor = BallCountSupervisor::new(3);
        let observed = HashMap::from([("trough".to_string(), 2), ("lock".to_string(), 1)]);
        assert_eq!(supervisor.reconcile(&observed), Reconciliation::Balanced);
    }

    #[test]
    fn detects_loss() {
        let supervisor = BallCountSupervisor::new(3);
        let observed = HashMap::from([("trough".to_string(), 2)]);
        assert_eq!(
            supervisor.reconcile(&observed),
            Reconciliation::Loss { delta: 1 }
        );
    }

    #[test]
    fn detects_unexpected_arrival() {
        let supervisor = BallCountSupervisor::new(3);
        let observed = HashMap::from([("trough".to_string(), 4)]);
        assert_eq!(
            supervisor.reconcile(&observed),
            Reconciliation::UnexpectedArrival { delta: 1 }
        );
    }
}
