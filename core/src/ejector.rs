//! Ball-ejection mechanisms.
//!
//! Exactly one of these backs any non-playfield, non-mechanical-eject
//! device, picked by `DeviceConfig::validate_self`'s ejector-family check.

use std::sync::Arc;

use crate::hw::CoilController;

/// Which pass of a ball search is running. Mild passes avoid disturbing a
/// ball that might still be settling; aggressive passes actively jiggle
/// stuck hardware once a mild pass hasn't turned anything up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BallSearchPhase {
    Mild,
    Aggressive,
}

/// Fires one ball toward the device's currently targeted destination.
/// `eject_one_ball()` itself never blocks — confirmation is a separate
/// concern, handled by the orchestrator's `ejecting` state. `hold`/
/// `release`/`ball_search` are no-ops by default; only hold-coil devices
/// and search-capable hardware need to override them.
pub trait Ejector: Send + Sync {
    fn eject_one_ball(&self);

    /// Re-engage a capture coil once the device is ready for its next ball.
    fn hold(&self) {}

    /// Release whatever a held coil is currently capturing.
    fn release(&self) {}

    /// Try to dislodge a ball this device believes it's holding but whose
    /// switches disagree. `phase` escalates from `Mild` to `Aggressive`
    /// across repeated rounds.
    fn ball_search(&self, phase: BallSearchPhase) {
        let _ = phase;
    }
}

/// A single momentary coil pulse per ball (most trough/VUK ejectors).
pub struct PulseCoilEjector {
    coil: String,
    coil_ctrl: Arc<dyn CoilController>,
}

impl PulseCoilEjector {
    pub fn new(coil: String, coil_ctrl: Arc<dyn CoilController>) -> Self {
        Self { coil, coil_ctrl }
    }
}

impl Ejector for PulseCoilEjector {
    fn eject_one_ball(&self) {
        self.coil_ctrl.pulse(&self.coil);
    }

    fn ball_search(&self, _phase: BallSearchPhase) {
        // No finer-grained distinction for a single kicker coil: any
        // search round is just another pulse.
        self.coil_ctrl.pulse(&self.coil);
    }
}

/// A held coil keeps a ball captured against spring tension or a gate;
/// disabling it releases the ball. `hold()` re-engages the coil once the
/// device is ready to capture its next ball.
pub struct HoldCoilEjector {
    coil: String,
    coil_ctrl: Arc<dyn CoilController>,
}

impl HoldCoilEjector {
    pub fn new(coil: String, coil_ctrl: Arc<dyn CoilController>) -> Self {
        Self { coil, coil_ctrl }
    }
}

impl Ejector for HoldCoilEjector {
    fn eject_one_ball(&self) {
        self.coil_ctrl.disable(&self.coil);
    }

    fn hold(&self) {
        self.coil_ctrl.enable(&self.coil);
    }

    fn release(&self) {
        self.coil_ctrl.disable(&self.coil);
    }

    fn ball_search(&self, phase: BallSearchPhase) {
        match phase {
            // Don't disturb a ball that might just be settling.
            BallSearchPhase::Mild => {}
            // Jiggle it loose by cycling the coil.
            BallSearchPhase::Aggressive => {
                self.coil_ctrl.disable(&self.coil);
                self.coil_ctrl.enable(&self.coil);
            }
        }
    }
}

/// No coil at all: the ball leaves only when a player acts on it (a
/// plunger lane) or gravity takes over, and the device learns the ball
/// left only by observing its switch/beam clear. `eject_one_ball()` is a
/// no-op; the orchestrator still runs the same confirmation wait as any
/// other ejector.
pub struct MechanicalEjector;

impl Ejector for MechanicalEjector {
    fn eject_one_ball(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::{CoilAction, SimCoils};

    #[test]
    fn pulse_ejector_pulses_its_coil() {
        let coils = Arc::new(SimCoils::new());
        let ejector = PulseCoilEjector::new("trough_eject".into(), coils.clone());
        ejector.eject_one_ball();
        assert_eq!(coils.actions(), vec![CoilAction::Pulse("trough_eject".into())]);
    }

    #[test]
    fn pulse_ejector_search_pulses_regardless_of_phase() {
        let coils = Arc::new(SimCoils::new());
        let ejector = PulseCoilEjector::new("trough_eject".into(), coils.clone());
        ejector.ball_search(BallSearchPhase::Mild);
        ejector.ball_search(BallSearchPhase::Aggressive);
        assert_eq!(coils.pulse_count("trough_eject"), 2);
    }

    #[test]
    fn hold_ejector_disables_then_can_rehold() {
        let coils = Arc::new(SimCoils::new());
        let ejector = HoldCoilEjector::new("lock_hold".into(), coils.clone());
        ejector.eject_one_ball();
        ejector.hold();
        assert_eq!(
            coils.actions(),
            vec![
                CoilAction::Disable("lock_hold".into()),
                CoilAction::Enable("lock_hold".into()),
            ]
        );
    }

    #[test]
    fn hold_ejector_mild_search_leaves_coil_untouched() {
        let coils = Arc::new(SimCoils::new());
        let ejector = HoldCoilEjector::new("lock_hold".into(), coils.clone());
        ejector.ball_search(BallSearchPhase::Mild);
        assert!(coils.actions().is_empty());
    }

    #[test]
    fn hold_ejector_aggressive_search_cycles_coil() {
        let coils = Arc::new(SimCoils::new());
        let ejector = HoldCoilEjector::new("lock_hold".into(), coils.clone());
        ejector.ball_search(BallSearchPhase::Aggressive);
        assert_eq!(
            coils.actions(),
            vec![
                CoilAction::Disable("lock_hold".into()),
                CoilAction::Enable("lock_hold".into()),
            ]
        );
    }

    #[test]
    fn mechanical_ejector_touches_no_hardware() {
        let ejector = MechanicalEjector;
        ejector.eject_one_ball();
        ejector.ball_search(BallSearchPhase::Aggressive);
    }
}
