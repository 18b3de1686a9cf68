//! The per-device state machine.

/// One device's lifecycle state. Transitions are realized by the async
/// driver loop in [`super::orchestrator::run_device`], never mutated
/// directly from outside the device's own task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Configuration rejected or graph validation failed; the device
    /// accepts no operations. Never reachable once `Machine::new` succeeds.
    Invalid,
    /// At rest: not expecting a ball, not ejecting.
    Idle,
    /// An upstream device has committed a ball to us and we are waiting
    /// for our counter to observe it (switch-counted devices).
    WaitingForBall,
    /// Same as `WaitingForBall` but for entrance-counted devices, which
    /// can only observe the beam break, not a settled switch count.
    WaitingForBallMechanical,
    /// An eject has been fired and we are waiting for confirmation.
    Ejecting,
    /// The ball has been confirmed to have physically left (counter
    /// dropped) but the target has not yet confirmed receipt.
    BallLeft,
    /// Confirmation did not arrive within the device's eject_timeout;
    /// deciding whether to retry or declare permanent failure.
    FailedConfirm,
    /// Every eject attempt has been exhausted; the device gives up on
    /// this specific eject request (max_eject_attempts).
    FailedEject,
    /// A ball that left has not reappeared anywhere within
    /// ball_missing_timeout; reported as a loss.
    MissingBalls,
    /// The device's ejector is judged non-functional (repeated permanent
    /// failures) and refuses further eject attempts until reset.
    EjectBroken,
}

impl DeviceState {
    pub fn is_terminal_failure(self) -> bool {
        matches!(self, DeviceState::EjectBroken)
    }
}
