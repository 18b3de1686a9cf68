//! Error types for the ball-device coordination core.
//!
//! Configuration errors are fatal and detected at construction time.
//! Runtime errors cover the narrow set of conditions
//! that are not already modeled as device states or bus events — the
//! steady-state failure modes (transient eject failure, permanent eject
//! failure, ball loss, unexpected ball) are states/events, not `Result::Err`.

use thiserror::Error;

use crate::DeviceName;

/// Fatal configuration errors, detected once at [`crate::Machine::new`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("device {0}: exactly one of eject_coil, hold_coil, mechanical_eject must be set")]
    AmbiguousEjector(DeviceName),

    #[error("device {0}: mechanical_eject requires exactly one ball switch, found {1}")]
    MechanicalEjectSwitchCount(DeviceName, usize),

    #[error("device {0}: exit_count_delay ({1}ms) must be less than every eject_timeout (min {2}ms)")]
    ExitDelayTooLarge(DeviceName, u64, u64),

    #[error("device {0}: entrance_count_delay ({1}ms) must be less than every eject_timeout (min {2}ms)")]
    EntranceDelayTooLarge(DeviceName, u64, u64),

    #[error("device {0}: max eject_timeout ({1}ms) must be less than min ball_missing_timeout ({2}ms)")]
    EjectTimeoutExceedsMissingTimeout(DeviceName, u64, u64),

    #[error("device {0}: max ball_missing_timeout ({1}ms) exceeds 60000ms ceiling")]
    MissingTimeoutTooLarge(DeviceName, u64),

    #[error("device {0}: confirm_eject_type=switch requires confirm_eject_switch")]
    MissingConfirmSwitch(DeviceName),

    #[error("device {0}: tagged drain (not trough) but has no graph path to any trough")]
    NoPathToTrough(DeviceName),

    #[error("device {0}: has no graph path to target_on_unexpected_ball {1}")]
    NoPathToUnexpectedBallTarget(DeviceName, DeviceName),

    #[error("device {0}: unknown eject target {1}")]
    UnknownEjectTarget(DeviceName, DeviceName),

    #[error("device {0}: unknown target_on_unexpected_ball {1}")]
    UnknownUnexpectedBallTarget(DeviceName, DeviceName),

    #[error("device {0}: ball_capacity must be >= 1")]
    ZeroCapacity(DeviceName),

    #[error("duplicate device name {0}")]
    DuplicateDevice(DeviceName),
}

/// Runtime errors that fall outside the modeled retry/loss/unexpected-ball
/// state machine — typically programmer error (looking up a device that
/// doesn't exist) rather than a physical-world condition.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("no device named {0} in registry")]
    UnknownDevice(DeviceName),

    #[error("device {0} is eject_broken and rejects new operations until reset")]
    EjectBroken(DeviceName),

    #[error("no path exists from {0} to {1}")]
    NoPath(DeviceName, DeviceName),
}
