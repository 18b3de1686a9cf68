//! Per-device static configuration and its shape-validation rules.
//!
//! Graph-dependent rules (trough reachability, unexpected-ball-target
//! reachability, unknown target names) need the full device set and live in
//! [`crate::machine::Machine::new`]; everything checkable from a single
//! device's config lives here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::DeviceName;

/// How a completed eject attempt is confirmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmEjectType {
    /// Success when the target's incoming-ball handler sees `ball_enter`.
    Target,
    /// Success on momentary activation of `confirm_eject_switch`.
    Switch,
    /// Success when `confirm_eject_event` is posted on the bus.
    Event,
    /// Success after `eject_timeout + 500ms` unless the ball returns first.
    Playfield,
    /// Success scheduled 1ms later; for sensorless dummy devices.
    Fake,
}

/// Static, validated configuration for one ball device.
///
/// All durations are milliseconds. `eject_targets` is ordered — this order
/// is the tie-break for path search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: DeviceName,
    #[serde(default)]
    pub tags: Vec<String>,

    /// Whether this device is the terminal playfield sink. Playfield
    /// devices have no switches, no ejector, and are never traversed by
    /// the router.
    #[serde(default)]
    pub is_playfield: bool,

    pub ball_capacity: u32,
    #[serde(default)]
    pub ball_switches: Vec<String>,
    pub entrance_count_delay_ms: u64,
    pub exit_count_delay_ms: u64,

    #[serde(default)]
    pub eject_targets: Vec<DeviceName>,
    /// Per-target eject timeout, keyed by entries of `eject_targets`.
    #[serde(default)]
    pub eject_timeouts_ms: HashMap<DeviceName, u64>,
    /// Per-target grace window after a failed confirmation before
    /// declaring the ball lost.
    #[serde(default)]
    pub ball_missing_timeouts_ms: HashMap<DeviceName, u64>,

    #[serde(default)]
    pub max_eject_attempts: u32,

    pub confirm_eject_type: ConfirmEjectType,
    #[serde(default)]
    pub confirm_eject_switch: Option<String>,
    #[serde(default)]
    pub confirm_eject_event: Option<String>,
    #[serde(default)]
    pub jam_switch: Option<String>,

    #[serde(default)]
    pub eject_coil: Option<String>,
    #[serde(default)]
    pub hold_coil: Option<String>,
    #[serde(default)]
    pub mechanical_eject: bool,
    #[serde(default)]
    pub player_controlled_eject_event: Option<String>,

    /// Device (usually the playfield) this device captures unexpected
    /// balls from, for the `balldevice_captured_from_X` event.
    #[serde(default)]
    pub captures_from: Option<DeviceName>,
    /// Where to route a captured-but-unclaimed ball. Defaults to
    /// `captures_from` if unset (`_configure_targets`).
    #[serde(default)]
    pub target_on_unexpected_ball: Option<DeviceName>,
    /// Device that absorbs reports of lost balls.
    #[serde(default)]
    pub ball_missing_target: Option<DeviceName>,

    /// If false, an eject chain set up to route an unexpected ball is
    /// marked player-controlled rather than fired immediately.
    #[serde(default = "default_true")]
    pub auto_fire_on_unexpected_ball: bool,

    /// Position in the machine's global ball-search order.
    #[serde(default)]
    pub ball_search_order: u32,
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    /// A minimal playfield pseudo-device: no switches, no ejector, no
    /// capacity limit worth enforcing. The terminal sink balls are shot into.
    pub fn playfield(name: impl Into<DeviceName>) -> Self {
        Self {
            name: name.into(),
            tags: vec!["playfield".to_string()],
            is_playfield: true,
            ball_capacity: u32::MAX,
            ball_switches: Vec::new(),
            entrance_count_delay_ms: 0,
            exit_count_delay_ms: 0,
            eject_targets: Vec::new(),
            eject_timeouts_ms: HashMap::new(),
            ball_missing_timeouts_ms: HashMap::new(),
            max_eject_attempts: 0,
            confirm_eject_type: ConfirmEjectType::Fake,
            confirm_eject_switch: None,
            confirm_eject_event: None,
            jam_switch: None,
            eject_coil: None,
            hold_coil: None,
            mechanical_eject: false,
            player_controlled_eject_event: None,
            captures_from: None,
            target_on_unexpected_ball: None,
            ball_missing_target: None,
            auto_fire_on_unexpected_ball: true,
            ball_search_order: 0,
        }
    }

    pub fn is_drain(&self) -> bool {
        self.tags.iter().any(|t| t == "drain")
    }

    pub fn is_trough(&self) -> bool {
        self.tags.iter().any(|t| t == "trough")
    }

    fn min_eject_timeout(&self) -> Option<u64> {
        self.eject_timeouts_ms.values().copied().min()
    }

    fn max_eject_timeout(&self) -> Option<u64> {
        self.eject_timeouts_ms.values().copied().max()
    }

    fn min_missing_timeout(&self) -> Option<u64> {
        self.ball_missing_timeouts_ms.values().copied().min()
    }

    fn max_missing_timeout(&self) -> Option<u64> {
        self.ball_missing_timeouts_ms.values().copied().max()
    }

    /// Config-shape validation rules that do not require knowledge of
    /// other devices. Graph-reachability rules are checked
    /// separately once the full registry exists.
    pub fn validate_self(&self) -> Result<(), ConfigError> {
        if self.is_playfield {
            return Ok(());
        }

        if self.ball_capacity == 0 {
            return Err(ConfigError::ZeroCapacity(self.name.clone()));
        }

        let ejector_count = [
            self.eject_coil.is_some(),
            self.hold_coil.is_some(),
            self.mechanical_eject,
        ]
        .into_iter()
        .filter(|b| *b)
        .count();
        if ejector_count != 1 {
            return Err(ConfigError::AmbiguousEjector(self.name.clone()));
        }

        if self.mechanical_eject && self.ball_switches.len() != 1 {
            return Err(ConfigError::MechanicalEjectSwitchCount(
                self.name.clone(),
                self.ball_switches.len(),
            ));
        }

        if let Some(min_eject) = self.min_eject_timeout() {
            if self.exit_count_delay_ms >= min_eject {
                return Err(ConfigError::ExitDelayTooLarge(
                    self.name.clone(),
                    self.exit_count_delay_ms,
                    min_eject,
                ));
            }
            if self.entrance_count_delay_ms >= min_eject {
                return Err(ConfigError::EntranceDelayTooLarge(
                    self.name.clone(),
                    self.entrance_count_delay_ms,
                    min_eject,
                ));
            }
        }

        if let (Some(max_eject), Some(min_missing)) =
            (self.max_eject_timeout(), self.min_missing_timeout())
        {
            if max_eject >= min_missing {
                return Err(ConfigError::EjectTimeoutExceedsMissingTimeout(
                    self.name.clone(),
                    max_eject,
                    min_missing,
                ));
            }
        }

        if let Some(max_missing) = self.max_missing_timeout() {
            if max_missing > 60_000 {
                return Err(ConfigError::MissingTimeoutTooLarge(
                    self.name.clone(),
                    max_missing,
                ));
            }
        }

        if self.confirm_eject_type == ConfirmEjectType::Switch
            && self.confirm_eject_switch.is_none()
        {
            return Err(ConfigError::MissingConfirmSwitch(self.name.clone()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config(name: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            tags: vec![],
            is_playfield: false,
            ball_capacity: 2,
            ball_switches: vec!["s1".into(), "s2".into()],
            entrance_count_delay_ms: 100,
            exit_count_delay_ms: 100,
            eject_targets: vec!["plunger".into()],
            eject_timeouts_ms: [("plunger".to_string(), 3000)].into_iter().collect(),
            ball_missing_timeouts_ms: [("plunger".to_string(), 20_000)].into_iter().collect(),
            max_eject_attempts: 3,
            confirm_eject_type: ConfirmEjectType::Target,
            confirm_eject_switch: None,
            confirm_eject_event: None,
            jam_switch: None,
            eject_coil: Some("trough_eject".into()),
            hold_coil: None,
            mechanical_eject: false,
            player_controlled_eject_event: None,
            captures_from: None,
            target_on_unexpected_ball: None,
            ball_missing_target: None,
            auto_fire_on_unexpected_ball: true,
            ball_search_order: 0,
        }
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config("trough").validate_self().is_ok());
    }

    #[test]
    fn requires_exactly_one_ejector() {
        let mut cfg = base_config("trough");
        cfg.hold_coil = Some("extra".into());
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::AmbiguousEjector("trough".into()))
        );

        let mut cfg = base_config("trough");
        cfg.eject_coil = None;
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::AmbiguousEjector("trough".into()))
        );
    }

    #[test]
    fn mechanical_eject_requires_single_switch() {
        let mut cfg = base_config("plunger");
        cfg.eject_coil = None;
        cfg.mechanical_eject = true;
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::MechanicalEjectSwitchCount("plunger".into(), 2))
        );

        cfg.ball_switches = vec!["s1".into()];
        assert!(cfg.validate_self().is_ok());
    }

    #[test]
    fn exit_delay_must_be_below_eject_timeout() {
        let mut cfg = base_config("trough");
        cfg.exit_count_delay_ms = 3000;
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::ExitDelayTooLarge("trough".into(), 3000, 3000))
        );
    }

    #[test]
    fn eject_timeout_must_be_below_missing_timeout() {
        let mut cfg = base_config("trough");
        cfg.eject_timeouts_ms.insert("plunger".into(), 25_000);
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::EjectTimeoutExceedsMissingTimeout(
                "trough".into(),
                25_000,
                20_000
            ))
        );
    }

    #[test]
    fn missing_timeout_ceiling() {
        let mut cfg = base_config("trough");
        cfg.eject_timeouts_ms.insert("plunger".into(), 61_000 - 1);
        cfg.ball_missing_timeouts_ms.insert("plunger".into(), 61_000);
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::MissingTimeoutTooLarge("trough".into(), 61_000))
        );
    }

    #[test]
    fn switch_confirm_requires_switch_name() {
        let mut cfg = base_config("trough");
        cfg.confirm_eject_type = ConfirmEjectType::Switch;
        assert_eq!(
            cfg.validate_self(),
            Err(ConfigError::MissingConfirmSwitch("trough".into()))
        );
        cfg.confirm_eject_switch = Some("jam".into());
        assert!(cfg.validate_self().is_ok());
    }

    #[test]
    fn playfield_skips_validation() {
        let pf = DeviceConfig::playfield("playfield");
        assert!(pf.validate_self().is_ok());
    }
}
