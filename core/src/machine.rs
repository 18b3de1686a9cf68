//! Builds devices from configuration, validates the whole graph, and owns
//! the running set of device driver tasks.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::bus::{BallEnterRelay, EventBus};
use crate::config::DeviceConfig;
use crate::counter::{Counter, EntranceSwitchCounter, SwitchCounter};
use crate::device::orchestrator::run_device;
use crate::device::{Command, Device, DeviceHandle};
use crate::ejector::{Ejector, HoldCoilEjector, MechanicalEjector, PulseCoilEjector};
use crate::error::ConfigError;
use crate::graph::Router;
use crate::hw::{CoilController, SwitchController};
use crate::registry::Registry;
use crate::supervisor::BallCountSupervisor;
use crate::DeviceName;

/// A fully validated, constructed machine ready to run. Devices are built
/// but their driver loops do not start until [`Machine::run`] is called.
pub struct Machine {
    registry: Registry,
    tasks: Vec<(DeviceName, mpsc::Receiver<Command>, Arc<Device>)>,
    pub supervisor: Arc<BallCountSupervisor>,
}

impl Machine {
    /// Validate every device config (individually and as a graph), build
    /// one [`Device`] per non-playfield entry, and wire them into a
    /// [`Registry`]. Refuses to start on the first [`ConfigError`] —
    /// fatal, detected once at construction.
    pub fn new(
        configs: Vec<DeviceConfig>,
        switches: Arc<dyn SwitchController>,
        coils: Arc<dyn CoilController>,
        total_balls: u32,
    ) -> Result<Self, ConfigError> {
        let mut by_name: HashMap<DeviceName, DeviceConfig> = HashMap::new();
        for cfg in configs {
            cfg.validate_self()?;
            let name = cfg.name.clone();
            if by_name.insert(name.clone(), cfg).is_some() {
                return Err(ConfigError::DuplicateDevice(name));
            }
        }

        Self::validate_graph(&by_name)?;

        let shared_bus = EventBus::default();
        let configs_arc = Arc::new(by_name.clone());
        let supervisor = Arc::new(BallCountSupervisor::new(total_balls));

        let mut devices = HashMap::new();
        let mut tasks = Vec::new();

        for (name, cfg) in by_name.iter() {
            if cfg.is_playfield {
                continue;
            }
            let counter = build_counter(cfg, switches.clone());
            let ejector = build_ejector(cfg, coils.clone());
            let device = Arc::new(
                Device::new(cfg.clone(), counter, ejector, switches.clone()).with_bus(shared_bus.clone()),
            );

            // Persistent claim handler for `ConfirmEjectType::Target`:
            // drains exactly as many outstanding waiters as there are
            // unclaimed balls, rather than registering (and leaking) a
            // fresh handler per eject attempt.
            let claim_target = device.clone();
            device.bus.on_ball_enter(
                name.clone(),
                Arc::new(move |relay: &mut BallEnterRelay| {
                    let mut waiters = claim_target.ball_enter_waiters.lock().unwrap();
                    let claim = waiters.len().min(relay.unclaimed_balls as usize);
                    for tx in waiters.drain(0..claim) {
                        let _ = tx.send(());
                    }
                    relay.unclaimed_balls = relay.unclaimed_balls.saturating_sub(claim as u32);
                }),
            );

            let (tx, rx) = mpsc::channel(32);
            devices.insert(
                name.clone(),
                DeviceHandle {
                    name: name.clone(),
                    device: device.clone(),
                    commands: tx,
                },
            );
            tasks.push((name.clone(), rx, device));
        }

        let registry = Registry::new(configs_arc, Arc::new(devices), supervisor.clone());

        Ok(Self { registry, tasks, supervisor })
    }

    fn validate_graph(configs: &HashMap<DeviceName, DeviceConfig>) -> Result<(), ConfigError> {
        for cfg in configs.values() {
            if cfg.is_playfield {
                continue;
            }
            for target in &cfg.eject_targets {
                if !configs.contains_key(target) {
                    return Err(ConfigError::UnknownEjectTarget(cfg.name.clone(), target.clone()));
                }
            }
            if let Some(target) = &cfg.target_on_unexpected_ball {
                if !configs.contains_key(target) {
                    return Err(ConfigError::UnknownUnexpectedBallTarget(
                        cfg.name.clone(),
                        target.clone(),
                    ));
                }
            }
        }

        let router = Router::new(configs);
        for cfg in configs.values() {
            if cfg.is_playfield || cfg.is_trough() {
                continue;
            }
            if cfg.is_drain() && router.find_next_trough(&cfg.name).is_none() {
                return Err(ConfigError::NoPathToTrough(cfg.name.clone()));
            }
            if let Some(target) = &cfg.target_on_unexpected_ball {
                if router.find_path_to_target(&cfg.name, target).is_none() {
                    return Err(ConfigError::NoPathToUnexpectedBallTarget(
                        cfg.name.clone(),
                        target.clone(),
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Spawn one driver task per device and return handles the caller can
    /// `await` (or abort) for shutdown. Must run under a current-thread
    /// runtime (binding implementation note).
    pub fn run(mut self) -> (Registry, Vec<JoinHandle<()>>) {
        let returned_registry = self.registry.clone();
        let mut handles = Vec::new();
        for (name, rx, device) in self.tasks.drain(..) {
            handles.push(tokio::task::spawn(run_device(
                name,
                device,
                self.registry.clone(),
                rx,
            )));
        }
        (returned_registry, handles)
    }
}

fn build_counter(cfg: &DeviceConfig, switches: Arc<dyn SwitchController>) -> Box<dyn Counter> {
    if cfg.ball_capacity > cfg.ball_switches.len() as u32 {
        let switch = cfg.ball_switches.first().cloned().unwrap_or_default();
        Box::new(EntranceSwitchCounter::new(switch, switches, cfg.ball_capacity))
    } else {
        Box::new(SwitchCounter::new(cfg.ball_switches.clone(), switches))
    }
}

fn build_ejector(cfg: &DeviceConfig, coils: Arc<dyn CoilController>) -> Option<Box<dyn Ejector>> {
    if let Some(coil) = &cfg.eject_coil {
        Some(Box::new(PulseCoilEjector::new(coil.clone(), coils)))
    } else if let Some(coil) = &cfg.hold_coil {
        Some(Box::new(HoldCoilEjector::new(coil.clone(), coils)))
    } else if cfg.mechanical_eject {
        Some(Box::new(MechanicalEjector))
    } else {
        None
    }
}
