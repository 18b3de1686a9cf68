//! The flat device-name lookup table: cross-device references are device
//! names resolved through a flat registry, never a graph of devices
//! pointing at each other.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::DeviceConfig;
use crate::device::DeviceHandle;
use crate::graph::Router;
use crate::supervisor::BallCountSupervisor;
use crate::DeviceName;

/// Cheap to clone: both maps are `Arc`-shared and never mutated after
/// `Machine::new` finishes building devices.
#[derive(Clone)]
pub struct Registry {
    configs: Arc<HashMap<DeviceName, DeviceConfig>>,
    handles: Arc<HashMap<DeviceName, DeviceHandle>>,
    supervisor: Arc<BallCountSupervisor>,
}

impl Registry {
    pub fn new(
        configs: Arc<HashMap<DeviceName, DeviceConfig>>,
        handles: Arc<HashMap<DeviceName, DeviceHandle>>,
        supervisor: Arc<BallCountSupervisor>,
    ) -> Self {
        Self { configs, handles, supervisor }
    }

    pub fn supervisor(&self) -> &BallCountSupervisor {
        &self.supervisor
    }

    pub fn get(&self, name: &str) -> Option<&DeviceHandle> {
        self.handles.get(name)
    }

    pub fn config(&self, name: &str) -> Option<&DeviceConfig> {
        self.configs.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &DeviceName> {
        self.handles.keys()
    }

    /// Route `from`'s eject toward `to`.
    pub fn find_path(&self, from: &str, to: &str) -> Option<Vec<DeviceName>> {
        Router::new(&self.configs).find_path_to_target(from, to)
    }

    pub fn find_next_trough(&self, from: &str) -> Option<DeviceName> {
        Router::new(&self.configs).find_next_trough(from)
    }

    /// Walk backward from `from` over devices that can reach it, looking
    /// for one with a ball available right now.
    pub fn find_one_available_ball(&self, from: &str) -> Option<DeviceName> {
        let handles = &self.handles;
        let available = move |name: &str| {
            handles
                .get(name)
                .map(|h| h.device.available_balls.load(std::sync::atomic::Ordering::SeqCst))
                .unwrap_or(0)
        };
        Router::new(&self.configs).find_one_available_ball(from, &available)
    }
}
