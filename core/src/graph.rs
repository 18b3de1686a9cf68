//! Path search over the static eject-target graph.
//!
//! The graph is the `eject_targets` lists of every configured device.
//! `Router` never mutates anything — it answers questions against a
//! snapshot of configuration, with live ball counts supplied by the caller
//! as a closure so this module stays free of any dependency on the running
//! device state.

use std::collections::HashSet;

use crate::config::DeviceConfig;
use crate::DeviceName;

pub struct Router<'a> {
    configs: &'a std::collections::HashMap<DeviceName, DeviceConfig>,
}

impl<'a> Router<'a> {
    pub fn new(configs: &'a std::collections::HashMap<DeviceName, DeviceConfig>) -> Self {
        Self { configs }
    }

    /// First path from `from` to `to` found by depth-first search of
    /// `eject_targets`, in declared order. The playfield is never traversed
    /// as an intermediate hop — it has no outgoing targets of its own.
    pub fn find_path_to_target(&self, from: &str, to: &str) -> Option<Vec<DeviceName>> {
        let mut visited = HashSet::new();
        self.dfs(from, to, &mut visited)
    }

    fn dfs(&self, current: &str, to: &str, visited: &mut HashSet<DeviceName>) -> Option<Vec<DeviceName>> {
        if current == to {
            return Some(vec![current.to_string()]);
        }
        if !visited.insert(current.to_string()) {
            return None;
        }
        let cfg = self.configs.get(current)?;
        if cfg.is_playfield {
            return None;
        }
        for target in &cfg.eject_targets {
            if let Some(mut rest) = self.dfs(target, to, visited) {
                let mut path = vec![current.to_string()];
                path.append(&mut rest);
                return Some(path);
            }
        }
        None
    }

    /// Nearest trough reachable from `from`, by shortest found path.
    /// Every drain device must have a path to some trough.
    pub fn find_next_trough(&self, from: &str) -> Option<DeviceName> {
        self.configs
            .values()
            .filter(|c| c.is_trough())
            .filter_map(|c| self.find_path_to_target(from, &c.name))
            .min_by_key(|path| path.len())
            .and_then(|path| path.last().cloned())
    }

    /// Search backward from `from` over the devices that can reach it,
    /// looking for one with an available ball right now. `available`
    /// reports the live `available_balls` count for a device name.
    /// Cycle-safe: a device is never visited twice.
    pub fn find_one_available_ball(
        &self,
        from: &str,
        available: &dyn Fn(&str) -> u32,
    ) -> Option<DeviceName> {
        let mut visited = HashSet::new();
        self.search_available(from, available, &mut visited)
    }

    fn search_available(
        &self,
        device: &str,
        available: &dyn Fn(&str) -> u32,
        visited: &mut HashSet<DeviceName>,
    ) -> Option<DeviceName> {
        if !visited.insert(device.to_string()) {
            return None;
        }
        if available(device) > 0 {
            return Some(device.to_string());
        }
        for (name, cfg) in self.configs.iter() {
            if visited.contains(name) {
                continue;
            }
            if cfg.eject_targets.iter().any(|t| t == device) {
                if let Some(found) = self.search_available(name, available, visited) {
                    return Some(found);
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfirmEjectType, DeviceConfig};
    use std::collections::HashMap;

    fn device(name: &str, targets: &[&str]) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            tags: if name == "trough" { vec!["trough".into()] } else { vec![] },
            is_playfield: false,
            ball_capacity: 4,
            ball_switches: vec!["s".into()],
            entrance_count_delay_ms: 10,
            exit_count_delay_ms: 10,
            eject_targets: targets.iter().map(|t| t.to_string()).collect(),
            eject_timeouts_ms: targets.iter().map(|t| (t.to_string(), 3000)).collect(),
            ball_missing_timeouts_ms: targets.iter().map(|t| (t.to_string(), 20_000)).collect(),
            max_eject_attempts: 3,
            confirm_eject_type: ConfirmEjectType::Target,
            confirm_eject_switch: None,
            confirm_eject_event: None,
            jam_switch: None,
            eject_coil: Some("coil".into()),
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

    fn sample_graph() -> HashMap<DeviceName, DeviceConfig> {
        let mut configs = HashMap::new();
        configs.insert("trough".to_string(), device("trough", &["plunger"]));
        configs.insert("plunger".to_string(), device("plunger", &["playfield"]));
        configs.insert("lock".to_string(), device("lock", &["plunger"]));
        configs.insert("playfield".to_string(), DeviceConfig::playfield("playfield"));
        configs
    }

    #[test]
    fn finds_direct_path() {
        let configs = sample_graph();
        let router = Router::new(&configs);
        assert_eq!(
            router.find_path_to_target("trough", "playfield"),
            Some(vec!["trough".into(), "plunger".into(), "playfield".into()])
        );
    }

    #[test]
    fn no_path_returns_none() {
        let configs = sample_graph();
        let router = Router::new(&configs);
        assert_eq!(router.find_path_to_target("playfield", "trough"), None);
    }

    #[test]
    fn finds_next_trough_from_lock() {
        let mut configs = sample_graph();
        // give lock a direct path to the trough, alongside its plunger path
        configs.get_mut("lock").unwrap().eject_targets.insert(0, "trough".to_string());
        let router = Router::new(&configs);
        assert_eq!(router.find_next_trough("lock"), Some("trough".to_string()));
    }

    #[test]
    fn find_one_available_ball_walks_backward_through_sources() {
        let configs = sample_graph();
        let router = Router::new(&configs);
        let available = |name: &str| if name == "lock" { 1 } else { 0 };
        assert_eq!(
            router.find_one_available_ball("plunger", &available),
            Some("lock".to_string())
        );
    }

    #[test]
    fn find_one_available_ball_is_cycle_safe() {
        let mut configs = sample_graph();
        // introduce a cycle: plunger also points back to trough
        configs.get_mut("plunger").unwrap().eject_targets.push("trough".to_string());
        let router = Router::new(&configs);
        let available = |_: &str| 0;
        assert_eq!(router.find_one_available_ball("playfield", &available), None);
    }
}
