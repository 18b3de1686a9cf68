//! Demo binary: plays a trough → plunger → playfield eject chain against
//! simulated hardware, and prints the resulting event trace.

use std::sync::Arc;
use std::time::Duration;

use ball_core::config::{ConfirmEjectType, DeviceConfig};
use ball_core::hw::sim::{SimCoils, SimSwitches};
use ball_core::machine::Machine;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let switches = Arc::new(SimSwitches::new());
    let coils = Arc::new(SimCoils::new());

    let trough = DeviceConfig {
        name: "trough".into(),
        tags: vec!["trough".into()],
        is_playfield: false,
        ball_capacity: 2,
        ball_switches: vec!["trough_s1".into(), "trough_s2".into()],
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
    };

    let plunger = DeviceConfig {
        name: "plunger".into(),
        tags: vec![],
        is_playfield: false,
        ball_capacity: 1,
        ball_switches: vec!["plunger_s".into()],
        entrance_count_delay_ms: 50,
        exit_count_delay_ms: 50,
        eject_targets: vec!["playfield".into()],
        eject_timeouts_ms: [("playfield".to_string(), 3000)].into_iter().collect(),
        ball_missing_timeouts_ms: [("playfield".to_string(), 20_000)].into_iter().collect(),
        max_eject_attempts: 3,
        confirm_eject_type: ConfirmEjectType::Playfield,
        confirm_eject_switch: None,
        confirm_eject_event: None,
        jam_switch: None,
        eject_coil: None,
        hold_coil: None,
        mechanical_eject: true,
        player_controlled_eject_event: None,
        captures_from: None,
        target_on_unexpected_ball: None,
        ball_missing_target: None,
        auto_fire_on_unexpected_ball: true,
        ball_search_order: 1,
    };

    let playfield = DeviceConfig::playfield("playfield");

    switches.set("trough_s1", true);
    switches.set("trough_s2", true);

    let machine = Machine::new(
        vec![trough, plunger, playfield],
        switches.clone(),
        coils.clone(),
        2,
    )
    .expect("valid configuration");

    let (registry, _handles) = machine.run();
    let mut events = registry.get("trough").unwrap().device.bus.subscribe();

    registry.get("trough").unwrap().eject("plunger", false).await;

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        switches.set("trough_s1", false);
        tokio::time::sleep(Duration::from_millis(200)).await;
        switches.set("plunger_s", true);
        tokio::time::sleep(Duration::from_millis(200)).await;
        switches.set("plunger_s", false);
    });

    for _ in 0..8 {
        if let Ok(event) = tokio::time::timeout(Duration::from_secs(5), events.recv()).await {
            match event {
                Ok(event) => println!("{event:?}"),
                Err(_) => break,
            }
        } else {
            break;
        }
    }
}
