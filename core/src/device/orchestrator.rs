//! The async driver loop that advances one device through its state
//! machine. States are a tagged enum; transitions are realized as an
//! async driver loop matching states to handler functions, each of which
//! awaits typed events rather than polling a level condition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::bus::Event;
use crate::config::ConfirmEjectType;
use crate::device::{Command, Device, DeviceState, EjectRequest};
use crate::ejector::BallSearchPhase;
use crate::incoming::{handle_arrival, handle_incoming_timeout};
use crate::outgoing::{dispatch_eject, start_or_queue_eject};
use crate::registry::Registry;
use crate::supervisor::reconcile_now;
use crate::DeviceName;

const DEFAULT_MISSING_TIMEOUT_MS: u64 = 20_000;

/// Owns `device` for its whole lifetime. Spawned once per non-playfield
/// device by `Machine::run`, on the current-thread runtime.
pub async fn run_device(
    name: DeviceName,
    device: Arc<Device>,
    registry: Registry,
    mut commands: mpsc::Receiver<Command>,
) {
    info!(device = %name, "driver loop started");

    loop {
        let current = *device.state.lock().await;
        match current {
            DeviceState::Invalid => {
                // Never reachable once `Machine::new` has validated the
                // graph; the loop exits so nothing drives an invalid
                // device.
                return;
            }
            DeviceState::Idle => {
                if !handle_idle(&name, &device, &registry, &mut commands).await {
                    return;
                }
            }
            DeviceState::WaitingForBall | DeviceState::WaitingForBallMechanical => {
                handle_waiting_for_ball(&name, &device, current).await;
            }
            DeviceState::Ejecting => {
                handle_ejecting(&name, &device, &registry).await;
            }
            DeviceState::BallLeft => {
                handle_ball_left(&name, &device, &registry).await;
            }
            DeviceState::FailedConfirm => {
                handle_failed_confirm(&name, &device).await;
            }
            DeviceState::FailedEject => {
                handle_failed_eject(&name, &device).await;
            }
            DeviceState::MissingBalls => {
                handle_missing_balls(&name, &device, &registry).await;
            }
            DeviceState::EjectBroken => {
                // Refuses new operations; still drains the command queue
                // so callers don't block forever, but answers nothing.
                if commands.recv().await.is_none() {
                    return;
                }
            }
        }
    }
}

async fn set_state(device: &Device, next: DeviceState) {
    *device.state.lock().await = next;
}

/// Resolves when `device`'s earliest incoming commitment expires, or
/// never if there isn't one — a `tokio::select!` branch, not a poll loop.
async fn wait_for_incoming_deadline(device: &Device) {
    match device.earliest_incoming_deadline().await {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

async fn handle_idle(
    name: &DeviceName,
    device: &Device,
    registry: &Registry,
    commands: &mut mpsc::Receiver<Command>,
) -> bool {
    tokio::select! {
        biased;

        Some(cmd) = commands.recv() => {
            match cmd {
                Command::Shutdown => return false,
                Command::Eject(req) => start_or_queue_eject(name, device, registry, req).await,
                Command::RelayEject(req) => dispatch_eject(name, device, registry, req).await,
                Command::EjectAll { target } => {
                    let target = target.or_else(|| device.config.eject_targets.first().cloned());
                    if let Some(target) = target {
                        while device.available_balls.load(std::sync::atomic::Ordering::SeqCst) > 0 {
                            start_or_queue_eject(name, device, registry, EjectRequest {
                                target: target.clone(),
                                player_controlled: false,
                            }).await;
                        }
                    }
                }
                Command::RequestBall(req) => {
                    start_or_queue_eject(name, device, registry, EjectRequest {
                        target: req.requester,
                        player_controlled: false,
                    }).await;
                }
                Command::BallArrived { unexpected } => {
                    handle_arrival(name, device, registry, unexpected).await;
                }
            }
        }

        _ = device.counter.wait_settled(Duration::from_millis(device.config.entrance_count_delay_ms.max(1))) => {
            // An unexpected ball arrived with no prior Command::BallArrived.
            handle_arrival(name, device, registry, true).await;
        }

        _ = wait_for_incoming_deadline(device) => {
            if let Some(expired) = device.expire_incoming().await {
                handle_incoming_timeout(name, device, expired).await;
            }
        }
    }
    true
}

async fn handle_waiting_for_ball(name: &DeviceName, device: &Device, state: DeviceState) {
    let debounce = Duration::from_millis(device.config.entrance_count_delay_ms.max(1));
    if state == DeviceState::WaitingForBallMechanical {
        debug!(device = %name, "waiting for mechanically-confirmed ball");
    }
    device.counter.wait_settled(debounce).await;
    set_state(device, DeviceState::Idle).await;
}

async fn handle_ejecting(name: &DeviceName, device: &Device, registry: &Registry) {
    let pending = device.pending.lock().await.take();
    let (req, num_attempts) = match pending {
        Some(crate::device::PendingEject { request, num_attempts }) => (request, num_attempts),
        None => match device.eject_queue.lock().await.pop_front() {
            Some(req) => (req, 1),
            None => {
                set_state(device, DeviceState::Idle).await;
                return;
            }
        },
    };

    // Let the target (or whatever's next in line) hold us here until it
    // genuinely has room, per the incoming handler's readiness gate.
    if let Some(target_handle) = registry.get(&req.target) {
        target_handle.device.wait_for_ready_to_receive().await;
    }

    device
        .bus
        .post_eject_attempt(crate::bus::EjectAttempt {
            device: name.clone(),
            target: req.target.clone(),
            mechanical_eject: device.config.mechanical_eject,
            num_attempts,
        })
        .await;

    if let Some(ejector) = &device.ejector {
        ejector.eject_one_ball();
    }
    device.bus.post(Event::EjectingBall {
        device: name.clone(),
        target: req.target.clone(),
        mechanical_eject: device.config.mechanical_eject,
        num_attempts,
    });

    let timeout_ms = device
        .config
        .eject_timeouts_ms
        .get(&req.target)
        .copied()
        .unwrap_or(3000);

    let exit_debounce = Duration::from_millis(device.config.exit_count_delay_ms.max(1));
    let before = device.counter.count();

    tokio::select! {
        _ = device.counter.wait_settled(exit_debounce) => {
            let after = device.counter.count();
            if after < before {
                device.bus.post(Event::BallLeft {
                    device: name.clone(),
                    balls: before - after,
                    target: req.target.clone(),
                    num_attempts,
                });
                *device.pending.lock().await = Some(crate::device::PendingEject {
                    request: req,
                    num_attempts,
                });
                set_state(device, DeviceState::BallLeft).await;
            } else {
                fail_confirm(name, device, registry, req, num_attempts, false).await;
            }
        }
        _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
            fail_confirm(name, device, registry, req, num_attempts, false).await;
        }
    }
}

/// Waits, bounded by `timeout`, for `switch` to report active — the
/// `ConfirmEjectType::Switch` strategy.
async fn wait_for_switch_activation(device: &Device, switch: &str, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        tokio::select! {
            active = device.switches.wait_for_change(switch) => {
                if active {
                    return true;
                }
            }
            _ = tokio::time::sleep_until(deadline) => return false,
        }
    }
}

/// Waits, bounded by `timeout`, for `Event::External { name }` to be
/// posted on the bus — the `ConfirmEjectType::Event` strategy.
async fn wait_for_named_event(device: &Device, name: &str, timeout: Duration) -> bool {
    let mut rx = device.bus.subscribe();
    let deadline = Instant::now() + timeout;
    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(Event::External { name: posted }) if posted == name => return true,
                    Ok(_) => continue,
                    Err(_) => continue,
                }
            }
            _ = tokio::time::sleep_until(deadline) => return false,
        }
    }
}

async fn handle_ball_left(name: &DeviceName, device: &Device, registry: &Registry) {
    let pending = device
        .pending
        .lock()
        .await
        .clone()
        .expect("BallLeft is only entered with a pending eject recorded");

    let missing_timeout_ms = device
        .config
        .ball_missing_timeouts_ms
        .get(&pending.request.target)
        .copied()
        .unwrap_or(DEFAULT_MISSING_TIMEOUT_MS);
    let timeout = Duration::from_millis(missing_timeout_ms);

    let confirmed = match device.config.confirm_eject_type {
        ConfirmEjectType::Fake => {
            tokio::time::sleep(Duration::from_millis(1)).await;
            true
        }
        ConfirmEjectType::Playfield => {
            let eject_timeout_ms = device
                .config
                .eject_timeouts_ms
                .get(&pending.request.target)
                .copied()
                .unwrap_or(3000);
            tokio::time::sleep(Duration::from_millis(eject_timeout_ms + 500)).await;
            true
        }
        ConfirmEjectType::Target => match registry.get(&pending.request.target) {
            Some(target_handle) => {
                let waiter = target_handle.device.register_ball_enter_waiter();
                tokio::select! {
                    _ = waiter => true,
                    _ = tokio::time::sleep(timeout) => false,
                }
            }
            None => false,
        },
        ConfirmEjectType::Switch => match &device.config.confirm_eject_switch {
            Some(switch) => wait_for_switch_activation(device, switch, timeout).await,
            None => false,
        },
        ConfirmEjectType::Event => match &device.config.confirm_eject_event {
            Some(event_name) => wait_for_named_event(device, event_name, timeout).await,
            None => false,
        },
    };

    if confirmed {
        device.bus.post(Event::EjectSuccess {
            device: name.clone(),
            target: pending.request.target.clone(),
            balls: 1,
        });
        device.consecutive_failures.store(0, std::sync::atomic::Ordering::SeqCst);
        device.ball_search_rounds.store(0, std::sync::atomic::Ordering::SeqCst);
        *device.pending.lock().await = None;
        reconcile_now(registry);
        set_state(device, DeviceState::Idle).await;
    } else {
        let jam_active = device
            .config
            .jam_switch
            .as_ref()
            .map(|switch| device.switches.is_active(switch))
            .unwrap_or(false);
        *device.pending.lock().await = None;
        fail_confirm(name, device, registry, pending.request, pending.num_attempts, jam_active).await;
    }
}

/// Shared failure path for both "the ball never left" (`handle_ejecting`'s
/// own timeouts, `jam_active` always false — the jam switch is only
/// meaningful once a ball has actually departed) and "the ball left but
/// confirmation never arrived" (`handle_ball_left`, `jam_active` reflects
/// whether the jam switch is active right now). A ball that fell back
/// onto the jam switch retries unconditionally, distinct from a ball
/// that's genuinely missing, which is still gated by `max_eject_attempts`.
async fn fail_confirm(
    name: &DeviceName,
    device: &Device,
    registry: &Registry,
    req: EjectRequest,
    num_attempts: u32,
    jam_active: bool,
) {
    let max = device.config.max_eject_attempts;
    let retry = jam_active || max == 0 || num_attempts < max;

    device.bus.post(Event::EjectFailed {
        device: name.clone(),
        target: req.target.clone(),
        balls: 1,
        retry,
        num_attempts,
    });

    if retry {
        *device.pending.lock().await = Some(crate::device::PendingEject {
            request: req,
            num_attempts: num_attempts + 1,
        });
        set_state(device, DeviceState::FailedConfirm).await;
        return;
    }

    device.bus.post(Event::EjectPermanentFailure { device: name.clone() });
    device.release_available_ball();
    if let Some(target) = registry.get(&req.target) {
        target.device.revert_incoming(name).await;
    }
    reconcile_now(registry);

    let failures = device
        .consecutive_failures
        .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
        + 1;
    if failures >= 3 {
        device.bus.post(Event::EjectBroken { device: name.clone() });
        set_state(device, DeviceState::EjectBroken).await;
    } else {
        set_state(device, DeviceState::FailedEject).await;
    }
}

async fn handle_failed_confirm(name: &DeviceName, device: &Device) {
    debug!(device = %name, "retrying eject after failed confirmation");
    set_state(device, DeviceState::Ejecting).await;
}

async fn handle_failed_eject(name: &DeviceName, device: &Device) {
    let missing_timeout = device
        .config
        .ball_missing_timeouts_ms
        .values()
        .copied()
        .min()
        .unwrap_or(DEFAULT_MISSING_TIMEOUT_MS);
    tokio::time::sleep(Duration::from_millis(missing_timeout)).await;
    device.bus.post(Event::BallMissing {
        device: name.clone(),
        // the delta, not a running total, so ball-count conservation holds
        balls: 1,
    });
    set_state(device, DeviceState::MissingBalls).await;
}

async fn handle_missing_balls(name: &DeviceName, device: &Device, registry: &Registry) {
    debug!(device = %name, "missing ball reported, running ball search");
    run_ball_search(registry).await;
    set_state(device, DeviceState::Idle).await;
}

/// Sweeps every device in `ball_search_order`, asking each ejector to try
/// to dislodge a ball it believes it's holding but whose switches
/// disagree. Phase alternates mild/aggressive per device across repeated
/// rounds, tracked by `Device::ball_search_rounds`.
async fn run_ball_search(registry: &Registry) {
    let mut names: Vec<&DeviceName> = registry.names().collect();
    names.sort_by_key(|name| registry.config(name.as_str()).map(|cfg| cfg.ball_search_order).unwrap_or(0));

    for name in names {
        let Some(handle) = registry.get(name) else { continue };
        let Some(ejector) = &handle.device.ejector else { continue };
        let round = handle.device.ball_search_rounds.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let phase = if round % 2 == 0 { BallSearchPhase::Mild } else { BallSearchPhase::Aggressive };
        ejector.ball_search(phase);
    }
}
