//! Incoming-ball handling: reacting to a ball that physically
//! arrived, posting the `ball_enter` relay, and routing whatever comes
//! back unclaimed.

use std::sync::atomic::Ordering;

use crate::bus::Event;
use crate::device::{Device, EjectRequest, IncomingBall};
use crate::outgoing::{dispatch_eject, start_or_queue_eject};
use crate::registry::Registry;
use crate::supervisor::reconcile_now;
use crate::DeviceName;

/// A ball was observed by the counter. Posts the `ball_enter` relay so any
/// claim handler (the target-confirmation waiter chain) gets first
/// refusal, then routes whatever is left unclaimed: to
/// `target_on_unexpected_ball`/`captures_from` (or, for a plain pass-through
/// device, its first eject target) if this arrival was genuinely
/// unexpected, or to satisfy a parked [`crate::device::BallRequest`] if one
/// is waiting.
///
/// `hint_unexpected` is the counter's own guess (it has no way to know
/// about eject-chain commitments). The real answer also depends on
/// whether this device had an outstanding [`IncomingBall`] reservation:
/// if it did, this arrival fulfills it and is not unexpected regardless
/// of the hint.
pub async fn handle_arrival(name: &DeviceName, device: &Device, registry: &Registry, hint_unexpected: bool) {
    let had_incoming = device.take_incoming().await;
    let unexpected = hint_unexpected && had_incoming.is_none();

    let relay = device.bus.post_ball_enter(name.clone(), 1);
    if had_incoming.is_none() {
        device.available_balls.fetch_add(1, Ordering::SeqCst);
    }

    reconcile_now(registry);

    if relay.unclaimed_balls > 0 {
        if unexpected {
            if let Some(source) = &device.config.captures_from {
                device.bus.post(Event::CapturedFrom {
                    device: name.clone(),
                    source: source.clone(),
                    balls: relay.unclaimed_balls,
                });
            }
        }

        let route_target = device
            .config
            .target_on_unexpected_ball
            .clone()
            .or_else(|| device.config.captures_from.clone())
            .or_else(|| {
                if device.config.is_playfield || device.config.is_trough() {
                    None
                } else {
                    device.config.eject_targets.first().cloned()
                }
            });

        if let Some(target) = route_target {
            if device.config.auto_fire_on_unexpected_ball {
                start_or_queue_eject(
                    name,
                    device,
                    registry,
                    EjectRequest { target, player_controlled: false },
                )
                .await;
            }
        }
    }

    if let Some(req) = device.ball_requests.lock().await.pop_front() {
        device.bus.post(Event::BallsAvailable);
        // Continuing a chain already reserved at its true entry point —
        // never re-reserve here.
        dispatch_eject(
            name,
            device,
            registry,
            EjectRequest { target: req.requester, player_controlled: false },
        )
        .await;
    }
}

/// The deadline on an [`IncomingBall`] commitment passed with no matching
/// arrival: revert the virtual reservation (already done by
/// `Device::expire_incoming`) and tell whoever was waiting on this device
/// that the ball never showed.
pub async fn handle_incoming_timeout(name: &DeviceName, device: &Device, expired: IncomingBall) {
    let popped = device.ball_requests.lock().await.pop_front();
    let target = popped.map(|req| req.requester).unwrap_or(expired.source);
    device.bus.post(Event::BallLost { device: name.clone(), target });
}
