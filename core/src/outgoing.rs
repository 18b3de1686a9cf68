//! Outgoing-ball handling: deciding how to satisfy an eject
//! request — serve it from the device's own available balls, or chain the
//! request upstream to whichever device actually has one.
//!
//! `start_or_queue_eject` is the only entry point that reserves a virtual
//! ball on the final target (`Device::reserve_for_incoming`), and it does
//! so exactly once, after `dispatch_eject` has determined whether this
//! device can serve the request immediately or must search upstream —
//! never before, since a self-request (`name == req.target`) would
//! otherwise corrupt its own "do I already have a ball" check.
//! `dispatch_eject` is what every internal continuation of an
//! already-reserved chain calls instead (`Command::RelayEject`, and the
//! same-device `ball_requests` forwarding in `incoming::handle_arrival`).

use tracing::{debug, warn};

use crate::device::{BallRequest, Device, DeviceState, EjectRequest};
use crate::registry::Registry;
use crate::DeviceName;

const DEFAULT_MISSING_TIMEOUT_MS: u64 = 20_000;

/// Fresh entry point for an eject request: dispatches it, then reserves a
/// virtual ball on `req.target` if it names a live device other than a
/// terminal sink with no driver (e.g. the playfield).
pub async fn start_or_queue_eject(
    name: &DeviceName,
    device: &Device,
    registry: &Registry,
    req: EjectRequest,
) {
    let target = req.target.clone();
    let source = name.clone();
    dispatch_eject(name, device, registry, req).await;

    if let Some(target_handle) = registry.get(&target) {
        let timeout_ms = device
            .config
            .ball_missing_timeouts_ms
            .get(&target)
            .copied()
            .unwrap_or(DEFAULT_MISSING_TIMEOUT_MS);
        target_handle.device.reserve_for_incoming(source, timeout_ms).await;
    }
}

/// Continue an already-reserved eject chain one hop further: figure out
/// the real next physical hop toward `req.target` (never assume the
/// caller already named a direct neighbor), and either serve it from this
/// device's own stock, relay the request to an upstream source, or park
/// it until a ball becomes available. Never touches a target's incoming
/// reservation — that's `start_or_queue_eject`'s job, done once per
/// request.
pub async fn dispatch_eject(name: &DeviceName, device: &Device, registry: &Registry, req: EjectRequest) {
    let next_hop = if device.config.eject_targets.iter().any(|t| t == &req.target) {
        req.target.clone()
    } else {
        registry
            .find_path(name, &req.target)
            .and_then(|path| path.get(1).cloned())
            .unwrap_or_else(|| req.target.clone())
    };

    if device.reserve_available_ball() {
        if next_hop != req.target {
            // We only reach as far as `next_hop`; the hop forwards the
            // rest of the chain on our behalf once the ball lands there.
            if let Some(hop_handle) = registry.get(&next_hop) {
                hop_handle.device.ball_requests.lock().await.push_back(BallRequest {
                    requester: req.target.clone(),
                    count: 1,
                });
            }
        }
        device.eject_queue.lock().await.push_back(EjectRequest {
            target: next_hop,
            player_controlled: req.player_controlled,
        });
        *device.state.lock().await = DeviceState::Ejecting;
        return;
    }

    let source = registry.find_one_available_ball(name);
    match source {
        Some(source_name) if source_name != *name => {
            debug!(device = %name, source = %source_name, target = %req.target, "chaining eject through upstream source");
            if let Some(source_handle) = registry.get(&source_name) {
                source_handle.relay_eject(req.target.clone(), req.player_controlled).await;
            }
        }
        _ => {
            warn!(device = %name, target = %req.target, "no available ball anywhere for eject request");
            device.ball_requests.lock().await.push_back(BallRequest {
                requester: req.target,
                count: 1,
            });
        }
    }
}
