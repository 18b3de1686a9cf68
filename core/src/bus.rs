//! The event bus external interface, implemented in-crate.
//!
//! Two primitives are load-bearing:
//!
//! * **Relay** events thread a mutable payload through registered claim
//!   handlers in registration order; the final payload drives behavior.
//!   Only `ball_enter` uses this.
//! * **Queue** events let subscribers hold the posting task suspended
//!   until they release. Only `ball_eject_attempt` uses this.
//!
//! Everything else is a plain broadcast notification. `tokio::sync::broadcast`
//! gives every subscriber the same FIFO delivery order the posting side saw,
//! which is the ordering guarantee devices depend on when they react to
//! each other's events.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;

use crate::DeviceName;

/// Plain broadcast notifications. `Clone` because `broadcast` requires
/// it; all payloads are cheap (names + small integers).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// `balldevice_D_ball_left`
    BallLeft {
        device: DeviceName,
        balls: u32,
        target: DeviceName,
        num_attempts: u32,
    },
    /// `balldevice_D_ejecting_ball`
    EjectingBall {
        device: DeviceName,
        target: DeviceName,
        mechanical_eject: bool,
        num_attempts: u32,
    },
    /// `balldevice_D_ball_eject_success`
    EjectSuccess {
        device: DeviceName,
        target: DeviceName,
        balls: u32,
    },
    /// `balldevice_D_ball_eject_failed`
    EjectFailed {
        device: DeviceName,
        target: DeviceName,
        balls: u32,
        retry: bool,
        num_attempts: u32,
    },
    /// `balldevice_D_ball_eject_permanent_failure`
    EjectPermanentFailure { device: DeviceName },
    /// `balldevice_D_ball_lost`
    BallLost { device: DeviceName, target: DeviceName },
    /// `balldevice_N_ball_missing` and `balldevice_ball_missing`
    BallMissing { device: DeviceName, balls: u32 },
    /// `balldevice_D_ok_to_receive`
    OkToReceive { device: DeviceName, balls: u32 },
    /// `balldevice_D_eject_broken`
    EjectBroken { device: DeviceName },
    /// `balldevice_captured_from_X`
    CapturedFrom { device: DeviceName, source: DeviceName, balls: u32 },
    /// `balldevice_balls_available`
    BallsAvailable,
    /// A named event posted from outside the bus's own device bookkeeping
    /// (e.g. a player-facing trigger), used by `ConfirmEjectType::Event` to
    /// confirm an eject.
    External { name: String },
}

/// The relay payload for `balldevice_D_ball_enter`. Claim handlers decrement
/// `unclaimed_balls` for any balls they take responsibility for; whatever
/// remains unclaimed when every handler has run is what the device itself
/// must route (`_balls_added_callback`).
#[derive(Debug, Clone)]
pub struct BallEnterRelay {
    pub device: DeviceName,
    pub new_balls: u32,
    pub unclaimed_balls: u32,
}

type ClaimHandler = Arc<dyn Fn(&mut BallEnterRelay) + Send + Sync>;
type BoxFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type QueueHandler = Arc<dyn Fn(EjectAttempt) -> BoxFuture + Send + Sync>;

/// The queue payload for `balldevice_D_ball_eject_attempt`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EjectAttempt {
    pub device: DeviceName,
    pub target: DeviceName,
    pub mechanical_eject: bool,
    pub num_attempts: u32,
}

/// Central event bus. Cheap to clone (internally `Arc`-shared), so every
/// device driver loop can hold its own handle to the same underlying
/// channels.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    broadcast_tx: broadcast::Sender<Event>,
    relay_subscribers: Mutex<HashMap<DeviceName, Vec<ClaimHandler>>>,
    queue_subscribers: Mutex<HashMap<DeviceName, Vec<QueueHandler>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                broadcast_tx,
                relay_subscribers: Mutex::new(HashMap::new()),
                queue_subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to the plain-notification stream. Every subscriber sees
    /// every event in the order it was posted.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Post a plain notification. Never suspends.
    pub fn post(&self, event: Event) {
        // No active subscribers is not an error: plenty of events (e.g.
        // `ball_missing` at machine start) have no listener yet.
        let _ = self.inner.broadcast_tx.send(event);
    }

    /// Register a claim handler for `device`'s `ball_enter` relay.
    pub fn on_ball_enter(&self, device: DeviceName, handler: ClaimHandler) {
        self.inner
            .relay_subscribers
            .lock()
            .unwrap()
            .entry(device)
            .or_default()
            .push(handler);
    }

    /// Post the `ball_enter` relay: run every registered claim handler in
    /// registration order, then return however many balls remain unclaimed.
    pub fn post_ball_enter(&self, device: DeviceName, new_balls: u32) -> BallEnterRelay {
        let mut relay = BallEnterRelay {
            device: device.clone(),
            new_balls,
            unclaimed_balls: new_balls,
        };
        let handlers = self
            .inner
            .relay_subscribers
            .lock()
            .unwrap()
            .get(&device)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(&mut relay);
        }
        relay
    }

    /// Register a queue holder for `device`'s `ball_eject_attempt` event.
    pub fn on_eject_attempt(&self, device: DeviceName, handler: QueueHandler) {
        self.inner
            .queue_subscribers
            .lock()
            .unwrap()
            .entry(device)
            .or_default()
            .push(handler);
    }

    /// Post the `ball_eject_attempt` queue event and await every registered
    /// holder before returning: subscribers can hold the posting task
    /// suspended until they release.
    pub async fn post_eject_attempt(&self, attempt: EjectAttempt) {
        let handlers = self
            .inner
            .queue_subscribers
            .lock()
            .unwrap()
            .get(&attempt.device)
            .cloned()
            .unwrap_or_default();
        for handler in handlers {
            handler(attempt.clone()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn relay_with_no_subscribers_leaves_everything_unclaimed() {
        let bus = EventBus::new(16);
        let relay = bus.post_ball_enter("trough".into(), 2);
        assert_eq!(relay.unclaimed_balls, 2);
        assert_eq!(relay.new_balls, 2);
    }

    #[test]
    fn relay_claim_handler_reduces_unclaimed() {
        let bus = EventBus::new(16);
        bus.on_ball_enter(
            "trough".into(),
            Arc::new(|relay: &mut BallEnterRelay| {
                relay.unclaimed_balls = relay.unclaimed_balls.saturating_sub(1);
            }),
        );
        let relay = bus.post_ball_enter("trough".into(), 3);
        assert_eq!(relay.unclaimed_balls, 2);
    }

    #[tokio::test]
    async fn queue_event_awaits_all_holders() {
        let bus = EventBus::new(16);
        let ran = Arc::new(AtomicU32::new(0));
        for _ in 0..3 {
            let ran = ran.clone();
            bus.on_eject_attempt(
                "trough".into(),
                Arc::new(move |_attempt| {
                    let ran = ran.clone();
                    Box::pin(async move {
                        tokio::task::yield_now().await;
                        ran.fetch_add(1, Ordering::SeqCst);
                    })
                }),
            );
        }

        bus.post_eject_attempt(EjectAttempt {
            device: "trough".into(),
            target: "plunger".into(),
            mechanical_eject: false,
            num_attempts: 1,
        })
        .await;

        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn broadcast_preserves_fifo_order_per_subscriber() {
        let bus = EventBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.post(Event::BallsAvailable);
        bus.post(Event::EjectBroken { device: "trough".into() });

        assert_eq!(rx1.recv().await.unwrap(), Event::BallsAvailable);
        assert_eq!(rx1.recv().await.unwrap(), Event::EjectBroken { device: "trough".into() });
        assert_eq!(rx2.recv().await.unwrap(), Event::BallsAvailable);
        assert_eq!(rx2.recv().await.unwrap(), Event::EjectBroken { device: "trough".into() });
    }
}
