//! The per-device state machine: shared device state, the command surface
//! other devices and the machine use to talk to it, and the async driver
//! loop that owns and advances it.

pub mod orchestrator;
pub mod state;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;

pub use state::DeviceState;

use crate::bus::EventBus;
use crate::config::DeviceConfig;
use crate::counter::Counter;
use crate::delay::DelayManager;
use crate::ejector::Ejector;
use crate::hw::SwitchController;
use crate::DeviceName;

/// A request from outside (another device's outgoing handler, or a
/// player-facing API) asking this device to receive `count` balls from
/// wherever one can be found.
#[derive(Debug, Clone)]
pub struct BallRequest {
    pub requester: DeviceName,
    pub count: u32,
}

/// A request asking this device to eject one ball toward `target`.
#[derive(Debug, Clone)]
pub struct EjectRequest {
    pub target: DeviceName,
    pub player_controlled: bool,
}

/// One outstanding promise that a ball is headed here from `source`, made
/// at eject-chain setup time. If `deadline` passes with no matching
/// arrival, the commitment is abandoned and the ball is declared lost.
#[derive(Debug, Clone)]
pub struct IncomingBall {
    pub source: DeviceName,
    pub deadline: Instant,
}

/// The command surface a [`DeviceHandle`] exposes to the rest of the
/// machine. The driver loop is the only task that ever mutates `Device`.
#[derive(Debug)]
pub enum Command {
    /// A fresh eject request entering the system from outside this
    /// device's own chain-forwarding. Reserves the target's incoming
    /// commitment exactly once.
    Eject(EjectRequest),
    EjectAll { target: Option<DeviceName> },
    RequestBall(BallRequest),
    /// An internal hop of an eject chain already set up by someone else's
    /// `Eject`/`RequestBall` — dispatched without re-reserving anything.
    RelayEject(EjectRequest),
    /// A ball physically arrived (from `IncomingBallHandler`'s switch/beam
    /// observation) and is being routed.
    BallArrived { unexpected: bool },
    Shutdown,
}

/// Shared, driver-task-owned state for one ball device. Other devices
/// never hold a `&Device` — only a [`DeviceHandle`] (a name plus a command
/// channel), per the flat-registry design note.
pub struct Device {
    pub config: DeviceConfig,
    pub counter: Box<dyn Counter>,
    pub ejector: Option<Box<dyn Ejector>>,
    pub bus: EventBus,
    pub delay: DelayManager,
    pub switches: Arc<dyn SwitchController>,

    /// Balls physically present and not already committed to an outgoing
    /// eject, plus any virtual reservations made on this device's behalf
    /// by `reserve_for_incoming` before the ball has actually arrived.
    pub available_balls: AtomicU32,
    /// Balls promised to us by an eject chain's setup step, not yet
    /// physically arrived. Each entry's `deadline` bounds how long we
    /// wait before declaring that specific ball lost.
    pub incoming: Mutex<Vec<IncomingBall>>,
    /// Consecutive permanent eject failures (every attempt exhausted with
    /// no confirmation). Three in a row without an intervening success
    /// declares the ejector broken.
    pub consecutive_failures: AtomicU32,
    /// Rounds of `ball_search` run since the last successful eject;
    /// alternates the search phase between mild and aggressive.
    pub ball_search_rounds: AtomicU32,
    /// Outstanding confirmation waiters for `ConfirmEjectType::Target`,
    /// drained by a persistent `ball_enter` claim handler registered once
    /// at construction (`Machine::new`), not per attempt.
    pub ball_enter_waiters: std::sync::Mutex<Vec<oneshot::Sender<()>>>,
    /// Woken whenever `available_balls`/`incoming` changes capacity,
    /// so `wait_for_ready_to_receive` doesn't have to busy-poll.
    pub capacity_notify: tokio::sync::Notify,

    pub state: Mutex<DeviceState>,
    pub ball_requests: Mutex<std::collections::VecDeque<BallRequest>>,
    pub eject_queue: Mutex<std::collections::VecDeque<EjectRequest>>,
    /// The eject in flight, carried across the `Ejecting` -> `BallLeft` ->
    /// `FailedConfirm`/`Idle` transitions.
    pub pending: Mutex<Option<PendingEject>>,
}

#[derive(Debug, Clone)]
pub struct PendingEject {
    pub request: EjectRequest,
    pub num_attempts: u32,
}

impl Device {
    pub fn new(
        config: DeviceConfig,
        counter: Box<dyn Counter>,
        ejector: Option<Box<dyn Ejector>>,
        switches: Arc<dyn SwitchController>,
    ) -> Self {
        let initial_balls = counter.count();
        Self {
            config,
            counter,
            ejector,
            bus: EventBus::default(),
            delay: DelayManager::new(),
            switches,
            available_balls: AtomicU32::new(initial_balls),
            incoming: Mutex::new(Vec::new()),
            consecutive_failures: AtomicU32::new(0),
            ball_search_rounds: AtomicU32::new(0),
            ball_enter_waiters: std::sync::Mutex::new(Vec::new()),
            capacity_notify: tokio::sync::Notify::new(),
            state: Mutex::new(DeviceState::Idle),
            ball_requests: Mutex::new(std::collections::VecDeque::new()),
            eject_queue: Mutex::new(std::collections::VecDeque::new()),
            pending: Mutex::new(None),
        }
    }

    pub fn with_bus(mut self, bus: EventBus) -> Self {
        self.bus = bus;
        self
    }

    /// `ball_device.py:is_full`.
    pub fn is_full(&self) -> bool {
        self.counter.count() >= self.config.ball_capacity
    }

    /// `ball_device.py:get_additional_ball_capacity` — raw headroom, not
    /// accounting for in-flight commitments.
    pub fn get_additional_ball_capacity(&self) -> u32 {
        self.config.ball_capacity.saturating_sub(self.counter.count())
    }

    /// `ball_device.py:get_real_additional_capacity` — headroom minus
    /// balls already promised to us by another device's eject chain.
    pub async fn get_real_additional_capacity(&self) -> u32 {
        self.get_additional_ball_capacity()
            .saturating_sub(self.incoming.lock().await.len() as u32)
    }

    /// Blocks until there's room for the one ball about to be sent here.
    /// `incoming` always already holds the reservation for that very ball
    /// (made by `reserve_for_incoming` at eject-chain setup time, before
    /// the sender ever reaches this wait) — subtract it back out so a
    /// device doesn't wait for room it's already been promised.
    pub async fn wait_for_ready_to_receive(&self) {
        loop {
            let held = self.counter.count();
            let incoming_len = self.incoming.lock().await.len() as u32;
            let other_incoming = incoming_len.saturating_sub(1);
            if held + other_incoming < self.config.ball_capacity {
                return;
            }
            tokio::select! {
                _ = self.capacity_notify.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(50)) => {}
            }
        }
    }

    pub fn reserve_available_ball(&self) -> bool {
        self.available_balls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                if current > 0 {
                    Some(current - 1)
                } else {
                    None
                }
            })
            .is_ok()
    }

    pub fn release_available_ball(&self) {
        self.available_balls.fetch_add(1, Ordering::SeqCst);
    }

    /// Record a virtual reservation for a ball `source` has committed to
    /// sending here, with a deadline bounding how long the commitment is
    /// honored before the ball is declared lost.
    pub async fn reserve_for_incoming(&self, source: DeviceName, timeout_ms: u64) {
        self.available_balls.fetch_add(1, Ordering::SeqCst);
        let deadline = Instant::now() + Duration::from_millis(timeout_ms.max(1));
        self.incoming.lock().await.push(IncomingBall { source, deadline });
        self.capacity_notify.notify_waiters();
    }

    /// Pop the oldest outstanding incoming commitment, if any — called
    /// when a ball physically arrives, to tell expected from unexpected
    /// arrivals.
    pub async fn take_incoming(&self) -> Option<IncomingBall> {
        let mut incoming = self.incoming.lock().await;
        if incoming.is_empty() {
            return None;
        }
        let taken = incoming.remove(0);
        drop(incoming);
        self.capacity_notify.notify_waiters();
        Some(taken)
    }

    /// Abandon the commitment `source` made on our behalf (the eject that
    /// would have delivered it failed permanently) and give the virtual
    /// reservation back.
    pub async fn revert_incoming(&self, source: &str) {
        let mut incoming = self.incoming.lock().await;
        if let Some(idx) = incoming.iter().position(|ib| ib.source == source) {
            incoming.remove(idx);
        }
        drop(incoming);
        self.available_balls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .ok();
        self.capacity_notify.notify_waiters();
    }

    /// The earliest deadline among outstanding incoming commitments, if
    /// any — the driver loop races this to detect a ball that never showed.
    pub async fn earliest_incoming_deadline(&self) -> Option<Instant> {
        self.incoming.lock().await.iter().map(|ib| ib.deadline).min()
    }

    /// Remove and return the first commitment whose deadline has passed,
    /// if any, reverting its virtual reservation.
    pub async fn expire_incoming(&self) -> Option<IncomingBall> {
        let now = Instant::now();
        let mut incoming = self.incoming.lock().await;
        let idx = incoming.iter().position(|ib| ib.deadline <= now)?;
        let expired = incoming.remove(idx);
        drop(incoming);
        self.available_balls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |c| Some(c.saturating_sub(1)))
            .ok();
        self.capacity_notify.notify_waiters();
        Some(expired)
    }

    /// Register interest in this device's next `ball_enter`, claimed by the
    /// persistent claim handler `Machine::new` installs. Used by
    /// `ConfirmEjectType::Target` to wait for the real arrival rather than
    /// assuming success.
    pub fn register_ball_enter_waiter(&self) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.ball_enter_waiters.lock().unwrap().push(tx);
        rx
    }
}

/// A lightweight, cloneable reference to a running device: its static
/// name plus a channel to the driver task. This is what the registry
/// stores and what devices use to address each other — never a direct
/// reference to another device's state.
#[derive(Clone)]
pub struct DeviceHandle {
    pub name: DeviceName,
    pub device: Arc<Device>,
    pub commands: mpsc::Sender<Command>,
}

impl DeviceHandle {
    pub async fn eject(&self, target: impl Into<DeviceName>, player_controlled: bool) {
        let _ = self
            .commands
            .send(Command::Eject(EjectRequest {
                target: target.into(),
                player_controlled,
            }))
            .await;
    }

    /// Continue an eject chain someone else already reserved — does not
    /// trigger a fresh reservation on the final target.
    pub async fn relay_eject(&self, target: impl Into<DeviceName>, player_controlled: bool) {
        let _ = self
            .commands
            .send(Command::RelayEject(EjectRequest {
                target: target.into(),
                player_controlled,
            }))
            .await;
    }

    pub async fn eject_all(&self, target: Option<DeviceName>) {
        let _ = self.commands.send(Command::EjectAll { target }).await;
    }

    pub async fn request_ball(&self, count: u32) {
        let _ = self
            .commands
            .send(Command::RequestBall(BallRequest {
                requester: self.name.clone(),
                count,
            }))
            .await;
    }

    pub async fn state(&self) -> DeviceState {
        *self.device.state.lock().await
    }
}
