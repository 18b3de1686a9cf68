//! Ball-presence counters.
//!
//! `SwitchCounter` backs devices with one position switch per ball slot
//! (a trough, most locks): the switch set is authoritative, so the counter
//! always reports exactly how many balls are physically present, once
//! debounced. `EntranceSwitchCounter` backs devices with a single
//! beam-break at the entrance (subways, some VUKs): it cannot see how many
//! balls are inside, only that one passed the beam, so it keeps an
//! *inferred* running count capped to the device's capacity and degrades
//! some invariants accordingly: entrance-counted devices cannot detect
//! balls added or removed through any path but the beam.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::select_all;

use crate::delay::{DelayManager, DelayOutcome};
use crate::hw::SwitchController;

pub trait Counter: Send + Sync {
    /// The believed count right now, with no debounce wait.
    fn count(&self) -> u32;

    /// Wait for the switch state to change and then settle (no further
    /// change for `debounce`), returning the new count. Used by the
    /// orchestrator to confirm an entrance or exit.
    fn wait_settled<'a>(
        &'a self,
        debounce: Duration,
    ) -> Pin<Box<dyn Future<Output = u32> + Send + 'a>>;
}

/// N physical position switches, one per ball slot. `count()` is always
/// exactly the number of active switches — authoritative.
pub struct SwitchCounter {
    switches: Vec<String>,
    switch_ctrl: Arc<dyn SwitchController>,
    delay: DelayManager,
}

impl SwitchCounter {
    pub fn new(switches: Vec<String>, switch_ctrl: Arc<dyn SwitchController>) -> Self {
        Self {
            switches,
            switch_ctrl,
            delay: DelayManager::new(),
        }
    }

    async fn wait_for_any_switch_change(&self) {
        if self.switches.is_empty() {
            std::future::pending::<()>().await;
            return;
        }
        let waits: Vec<_> = self
            .switches
            .iter()
            .map(|s| self.switch_ctrl.wait_for_change(s))
            .collect();
        select_all(waits).await;
    }
}

impl Counter for SwitchCounter {
    fn count(&self) -> u32 {
        self.switches
            .iter()
            .filter(|s| self.switch_ctrl.is_active(s))
            .count() as u32
    }

    fn wait_settled<'a>(
        &'a self,
        debounce: Duration,
    ) -> Pin<Box<dyn Future<Output = u32> + Send + 'a>> {
        Box::pin(async move {
            self.wait_for_any_switch_change().await;
            loop {
                tokio::select! {
                    biased;
                    _ = self.wait_for_any_switch_change() => continue,
                    outcome = self.delay.wait("settle", debounce) => {
                        if outcome == DelayOutcome::Elapsed {
                            return self.count();
                        }
                    }
                }
            }
        })
    }
}

/// A single entrance beam. Cannot observe the device's true contents, only
/// that a ball crossed the beam; keeps an inferred count capped at
/// `capacity` (degraded invariant for entrance-counted devices).
pub struct EntranceSwitchCounter {
    switch: String,
    switch_ctrl: Arc<dyn SwitchController>,
    capacity: u32,
    inferred: AtomicU32,
    delay: DelayManager,
}

impl EntranceSwitchCounter {
    pub fn new(switch: String, switch_ctrl: Arc<dyn SwitchController>, capacity: u32) -> Self {
        Self {
            switch,
            switch_ctrl,
            capacity,
            inferred: AtomicU32::new(0),
            delay: DelayManager::new(),
        }
    }

    /// Manually adjust the inferred count (e.g. after a confirmed eject
    /// reduces contents by one), capped to `[0, capacity]`.
    pub fn adjust(&self, delta: i64) {
        let _ = self.inferred.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
            let updated = (current as i64 + delta).clamp(0, self.capacity as i64);
            Some(updated as u32)
        });
    }

    pub fn set_count(&self, value: u32) {
        self.inferred.store(value.min(self.capacity), Ordering::SeqCst);
    }
}

impl Counter for EntranceSwitchCounter {
    fn count(&self) -> u32 {
        self.inferred.load(Ordering::SeqCst)
    }

    fn wait_settled<'a>(
        &'a self,
        debounce: Duration,
    ) -> Pin<Box<dyn Future<Output = u32> + Send + 'a>> {
        Box::pin(async move {
            self.switch_ctrl.wait_for_change(&self.switch).await;
            loop {
                tokio::select! {
                    biased;
                    _ = self.switch_ctrl.wait_for_change(&self.switch) => continue,
                    outcome = self.delay.wait("settle", debounce) => {
                        if outcome == DelayOutcome::Elapsed {
                            self.adjust(1);
                            return self.count();
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::sim::SimSwitches;

    #[tokio::test(start_paused = true)]
    async fn switch_counter_reflects_active_switches() {
        let switches = Arc::new(SimSwitches::new());
        let counter = SwitchCounter::new(
            vec!["s1".into(), "s2".into(), "s3".into()],
            switches.clone(),
        );
        assert_eq!(counter.count(), 0);

        switches.set("s1", true);
        switches.set("s3", true);
        assert_eq!(counter.count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_counter_settles_after_debounce() {
        let switches = Arc::new(SimSwitches::new());
        let counter = SwitchCounter::new(vec!["s1".into()], switches.clone());

        let settle = counter.wait_settled(Duration::from_millis(50));
        tokio::pin!(settle);

        tokio::select! {
            _ = &mut settle => panic!("should not settle before the switch changes"),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }

        switches.set("s1", true);
        let count = settle.await;
        assert_eq!(count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn entrance_counter_infers_and_caps_at_capacity() {
        let switches = Arc::new(SimSwitches::new());
        let counter = EntranceSwitchCounter::new("beam".into(), switches.clone(), 1);
        assert_eq!(counter.count(), 0);

        let settle = counter.wait_settled(Duration::from_millis(10));
        tokio::pin!(settle);
        switches.set("beam", true);
        let count = (&mut settle).await;
        assert_eq!(count, 1);

        counter.adjust(5);
        assert_eq!(counter.count(), 1, "inferred count must cap at capacity");
    }
}
