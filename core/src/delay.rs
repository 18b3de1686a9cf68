//! Named, cancellable one-shot delays, backed by real `tokio::time`.
//!
//! MPF's `DelayManager` lets a device schedule a callback under a name and
//! re-arm or cancel it by that same name (e.g. `"ball_missing"`,
//! `"eject_confirm"`). We give device driver loops the same shape without a
//! callback registry: `wait(name, duration)` returns a future the driver
//! loop selects on, and `cancel(name)` makes any outstanding `wait` for that
//! name resolve to `Cancelled` instead of `Elapsed`.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::watch;
use tokio::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayOutcome {
    Elapsed,
    Cancelled,
}

/// One device's set of named delays. Not `Clone` — owned by a single
/// driver loop.
pub struct DelayManager {
    generations: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl Default for DelayManager {
    fn default() -> Self {
        Self::new()
    }
}

impl DelayManager {
    pub fn new() -> Self {
        Self {
            generations: Mutex::new(HashMap::new()),
        }
    }

    /// Arm (or re-arm) a named delay for `duration` and wait for it.
    /// Re-arming the same name while a previous wait is outstanding cancels
    /// that previous wait.
    pub async fn wait(&self, name: &str, duration: Duration) -> DelayOutcome {
        let mut rx = {
            let mut generations = self.generations.lock().unwrap();
            let tx = generations
                .entry(name.to_string())
                .or_insert_with(|| watch::channel(0).0);
            tx.send_modify(|g| *g += 1);
            tx.subscribe()
        };
        let my_generation = *rx.borrow();

        tokio::select! {
            _ = tokio::time::sleep(duration) => DelayOutcome::Elapsed,
            result = async {
                loop {
                    if rx.changed().await.is_err() {
                        return DelayOutcome::Cancelled;
                    }
                    if *rx.borrow() != my_generation {
                        return DelayOutcome::Cancelled;
                    }
                }
            } => result,
        }
    }

    /// Cancel a named delay. Any in-flight `wait` for that name resolves to
    /// `Cancelled` on its next poll. A no-op if nothing is armed under
    /// `name`.
    pub fn cancel(&self, name: &str) {
        if let Some(tx) = self.generations.lock().unwrap().get(name) {
            tx.send_modify(|g| *g += 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn elapses_after_duration() {
        let mgr = DelayManager::new();
        let outcome = mgr.wait("x", Duration::from_millis(100)).await;
        assert_eq!(outcome, DelayOutcome::Elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_cancels_previous_wait() {
        let mgr = DelayManager::new();
        tokio::select! {
            _ = mgr.wait("x", Duration::from_secs(10)) => panic!("should not resolve first"),
            _ = async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                mgr.wait("x", Duration::from_millis(50)).await
            } => {}
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_resolves_outstanding_wait() {
        let mgr = DelayManager::new();
        let wait_fut = mgr.wait("x", Duration::from_secs(10));
        tokio::pin!(wait_fut);

        tokio::select! {
            outcome = &mut wait_fut => {
                assert_eq!(outcome, DelayOutcome::Cancelled);
            }
            _ = async {
                tokio::time::sleep(Duration::from_millis(1)).await;
                mgr.cancel("x");
                tokio::time::sleep(Duration::from_secs(20)).await;
            } => panic!("cancel should have resolved the wait first"),
        }
    }
}
