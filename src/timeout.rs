use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Where the guard stands within one activation cycle.
///
/// `Armed` is entered on activation when a positive timeout is configured.
/// A real push while armed leads to `Disarmed`; the deadline elapsing first
/// leads to `Fired`, which produces exactly one synthetic error push.  A
/// fired guard stays fired for the rest of that cycle and only rearms on
/// the next activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GuardState {
    Unarmed,
    Armed { cycle: u64 },
    Fired { cycle: u64 },
    Disarmed,
}

/// One-shot fallback timer owned by a store.
///
/// All transitions happen under the owning store's state lock; the spawned
/// timer task only ever reenters the store through the closure it was armed
/// with, which revalidates the cycle before anything fires.
#[derive(Debug)]
pub(crate) struct TimeoutGuard {
    state: GuardState,
    timer: Option<JoinHandle<()>>,
    limit: Option<Duration>,
    runtime: Option<Handle>,
}

impl TimeoutGuard {
    /// `limit` is the normalized timeout; a guard without one (or without a
    /// runtime to spawn its timer on) never arms.
    pub(crate) fn new(limit: Option<Duration>, runtime: Option<Handle>) -> Self {
        Self {
            state: GuardState::Unarmed,
            timer: None,
            limit,
            runtime,
        }
    }

    pub(crate) fn limit(&self) -> Option<Duration> {
        self.limit
    }

    /// Arm for the given activation cycle.  `on_fire` runs on the timer
    /// task once the deadline elapses; it must route back into the store,
    /// which decides through [`try_fire`](Self::try_fire) whether the
    /// deadline still matters.
    pub(crate) fn arm<F>(&mut self, cycle: u64, on_fire: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let (limit, runtime) = match (self.limit, &self.runtime) {
            (Some(limit), Some(runtime)) => (limit, runtime.clone()),
            _ => return,
        };
        self.abort_timer();
        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(limit).await;
            on_fire();
        }));
        self.state = GuardState::Armed { cycle };
    }

    /// Transition `Armed -> Fired` if the deadline still belongs to the
    /// current cycle.  Returns whether the synthetic error push should
    /// happen.
    pub(crate) fn try_fire(&mut self, cycle: u64) -> bool {
        match self.state {
            GuardState::Armed { cycle: armed } if armed == cycle => {
                self.state = GuardState::Fired { cycle };
                self.timer = None;
                true
            }
            _ => false,
        }
    }

    /// A real push arrived while armed: cancel the timer, no synthetic
    /// push.  Fired and unarmed guards are left as they are.
    pub(crate) fn disarm(&mut self) {
        if matches!(self.state, GuardState::Armed { .. }) {
            self.abort_timer();
            self.state = GuardState::Disarmed;
        }
    }

    /// The activation ended: cancel any timer silently and reset so the
    /// next activation can arm again.
    pub(crate) fn deactivate(&mut self) {
        self.abort_timer();
        self.state = GuardState::Unarmed;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> GuardState {
        self.state
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for TimeoutGuard {
    fn drop(&mut self) {
        self.abort_timer();
    }
}
