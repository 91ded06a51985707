//! Control loop and shutdown coordination.
//!
//! Two states, carried on a watch channel:
//!
//! ```text
//!   Running ──drain()──▶ Draining ──in-flight cycle done──▶ stopped
//! ```
//!
//! The state is checked before every cycle. A cycle that has started is
//! never cancelled: draining only prevents the next one from starting, so
//! `drain()` returns once the current cycle (and its teardowns) finish.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use crate::scaler::{Autoscaler, CycleOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Draining,
}

pub struct ControlLoop {
    autoscaler: Autoscaler,
    interval: Duration,
}

impl ControlLoop {
    pub fn new(autoscaler: Autoscaler, interval: Duration) -> Self {
        Self {
            autoscaler,
            interval,
        }
    }

    /// Start the loop on its own task. The first cycle runs immediately.
    pub fn spawn(self) -> ControlHandle {
        let (state, watcher) = watch::channel(LoopState::Running);
        let task = tokio::spawn(self.run(watcher));
        ControlHandle { state, task }
    }

    /// Run cycles until `state` turns to [`LoopState::Draining`] or its
    /// sender is dropped. Returns the number of completed cycles.
    pub async fn run(self, mut state: watch::Receiver<LoopState>) -> u64 {
        info!(interval = ?self.interval, "control loop started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut cycles = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = state.wait_for(|s| *s == LoopState::Draining) => break,
                _ = ticker.tick() => {}
            }

            let outcome = self.autoscaler.run_cycle().await;
            cycles += 1;
            log_outcome(cycles, &outcome);
        }

        info!(cycles, "control loop drained");
        cycles
    }
}

fn log_outcome(cycle: u64, outcome: &CycleOutcome) {
    match outcome {
        CycleOutcome::Skipped { reason } => warn!(cycle, %reason, "cycle skipped"),
        CycleOutcome::NoChange => info!(cycle, "cycle complete, no change"),
        CycleOutcome::ScaledUp { servername } => {
            info!(cycle, %servername, "cycle complete, worker added")
        }
        CycleOutcome::ScaleUpFailed { reason } => {
            warn!(cycle, %reason, "cycle complete, scale up failed")
        }
        CycleOutcome::ScaledDown { deleted, failed } => info!(
            cycle,
            deleted = deleted.len(),
            failed = failed.len(),
            "cycle complete, workers retired"
        ),
    }
}

/// Owner's side of a spawned [`ControlLoop`].
pub struct ControlHandle {
    state: watch::Sender<LoopState>,
    task: JoinHandle<u64>,
}

impl ControlHandle {
    pub fn state(&self) -> LoopState {
        *self.state.borrow()
    }

    /// Stop scheduling cycles and wait for the in-flight one to finish.
    /// Returns how many cycles completed.
    pub async fn drain(self) -> Result<u64, JoinError> {
        self.state.send_replace(LoopState::Draining);
        info!("draining control loop");
        self.task.await
    }
}
