//! Scaling policy.
//!
//! Pure decision logic over a point-in-time load snapshot. Nothing here
//! touches the store or the cloud.

use rffmpeg_core::FallbackConfig;
use rffmpeg_state::Host;

/// Transcode load on one registered worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLoad {
    pub host: Host,
    pub transcodes: usize,
}

impl WorkerLoad {
    pub fn is_idle(&self) -> bool {
        self.transcodes == 0
    }

    /// A worker at exactly `jobs_per_worker` transcodes still counts as
    /// having room.
    pub fn has_room(&self, jobs_per_worker: u32) -> bool {
        self.transcodes <= jobs_per_worker as usize
    }
}

/// Load observed at the start of a cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSnapshot {
    pub fallback_transcodes: usize,
    pub workers: Vec<WorkerLoad>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Provision one worker.
    ScaleUp,
    /// Tear down these idle workers.
    ScaleDown(Vec<Host>),
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalingPolicy {
    pub jobs_per_worker: u32,
}

impl ScalingPolicy {
    pub fn new(jobs_per_worker: u32) -> Self {
        Self { jobs_per_worker }
    }

    pub fn from_config(fallback: &FallbackConfig) -> Self {
        Self::new(fallback.jobs_per_worker)
    }

    /// Backlog on the fallback with no worker able to take it adds a worker.
    /// Backlog with room somewhere changes nothing. An idle fallback retires
    /// every idle worker.
    pub fn decide(&self, snapshot: &LoadSnapshot) -> ScaleDecision {
        if snapshot.fallback_transcodes > 0 {
            let room = snapshot
                .workers
                .iter()
                .any(|w| w.has_room(self.jobs_per_worker));
            return if room {
                ScaleDecision::NoChange
            } else {
                ScaleDecision::ScaleUp
            };
        }

        let idle: Vec<Host> = snapshot
            .workers
            .iter()
            .filter(|w| w.is_idle())
            .map(|w| w.host.clone())
            .collect();
        if idle.is_empty() {
            ScaleDecision::NoChange
        } else {
            ScaleDecision::ScaleDown(idle)
        }
    }
}
