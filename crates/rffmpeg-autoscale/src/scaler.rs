//! Autoscaler: one evaluate-then-act cycle.
//!
//! Reads the fallback's and every worker's transcode count from the
//! inventory, applies the [`ScalingPolicy`], and performs the resulting
//! action through the worker lifecycle. Read failures abort the cycle
//! before any action; action failures are logged and reported in the
//! [`CycleOutcome`], never propagated.

use std::collections::HashSet;
use std::sync::Arc;

use rffmpeg_cloud::WorkerLifecycle;
use rffmpeg_state::{Host, HostId, Inventory, StateResult};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::policy::{LoadSnapshot, ScaleDecision, ScalingPolicy, WorkerLoad};

/// What a single cycle did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The load snapshot could not be read; nothing was attempted.
    Skipped { reason: String },
    NoChange,
    ScaledUp { servername: String },
    ScaleUpFailed { reason: String },
    /// Servernames, sorted, of the workers torn down and of those whose
    /// teardown failed.
    ScaledDown {
        deleted: Vec<String>,
        failed: Vec<String>,
    },
}

pub struct Autoscaler {
    inventory: Inventory,
    lifecycle: Arc<dyn WorkerLifecycle>,
    policy: ScalingPolicy,
    teardown_permits: Arc<Semaphore>,
}

impl Autoscaler {
    /// `max_concurrent_teardowns` bounds how many deletions run at once
    /// within a cycle. Zero is treated as one.
    pub fn new(
        inventory: Inventory,
        lifecycle: Arc<dyn WorkerLifecycle>,
        policy: ScalingPolicy,
        max_concurrent_teardowns: usize,
    ) -> Self {
        Self {
            inventory,
            lifecycle,
            policy,
            teardown_permits: Arc::new(Semaphore::new(max_concurrent_teardowns.max(1))),
        }
    }

    pub fn policy(&self) -> ScalingPolicy {
        self.policy
    }

    /// Read current load. Each query runs on its own; there is no
    /// cross-query consistency.
    pub async fn snapshot(&self) -> StateResult<LoadSnapshot> {
        let host_count = self.inventory.number_of_hosts().await?;
        let fallback_transcodes = self.inventory.transcodes_on(HostId::FALLBACK).await?;

        let mut workers = Vec::new();
        if host_count > 0 {
            for host in self.inventory.hosts().await? {
                let Some(id) = host.id else {
                    warn!(servername = %host.servername, "host row without id, ignoring");
                    continue;
                };
                let transcodes = self.inventory.transcodes_on(id).await?;
                workers.push(WorkerLoad { host, transcodes });
            }
        }

        debug!(
            hosts = host_count,
            fallback_transcodes,
            "load snapshot taken"
        );
        Ok(LoadSnapshot {
            fallback_transcodes,
            workers,
        })
    }

    /// Evaluate once and act on the decision.
    ///
    /// Returns after every action started by this cycle has finished,
    /// including all teardowns.
    pub async fn run_cycle(&self) -> CycleOutcome {
        let snapshot = match self.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(error = %e, "failed to read load, skipping cycle");
                return CycleOutcome::Skipped {
                    reason: e.to_string(),
                };
            }
        };

        match self.policy.decide(&snapshot) {
            ScaleDecision::NoChange => {
                debug!(
                    fallback_transcodes = snapshot.fallback_transcodes,
                    workers = snapshot.workers.len(),
                    "no scaling needed"
                );
                CycleOutcome::NoChange
            }
            ScaleDecision::ScaleUp => self.scale_up(&snapshot).await,
            ScaleDecision::ScaleDown(idle) => self.scale_down(idle).await,
        }
    }

    async fn scale_up(&self, snapshot: &LoadSnapshot) -> CycleOutcome {
        info!(
            fallback_transcodes = snapshot.fallback_transcodes,
            workers = snapshot.workers.len(),
            jobs_per_worker = self.policy.jobs_per_worker,
            "scaling up"
        );
        match self.lifecycle.create_worker().await {
            Ok(host) => CycleOutcome::ScaledUp {
                servername: host.servername,
            },
            Err(e) => {
                warn!(error = %e, "worker creation failed");
                CycleOutcome::ScaleUpFailed {
                    reason: e.to_string(),
                }
            }
        }
    }

    /// Tear every host down concurrently, at most `max_concurrent_teardowns`
    /// at a time, and wait for all of them.
    async fn scale_down(&self, idle: Vec<Host>) -> CycleOutcome {
        info!(idle = idle.len(), "scaling down");

        let mut tasks = JoinSet::new();
        let mut outstanding = HashSet::new();
        for host in idle {
            let lifecycle = self.lifecycle.clone();
            let permits = self.teardown_permits.clone();
            outstanding.insert(host.servername.clone());
            tasks.spawn(async move {
                // The semaphore is never closed.
                let _permit = permits.acquire_owned().await;
                let result = lifecycle.delete_worker(&host).await;
                (host.servername, result)
            });
        }

        let mut deleted = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((servername, Ok(()))) => {
                    outstanding.remove(&servername);
                    deleted.push(servername);
                }
                Ok((servername, Err(e))) => {
                    outstanding.remove(&servername);
                    warn!(%servername, error = %e, "worker teardown failed");
                    failed.push(servername);
                }
                Err(e) => error!(error = %e, "worker teardown task aborted"),
            }
        }
        // Whatever did not report back panicked.
        failed.extend(outstanding);

        deleted.sort();
        failed.sort();
        CycleOutcome::ScaledDown { deleted, failed }
    }
}
