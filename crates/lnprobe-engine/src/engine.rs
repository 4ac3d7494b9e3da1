//! The probe engine: shared state plus the periodic tasks the scheduler
//! drives.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use lnprobe_core::{ExclusionSet, PROBE_AMOUNT_SAT, Probe, Store, StoreError, TargetStore};
use lnprobe_rpc::LightningRpc;
use serde::Serialize;
use tokio::sync::{Semaphore, oneshot};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::lifecycle::{Launch, Lifecycle};
use crate::poller::{self, PollReport};
use crate::scheduler::{Scheduler, Task, TaskOutcome, TaskRunner};
use crate::tracker::PendingTracker;

/// Answer to the `probe-stats` operator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProbeStats {
    pub pending_probes: usize,
    pub exclusions: usize,
    pub temporary_exclusions: usize,
}

pub struct ProbeEngine {
    lifecycle: Arc<Lifecycle>,
    config: EngineConfig,
    dispatch_permits: Arc<Semaphore>,
    exhausted: Arc<AtomicBool>,
}

impl ProbeEngine {
    pub fn new(store: Arc<dyn Store>, rpc: Arc<dyn LightningRpc>, config: EngineConfig) -> Self {
        let lifecycle = Lifecycle::new(
            store,
            rpc,
            Arc::new(ExclusionSet::new()),
            Arc::new(PendingTracker::new()),
            config.exclusion_duration,
        );
        Self {
            lifecycle: Arc::new(lifecycle),
            dispatch_permits: Arc::new(Semaphore::new(config.max_inflight_dispatches.max(1))),
            exhausted: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn lifecycle(&self) -> &Arc<Lifecycle> {
        &self.lifecycle
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// True once a launch found no target left to probe.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> ProbeStats {
        let (exclusions, temporary_exclusions) = self.lifecycle.exclusions().counts();
        ProbeStats {
            pending_probes: self.lifecycle.tracker().len(),
            exclusions,
            temporary_exclusions,
        }
    }

    /// Fill an empty target pool with every node the node knows about.
    /// A pool that already has targets is left alone.
    pub async fn seed_targets(&self) -> anyhow::Result<usize> {
        let existing = self
            .lifecycle
            .with_store(|store| store.count_targets())
            .await?;
        if existing > 0 {
            info!(targets = existing, "target pool already seeded");
            return Ok(0);
        }
        let nodes = self.lifecycle.rpc().list_nodes().await?;
        let seeded = self
            .lifecycle
            .with_store(move |store| store.seed_targets(&nodes))
            .await?;
        info!("will probe {seeded} nodes");
        Ok(seeded)
    }

    pub async fn recover_pending(&self) -> Result<usize, StoreError> {
        let recovered = self.lifecycle.recover_pending().await?;
        if recovered > 0 {
            info!(recovered, "resuming probes left pending");
        }
        Ok(recovered)
    }

    /// Scheduler with the engine's three periodic tasks registered.
    pub fn scheduler(&self) -> Scheduler {
        let mut scheduler = Scheduler::new(self.config.warmup);
        scheduler.schedule(Task::ExpireExclusions, self.config.cleanup_interval);
        scheduler.schedule(Task::Issue, self.config.probe_interval);
        scheduler.schedule(Task::PollPending, self.config.poll_interval);
        scheduler
    }

    /// Issuance tick. Spawns the dispatch so a slow node does not hold up
    /// the scheduler; skipped when too many dispatches are still running.
    pub fn issue(&self) -> TaskOutcome {
        if self.is_exhausted() {
            info!("finished probing with {PROBE_AMOUNT_SAT} sat");
            return TaskOutcome::Retire;
        }

        let Ok(permit) = Arc::clone(&self.dispatch_permits).try_acquire_owned() else {
            warn!(
                max_inflight = self.config.max_inflight_dispatches,
                "dispatch limit reached, skipping issuance tick"
            );
            return TaskOutcome::Reschedule;
        };

        let lifecycle = Arc::clone(&self.lifecycle);
        let exhausted = Arc::clone(&self.exhausted);
        tokio::spawn(async move {
            let _permit = permit;
            match lifecycle.launch(None).await {
                Ok(Launch::Exhausted) => {
                    info!("no targets left to probe");
                    exhausted.store(true, Ordering::SeqCst);
                }
                Ok(Launch::Pending { .. } | Launch::Finished(_)) => {}
                Err(e) => warn!("probe dispatch failed: {e:#}"),
            }
        });
        TaskOutcome::Reschedule
    }

    /// Launch a probe now and wait until it is classified.
    /// `None` when no target is left. Waits for a dispatch slot first, so
    /// on-demand probes count against the same limit as scheduled ones.
    pub async fn probe_now(&self) -> anyhow::Result<Option<Probe>> {
        let permit = Arc::clone(&self.dispatch_permits).acquire_owned().await?;
        let (tx, rx) = oneshot::channel();
        let launch = self.lifecycle.launch(Some(tx)).await;
        drop(permit);
        match launch? {
            Launch::Exhausted => {
                self.exhausted.store(true, Ordering::SeqCst);
                Ok(None)
            }
            Launch::Finished(probe) => Ok(Some(probe)),
            Launch::Pending { probe_id } => {
                debug!(probe_id, "waiting for probe to resolve");
                Ok(Some(rx.await?))
            }
        }
    }

    /// Polling tick: resolve finished probes, then time out stale ones.
    pub async fn poll_pending(&self) -> PollReport {
        let report = poller::poll_pending(&self.lifecycle).await;
        if let Some(timeout) = self.config.pending_timeout {
            self.lifecycle.expire_stale(Utc::now(), timeout).await;
        }
        if report.resolved > 0 || report.errors > 0 {
            debug!(
                resolved = report.resolved,
                pending = report.still_pending,
                errors = report.errors,
                "poll tick"
            );
        }
        report
    }

    /// Cleanup tick. Returns how many temporary exclusions lapsed.
    pub fn expire_exclusions(&self) -> usize {
        let exclusions = self.lifecycle.exclusions();
        let (_, before) = exclusions.counts();
        let removed = exclusions.expire_temporary(Utc::now());
        info!("removed {removed}/{before} temporary exclusions");
        removed
    }
}

#[async_trait]
impl TaskRunner for ProbeEngine {
    async fn run(&self, task: Task) -> anyhow::Result<TaskOutcome> {
        match task {
            Task::Issue => Ok(self.issue()),
            Task::PollPending => {
                self.poll_pending().await;
                Ok(TaskOutcome::Reschedule)
            }
            Task::ExpireExclusions => {
                self.expire_exclusions();
                Ok(TaskOutcome::Reschedule)
            }
        }
    }
}
