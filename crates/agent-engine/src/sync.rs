//! Sync Controller (C5): the periodic loop that ties host load, the
//! current-job slot, and the orchestrator together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};
use transcode_agent_core::domain::{Capabilities, WorkerStatus};
use transcode_agent_core::wire::{HardwareStats, SyncPayload};

use crate::error::AgentError;
use crate::executor::JobExecutor;
use crate::orchestrator::OrchestratorClient;
use crate::probe;
use crate::slot::JobSlot;

const LOAD_SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SyncController {
    orchestrator: OrchestratorClient,
    executor: Arc<JobExecutor>,
    slot: JobSlot,
    worker_id: String,
    sync_interval: Duration,
}

impl SyncController {
    pub fn new(orchestrator: OrchestratorClient, executor: Arc<JobExecutor>, slot: JobSlot, worker_id: String, sync_interval: Duration) -> Self {
        Self { orchestrator, executor, slot, worker_id, sync_interval }
    }

    /// Runs until `stop_rx` carries `true`. Each tick is independent: a
    /// failure logs and waits for the next tick rather than aborting the
    /// loop.
    pub async fn run(self: Arc<Self>, mut stop_rx: watch::Receiver<bool>, capabilities: Capabilities) {
        let mut ticker = interval(self.sync_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&capabilities).await;
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                }
            }
        }
    }

    /// One best-effort final sync reporting OFFLINE, used during shutdown.
    pub async fn sync_offline(&self) {
        let payload = SyncPayload {
            worker_id: self.worker_id.clone(),
            status: WorkerStatus::Offline,
            hardware_stats: HardwareStats { cpu_percent: 0.0, ram_percent: 0.0, is_busy: false },
            current_job_id: None,
        };
        if let Err(e) = self.orchestrator.sync(&payload).await {
            warn!(error = %e, "final offline sync failed, ignoring");
        }
    }

    async fn tick(&self, capabilities: &Capabilities) {
        let snapshot = match timeout(LOAD_SNAPSHOT_TIMEOUT, tokio::task::spawn_blocking(probe::snapshot_load)).await {
            Ok(Ok(Ok(snapshot))) => snapshot,
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "host load snapshot failed, skipping tick");
                return;
            }
            Ok(Err(e)) => {
                warn!(error = %e, "host load probe task panicked, skipping tick");
                return;
            }
            Err(_) => {
                warn!("host load snapshot timed out, skipping tick");
                return;
            }
        };

        let occupied = self.slot.is_occupied().await;
        let status = if occupied || snapshot.is_busy() { WorkerStatus::Busy } else { WorkerStatus::Idle };
        let current_job_id = self.slot.current_job_id().await;

        let payload = SyncPayload {
            worker_id: self.worker_id.clone(),
            status,
            hardware_stats: snapshot.into(),
            current_job_id,
        };

        debug!(?status, "sync tick");
        match self.orchestrator.sync(&payload).await {
            Ok(resp) => {
                if let Some(job) = resp.assigned_job {
                    self.try_accept(job).await;
                }
            }
            Err(AgentError::OrchestratorStateLoss) => {
                self.recover_from_state_loss(capabilities, &payload).await;
            }
            Err(e) => {
                warn!(error = %e, "sync tick failed");
            }
        }
    }

    async fn recover_from_state_loss(&self, capabilities: &Capabilities, payload: &SyncPayload) {
        warn!("orchestrator reports unknown worker, re-registering");
        if let Err(e) = self.orchestrator.register(capabilities).await {
            error!(error = %e, "re-registration failed");
            return;
        }
        match self.orchestrator.sync(payload).await {
            Ok(resp) => {
                if let Some(job) = resp.assigned_job {
                    self.try_accept(job).await;
                }
            }
            Err(e) => warn!(error = %e, "sync retry after re-registration failed"),
        }
    }

    async fn try_accept(&self, job: transcode_agent_core::domain::JobSpec) {
        let job_id = job.job_id.clone();
        match self.slot.try_occupy(job.clone()).await {
            Some(cancel) => {
                info!(job_id, "accepted job assignment");
                let executor = self.executor.clone();
                let slot = self.slot.clone();
                let handle = tokio::spawn(async move {
                    executor.run(job, cancel, slot).await;
                });
                self.slot.set_task(handle).await;
            }
            None => {
                warn!(job_id, "rejecting assignment: current-job slot already occupied");
            }
        }
    }
}
