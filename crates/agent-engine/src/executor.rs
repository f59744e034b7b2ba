//! Job Executor (C4): runs one accepted job end-to-end — path resolution,
//! driver invocation, coalesced progress reporting, and finalization.

use std::path::{Path, PathBuf};
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};
use transcode_agent_core::domain::{JobSpec, JobStatus, ProgressSample, PROGRESS_CHANNEL_CAPACITY, PROGRESS_REPORT_INTERVAL};
use transcode_agent_core::wire::{JobMetrics, JobResultPayload, JobStatusPayload};

use crate::cancel::CancellationToken;
use crate::driver::Driver;
use crate::error::AgentError;
use crate::orchestrator::OrchestratorClient;
use crate::slot::JobSlot;

pub struct JobExecutor {
    driver: Driver,
    orchestrator: OrchestratorClient,
    nas_mount_path: PathBuf,
    temp_dir: PathBuf,
    worker_id: String,
}

impl JobExecutor {
    pub fn new(driver: Driver, orchestrator: OrchestratorClient, nas_mount_path: PathBuf, temp_dir: PathBuf, worker_id: String) -> Self {
        Self { driver, orchestrator, nas_mount_path, temp_dir, worker_id }
    }

    /// Drives `job` to a terminal state, finalizes it with the orchestrator,
    /// and clears `slot` regardless of outcome. Intended to be spawned as an
    /// independent task by the Sync Controller so ticks keep flowing.
    pub async fn run(&self, job: JobSpec, cancel: CancellationToken, slot: JobSlot) {
        let start = Instant::now();
        info!(job_id = %job.job_id, "job accepted");

        let result = self.run_inner(&job, cancel).await;
        let total_time_ms = start.elapsed().as_millis() as u64;

        let payload = match result {
            Ok(manifest_url) => {
                info!(job_id = %job.job_id, elapsed_ms = total_time_ms, "job completed");
                JobResultPayload {
                    status: JobStatus::Completed,
                    manifest_url,
                    error_msg: None,
                    metrics: JobMetrics { total_time_ms },
                }
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "job failed");
                JobResultPayload {
                    status: JobStatus::Failed,
                    manifest_url: None,
                    error_msg: Some(e.to_string()),
                    metrics: JobMetrics { total_time_ms },
                }
            }
        };

        if let Err(e) = self.orchestrator.finalize(&job.job_id, &payload).await {
            warn!(job_id = %job.job_id, error = %e, "failed to finalize job with orchestrator");
        }

        slot.clear().await;
    }

    async fn run_inner(&self, job: &JobSpec, cancel: CancellationToken) -> Result<Option<String>, AgentError> {
        let input_path = resolve_path(&self.nas_mount_path, &job.input.source_url);
        if !input_path.is_file() {
            return Err(AgentError::InputUnusable(format!("input file does not exist: {}", input_path.display())));
        }

        let dest_dirs: Vec<PathBuf> =
            job.outputs.iter().map(|r| resolve_path(&self.nas_mount_path, &r.dest_path)).collect();
        for dir in &dest_dirs {
            std::fs::create_dir_all(dir)
                .map_err(|e| AgentError::CommitFailed(format!("cannot pre-create {}: {e}", dir.display())))?;
        }

        let (progress_tx, progress_rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let reporter = self.spawn_reporter(job.job_id.clone(), progress_rx);

        let result = self.driver.execute(job, &input_path, &dest_dirs, &self.temp_dir, cancel, progress_tx).await;

        reporter.await;

        result?;

        Ok(job.outputs.first().map(|first| build_manifest_url(&first.dest_path, job.hls_settings.playlist_name())))
    }

    /// Coalesces a burst of progress samples into at most one status update
    /// every [`PROGRESS_REPORT_INTERVAL`]. Exits once the channel closes,
    /// which happens after the driver returns, flushing any final sample.
    fn spawn_reporter(&self, job_id: String, mut rx: mpsc::Receiver<ProgressSample>) -> tokio::task::JoinHandle<()> {
        let orchestrator = self.orchestrator.clone();
        let worker_id = self.worker_id.clone();
        tokio::spawn(async move {
            let mut latest: Option<ProgressSample> = None;
            let mut ticker = interval(PROGRESS_REPORT_INTERVAL);
            ticker.tick().await; // first tick fires immediately; consume it

            loop {
                tokio::select! {
                    sample = rx.recv() => {
                        match sample {
                            Some(sample) => latest = Some(sample),
                            None => break,
                        }
                    }
                    _ = ticker.tick() => {
                        if let Some(sample) = latest.take() {
                            if sample.percent > 0.0 {
                                report(&orchestrator, &worker_id, &job_id, sample).await;
                            }
                        }
                    }
                }
            }
            if let Some(sample) = latest.take() {
                report(&orchestrator, &worker_id, &job_id, sample).await;
            }
        })
    }
}

async fn report(orchestrator: &OrchestratorClient, worker_id: &str, job_id: &str, sample: ProgressSample) {
    let payload = JobStatusPayload {
        worker_id: worker_id.to_string(),
        status: JobStatus::Processing,
        progress: sample.percent,
        current_fps: sample.fps,
        eta_sec: sample.eta_seconds,
    };
    if let Err(e) = orchestrator.update_status(job_id, &payload).await {
        warn!(job_id, error = %e, "failed to report progress");
    }
}

/// Builds the orchestrator-facing manifest URL from the job's own (relative)
/// `dest_path`, never the resolved absolute staging/commit path — the
/// worker's host filesystem mount must not leak into it.
fn build_manifest_url(dest_path: &str, playlist_name: &str) -> String {
    format!("/{}/{}", dest_path.trim_matches('/'), playlist_name)
}

/// Resolves a job-supplied path against the shared-store mount: absolute
/// paths pass through unchanged, relative paths are joined and normalized
/// without touching the filesystem (the target may not exist yet).
fn resolve_path(mount: &Path, raw: &str) -> PathBuf {
    let candidate = Path::new(raw);
    if candidate.is_absolute() {
        return normalize(candidate);
    }
    normalize(&mount.join(raw.trim_start_matches('/')))
}

fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_url_uses_relative_dest_path_not_absolute_mount() {
        let url = build_manifest_url("shows/x", "index.m3u8");
        assert_eq!(url, "/shows/x/index.m3u8");
    }

    #[test]
    fn manifest_url_collapses_leading_slash_in_dest_path() {
        let url = build_manifest_url("/shows/x", "index.m3u8");
        assert_eq!(url, "/shows/x/index.m3u8");
    }

    #[test]
    fn absolute_paths_pass_through() {
        let resolved = resolve_path(Path::new("/mnt/nas"), "/abs/path.mkv");
        assert_eq!(resolved, PathBuf::from("/abs/path.mkv"));
    }

    #[test]
    fn relative_paths_join_the_mount() {
        let resolved = resolve_path(Path::new("/mnt/nas"), "movies/a.mkv");
        assert_eq!(resolved, PathBuf::from("/mnt/nas/movies/a.mkv"));
    }

    #[test]
    fn dot_dot_segments_are_collapsed() {
        let resolved = resolve_path(Path::new("/mnt/nas"), "movies/../shows/a.mkv");
        assert_eq!(resolved, PathBuf::from("/mnt/nas/shows/a.mkv"));
    }

    #[test]
    fn leading_separator_on_relative_path_does_not_escape_mount() {
        let resolved = resolve_path(Path::new("/mnt/nas"), "/movies/a.mkv");
        // An explicit absolute path is honored as absolute per spec; this
        // documents that behavior rather than silently rooting it at mount.
        assert_eq!(resolved, PathBuf::from("/movies/a.mkv"));
    }
}
