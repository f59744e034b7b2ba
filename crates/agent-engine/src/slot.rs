//! The current-job slot: the single piece of shared mutable state in the
//! agent. At most one occupant at any instant; held only for O(1) ops,
//! never across I/O.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use transcode_agent_core::domain::JobSpec;

use crate::cancel::CancellationToken;

struct Occupant {
    job: JobSpec,
    cancel: CancellationToken,
    started_at: Instant,
}

#[derive(Clone)]
pub struct JobSlot {
    inner: Arc<Mutex<Option<Occupant>>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl JobSlot {
    pub fn empty() -> Self {
        Self { inner: Arc::new(Mutex::new(None)), task: Arc::new(Mutex::new(None)) }
    }

    /// Records the handle of the task running the current occupant, so a
    /// shutdown path can await it before the job's terminal `Finalize` call
    /// is guaranteed to have been sent.
    pub async fn set_task(&self, handle: JoinHandle<()>) {
        *self.task.lock().await = Some(handle);
    }

    /// Awaits the most recently tracked job task, if one is still running.
    /// A no-op if the slot never held a task or it already finished and was
    /// taken by a prior call.
    pub async fn join_current(&self) {
        let handle = self.task.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Returns the cancellation token for the new occupant, or `None` if the
    /// slot was already occupied (the invariant wins over any caller's
    /// opinion about whether it should accept work).
    pub async fn try_occupy(&self, job: JobSpec) -> Option<CancellationToken> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return None;
        }
        let cancel = CancellationToken::new();
        *guard = Some(Occupant { job, cancel: cancel.clone(), started_at: Instant::now() });
        Some(cancel)
    }

    pub async fn current_job_id(&self) -> Option<String> {
        self.inner.lock().await.as_ref().map(|o| o.job.job_id.clone())
    }

    pub async fn is_occupied(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn elapsed(&self) -> Option<std::time::Duration> {
        self.inner.lock().await.as_ref().map(|o| o.started_at.elapsed())
    }

    pub async fn cancel_current(&self) {
        if let Some(occupant) = self.inner.lock().await.as_ref() {
            occupant.cancel.cancel();
        }
    }

    pub async fn clear(&self) {
        *self.inner.lock().await = None;
    }
}

impl Default for JobSlot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use transcode_agent_core::domain::{HlsSettings, JobInput};

    fn sample_job(id: &str) -> JobSpec {
        JobSpec {
            job_id: id.into(),
            input: JobInput { source_url: "in.mkv".into() },
            outputs: vec![],
            hls_settings: HlsSettings { master_playlist_name: None, segment_time: None },
            audio_config: None,
        }
    }

    #[tokio::test]
    async fn second_occupant_is_rejected() {
        let slot = JobSlot::empty();
        let first = slot.try_occupy(sample_job("a")).await;
        assert!(first.is_some());
        let second = slot.try_occupy(sample_job("b")).await;
        assert!(second.is_none());
        assert_eq!(slot.current_job_id().await, Some("a".into()));
    }

    #[tokio::test]
    async fn clearing_frees_the_slot() {
        let slot = JobSlot::empty();
        slot.try_occupy(sample_job("a")).await;
        slot.clear().await;
        assert!(!slot.is_occupied().await);
        let second = slot.try_occupy(sample_job("b")).await;
        assert!(second.is_some());
    }

    #[tokio::test]
    async fn cancel_current_wakes_cancelled_future() {
        let slot = JobSlot::empty();
        let cancel = slot.try_occupy(sample_job("a")).await.unwrap();
        slot.cancel_current().await;
        cancel.cancelled().await;
        assert!(cancel.is_cancelled());
    }
}
