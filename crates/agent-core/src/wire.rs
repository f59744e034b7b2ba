//! JSON shapes exchanged with the orchestrator. Field names are already
//! lower_snake_case so no `rename_all` is needed; enums carry their own.

use serde::{Deserialize, Serialize};

use crate::domain::{Capabilities, HostLoadSnapshot, JobSpec, JobStatus, WorkerId, WorkerStatus};

#[derive(Debug, Clone, Serialize)]
pub struct RegistrationPayload {
    pub worker_id: WorkerId,
    pub capabilities: Capabilities,
}

#[derive(Debug, Clone, Serialize)]
pub struct HardwareStats {
    pub cpu_percent: f32,
    pub ram_percent: f32,
    pub is_busy: bool,
}

impl From<HostLoadSnapshot> for HardwareStats {
    fn from(s: HostLoadSnapshot) -> Self {
        Self { cpu_percent: s.cpu_percent, ram_percent: s.ram_percent, is_busy: s.is_busy() }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPayload {
    pub worker_id: WorkerId,
    pub status: WorkerStatus,
    pub hardware_stats: HardwareStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_job_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SyncResponse {
    pub ack: bool,
    #[serde(default)]
    pub assigned_job: Option<JobSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatusPayload {
    pub worker_id: WorkerId,
    pub status: JobStatus,
    pub progress: f64,
    pub current_fps: f64,
    pub eta_sec: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobMetrics {
    pub total_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResultPayload {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_msg: Option<String>,
    pub metrics: JobMetrics,
}

/// Returned on non-2xx responses that carry a structured body (e.g. 400).
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}
