//! Orchestrator Client (C2): typed request/response over HTTP with retry,
//! timeout, and state-loss detection.

use std::time::Duration;

use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::sleep;
use tracing::warn;
use transcode_agent_core::wire::{
    ApiErrorBody, JobResultPayload, JobStatusPayload, RegistrationPayload, SyncPayload, SyncResponse,
};
use transcode_agent_core::Capabilities;

use crate::error::{AgentError, Result};

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Timeout for register/sync/finalize calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
/// Timeout for progress-update calls, shorter so a slow orchestrator can't
/// hold a tick open as long as a register/sync/finalize call.
const PROGRESS_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct OrchestratorClient {
    http: reqwest::Client,
    base_url: Url,
    worker_id: String,
}

impl OrchestratorClient {
    pub fn new(http: reqwest::Client, base_url: Url, worker_id: String) -> Self {
        Self { http, base_url, worker_id }
    }

    pub async fn register(&self, capabilities: &Capabilities) -> Result<()> {
        let payload = RegistrationPayload { worker_id: self.worker_id.clone(), capabilities: capabilities.clone() };
        self.request_json::<_, serde_json::Value>(Method::POST, "/api/v1/workers/register", Some(&payload), REQUEST_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn sync(&self, payload: &SyncPayload) -> Result<SyncResponse> {
        self.request_json(Method::POST, "/api/v1/workers/sync", Some(payload), REQUEST_TIMEOUT).await
    }

    pub async fn update_status(&self, job_id: &str, payload: &JobStatusPayload) -> Result<()> {
        let path = format!("/api/v1/jobs/{job_id}");
        self.request_json::<_, serde_json::Value>(Method::PATCH, &path, Some(payload), PROGRESS_TIMEOUT).await?;
        Ok(())
    }

    pub async fn finalize(&self, job_id: &str, payload: &JobResultPayload) -> Result<()> {
        let path = format!("/api/v1/jobs/{job_id}/finalize");
        self.request_json::<_, serde_json::Value>(Method::POST, &path, Some(payload), REQUEST_TIMEOUT).await?;
        Ok(())
    }

    async fn request_json<B: Serialize, T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        timeout: Duration,
    ) -> Result<T> {
        let url = self.base_url.join(path).map_err(|e| AgentError::BadStatus {
            status: 0,
            body: format!("invalid path {path}: {e}"),
        })?;
        let body_bytes = match body {
            Some(b) => Some(serde_json::to_vec(b).map_err(|e| AgentError::Decode(e.to_string()))?),
            None => None,
        };

        let mut backoff = BACKOFF_BASE;
        for attempt in 1..=MAX_ATTEMPTS {
            let mut req = self
                .http
                .request(method.clone(), url.clone())
                .header("X-Worker-ID", &self.worker_id)
                .header("Content-Type", "application/json")
                .timeout(timeout);
            if let Some(bytes) = &body_bytes {
                req = req.body(bytes.clone());
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return decode_success(resp).await;
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(AgentError::OrchestratorStateLoss);
                    }
                    if status.is_server_error() && attempt < MAX_ATTEMPTS {
                        warn!(%status, attempt, path, "orchestrator returned server error, retrying");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                        continue;
                    }
                    return Err(bad_status(status, resp).await);
                }
                Err(e) => {
                    if attempt < MAX_ATTEMPTS {
                        warn!(error = %e, attempt, path, "orchestrator request failed, retrying");
                        sleep(backoff).await;
                        backoff = (backoff * 2).min(BACKOFF_CAP);
                        continue;
                    }
                    return Err(AgentError::Transport(e));
                }
            }
        }
        unreachable!("loop always returns within MAX_ATTEMPTS")
    }
}

async fn decode_success<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if resp.status() == StatusCode::NO_CONTENT {
        return serde_json::from_value(serde_json::Value::Null).map_err(|e| AgentError::Decode(e.to_string()));
    }
    let bytes = resp.bytes().await.map_err(AgentError::Transport)?;
    if bytes.is_empty() {
        return serde_json::from_value(serde_json::Value::Null).map_err(|e| AgentError::Decode(e.to_string()));
    }
    serde_json::from_slice(&bytes).map_err(|e| AgentError::Decode(e.to_string()))
}

async fn bad_status(status: StatusCode, resp: reqwest::Response) -> AgentError {
    let body_text = resp.text().await.unwrap_or_default();
    if status == StatusCode::BAD_REQUEST {
        if let Ok(err) = serde_json::from_str::<ApiErrorBody>(&body_text) {
            return AgentError::BadStatus { status: status.as_u16(), body: err.error };
        }
    }
    AgentError::BadStatus { status: status.as_u16(), body: body_text }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio::net::TcpListener;
    use transcode_agent_core::domain::WorkerStatus;
    use transcode_agent_core::wire::HardwareStats;

    use super::*;

    /// Minimal HTTP/1.1 responder used to exercise retry and state-loss
    /// handling without depending on a mocking crate the teacher never uses.
    async fn serve_once(listener: TcpListener, status_line: &'static str, body: &'static str) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 4096];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "{status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
            body.len()
        );
        let _ = socket.write_all(response.as_bytes()).await;
    }

    async fn spawn_server(status_line: &'static str, body: &'static str) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_once(listener, status_line, body));
        addr
    }

    fn client_for(addr: SocketAddr) -> OrchestratorClient {
        let base = Url::parse(&format!("http://{addr}")).unwrap();
        OrchestratorClient::new(reqwest::Client::new(), base, "worker-1".into())
    }

    #[tokio::test]
    async fn sync_decodes_assigned_job_absence() {
        let addr = spawn_server("HTTP/1.1 200 OK", r#"{"ack":true}"#).await;
        let client = client_for(addr);
        let payload = SyncPayload {
            worker_id: "worker-1".into(),
            status: WorkerStatus::Idle,
            hardware_stats: HardwareStats { cpu_percent: 1.0, ram_percent: 1.0, is_busy: false },
            current_job_id: None,
        };
        let resp = client.sync(&payload).await.unwrap();
        assert!(resp.ack);
        assert!(resp.assigned_job.is_none());
    }

    #[tokio::test]
    async fn not_found_maps_to_state_loss() {
        let addr = spawn_server("HTTP/1.1 404 Not Found", r#"{}"#).await;
        let client = client_for(addr);
        let err = client.register(&Capabilities::from_codecs(vec![])).await.unwrap_err();
        assert!(matches!(err, AgentError::OrchestratorStateLoss));
    }

    #[tokio::test]
    async fn bad_request_extracts_structured_message() {
        let addr = spawn_server("HTTP/1.1 400 Bad Request", r#"{"error":"bad worker id"}"#).await;
        let client = client_for(addr);
        let err = client.register(&Capabilities::from_codecs(vec![])).await.unwrap_err();
        match err {
            AgentError::BadStatus { status, body } => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad worker id");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

}
