use thiserror::Error;
use transcode_agent_core::error::ConfigError;

/// Mirrors the taxonomy in full; callers match on recovery behavior rather
/// than string-sniffing messages.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    ConfigInvalid(#[from] ConfigError),

    #[error("capability probe failed: {0}")]
    ProbeFailed(String),

    #[error("orchestrator unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("orchestrator returned {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("orchestrator has lost this worker's state")]
    OrchestratorStateLoss,

    #[error("failed to decode orchestrator response: {0}")]
    Decode(String),

    #[error("input unusable: {0}")]
    InputUnusable(String),

    #[error("transcode failed: {0}")]
    TranscodeFailed(String),

    #[error("commit failed: {0}")]
    CommitFailed(String),

    #[error("cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, AgentError>;
