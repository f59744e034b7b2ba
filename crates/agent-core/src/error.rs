use thiserror::Error;

/// Fatal at startup; raised by the settings loader before any network or
/// probe activity begins.
#[derive(Debug, Error)]
#[error("invalid configuration: {0}")]
pub struct ConfigError(pub String);

pub type Result<T> = std::result::Result<T, ConfigError>;
