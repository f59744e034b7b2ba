//! Layered configuration: built-in defaults, an optional TOML file, then
//! environment/CLI (the caller resolves CLI-vs-env precedence before this
//! module ever sees it, via clap's own `env` attribute). Validation happens
//! once, eagerly, before any network or probe activity.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

const DEFAULT_TEMP_DIR: &str = "/tmp/transcode";
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 10;
const DEFAULT_LOG_LEVEL: &str = "info";

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub orchestrator_url: Url,
    pub worker_id: String,
    pub nas_mount_path: PathBuf,
    pub temp_dir: PathBuf,
    pub sync_interval: Duration,
    pub log_level: String,
}

/// Values already resolved by the CLI layer (clap's `env` attribute folds
/// CLI-over-environment for each field; `None` means neither was supplied).
#[derive(Debug, Clone, Default)]
pub struct SettingsOverrides {
    pub config_file: Option<PathBuf>,
    pub orchestrator_url: Option<String>,
    pub worker_id: Option<String>,
    pub nas_mount_path: Option<String>,
    pub temp_dir: Option<String>,
    pub sync_interval_secs: Option<u64>,
    pub log_level: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    orchestrator_url: Option<String>,
    worker_id: Option<String>,
    nas_mount_path: Option<String>,
    temp_dir: Option<String>,
    sync_interval_secs: Option<u64>,
    log_level: Option<String>,
}

impl AgentSettings {
    /// `defaults < file < overrides` (overrides already encode CLI > env).
    pub fn load(overrides: SettingsOverrides) -> Result<Self, ConfigError> {
        let file = match &overrides.config_file {
            Some(path) => load_file_config(path)?,
            None => FileConfig::default(),
        };

        let orchestrator_url = overrides
            .orchestrator_url
            .or(file.orchestrator_url)
            .ok_or_else(|| ConfigError("orchestrator_url is required".into()))?;
        let orchestrator_url = Url::parse(&orchestrator_url)
            .map_err(|e| ConfigError(format!("orchestrator_url is not a valid URL: {e}")))?;

        let worker_id = overrides
            .worker_id
            .or(file.worker_id)
            .or_else(default_worker_id)
            .ok_or_else(|| ConfigError("worker_id could not be determined".into()))?;

        let nas_mount_path = overrides
            .nas_mount_path
            .or(file.nas_mount_path)
            .ok_or_else(|| ConfigError("nas_mount_path is required".into()))?;
        let nas_mount_path = PathBuf::from(nas_mount_path);
        if !nas_mount_path.is_dir() {
            return Err(ConfigError(format!(
                "nas_mount_path {:?} does not exist or is not a directory",
                nas_mount_path
            )));
        }

        let temp_dir = overrides
            .temp_dir
            .or(file.temp_dir)
            .unwrap_or_else(|| DEFAULT_TEMP_DIR.to_string());

        let sync_interval_secs = overrides
            .sync_interval_secs
            .or(file.sync_interval_secs)
            .unwrap_or(DEFAULT_SYNC_INTERVAL_SECS);
        if sync_interval_secs == 0 {
            return Err(ConfigError("sync_interval must be nonzero".into()));
        }

        let log_level = overrides
            .log_level
            .or(file.log_level)
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            orchestrator_url,
            worker_id,
            nas_mount_path,
            temp_dir: PathBuf::from(temp_dir),
            sync_interval: Duration::from_secs(sync_interval_secs),
            log_level,
        })
    }
}

fn load_file_config(path: &Path) -> Result<FileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            toml::from_str(&contents).map_err(|e| ConfigError(format!("invalid config file {path:?}: {e}")))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FileConfig::default()),
        Err(e) => Err(ConfigError(format!("cannot read config file {path:?}: {e}"))),
    }
}

fn default_worker_id() -> Option<String> {
    std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_overrides(nas: &Path) -> SettingsOverrides {
        SettingsOverrides {
            orchestrator_url: Some("https://orchestrator.example/".into()),
            worker_id: Some("worker-1".into()),
            nas_mount_path: Some(nas.to_string_lossy().into_owned()),
            ..Default::default()
        }
    }

    #[test]
    fn applies_defaults_when_nothing_else_given() {
        let dir = tempfile::tempdir().unwrap();
        let settings = AgentSettings::load(base_overrides(dir.path())).unwrap();
        assert_eq!(settings.temp_dir, PathBuf::from(DEFAULT_TEMP_DIR));
        assert_eq!(settings.sync_interval, Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS));
        assert_eq!(settings.log_level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn file_layer_fills_gaps_below_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agent.toml");
        std::fs::write(&config_path, "log_level = \"debug\"\nsync_interval_secs = 30\n").unwrap();

        let mut overrides = base_overrides(dir.path());
        overrides.config_file = Some(config_path);
        let settings = AgentSettings::load(overrides).unwrap();

        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.sync_interval, Duration::from_secs(30));
    }

    #[test]
    fn overrides_win_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("agent.toml");
        std::fs::write(&config_path, "log_level = \"debug\"\n").unwrap();

        let mut overrides = base_overrides(dir.path());
        overrides.config_file = Some(config_path);
        overrides.log_level = Some("warn".into());
        let settings = AgentSettings::load(overrides).unwrap();

        assert_eq!(settings.log_level, "warn");
    }

    #[test]
    fn rejects_missing_nas_mount() {
        let overrides = SettingsOverrides {
            orchestrator_url: Some("https://orchestrator.example/".into()),
            worker_id: Some("worker-1".into()),
            nas_mount_path: Some("/no/such/path/hopefully".into()),
            ..Default::default()
        };
        assert!(AgentSettings::load(overrides).is_err());
    }

    #[test]
    fn rejects_bad_url() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = base_overrides(dir.path());
        overrides.orchestrator_url = Some("not-a-url".into());
        assert!(AgentSettings::load(overrides).is_err());
    }

    #[test]
    fn rejects_zero_sync_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut overrides = base_overrides(dir.path());
        overrides.sync_interval_secs = Some(0);
        assert!(AgentSettings::load(overrides).is_err());
    }
}
