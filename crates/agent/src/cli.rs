use std::path::PathBuf;

use clap::Parser;
use transcode_agent_core::settings::SettingsOverrides;

/// Transcoding worker agent: leases jobs from an orchestrator and runs them
/// through an external transcoder.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Optional TOML file providing settings below the environment/CLI layer.
    #[arg(long, env = "WORKER_CONFIG_FILE")]
    pub config: Option<PathBuf>,

    #[arg(long, env = "WORKER_ORCHESTRATOR_URL")]
    pub orchestrator_url: Option<String>,

    #[arg(long, env = "WORKER_WORKER_ID")]
    pub worker_id: Option<String>,

    #[arg(long, env = "WORKER_NAS_MOUNT_PATH")]
    pub nas_mount_path: Option<String>,

    #[arg(long, env = "WORKER_TEMP_DIR")]
    pub temp_dir: Option<String>,

    #[arg(long, env = "WORKER_SYNC_INTERVAL")]
    pub sync_interval: Option<u64>,

    #[arg(long, env = "WORKER_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Path to the ffmpeg binary used for transcoding.
    #[arg(long, env = "WORKER_FFMPEG_BIN", default_value = "ffmpeg")]
    pub ffmpeg_bin: String,

    /// Path to the ffprobe binary used for input inspection.
    #[arg(long, env = "WORKER_FFPROBE_BIN", default_value = "ffprobe")]
    pub ffprobe_bin: String,
}

impl From<Cli> for SettingsOverrides {
    fn from(cli: Cli) -> Self {
        SettingsOverrides {
            config_file: cli.config,
            orchestrator_url: cli.orchestrator_url,
            worker_id: cli.worker_id,
            nas_mount_path: cli.nas_mount_path,
            temp_dir: cli.temp_dir,
            sync_interval_secs: cli.sync_interval,
            log_level: cli.log_level,
        }
    }
}
