use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Stable worker identity, configured or host-derived. Process-wide constant.
pub type WorkerId = String;

/// Discovered once at startup and cached for process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub supported_codecs: Vec<String>,
    pub has_gpu: bool,
    pub gpu_type: Option<GpuVendor>,
    pub max_resolution: Option<String>,
}

impl Capabilities {
    pub fn from_codecs(supported_codecs: Vec<String>) -> Self {
        let gpu_type = supported_codecs.iter().find_map(|tag| GpuVendor::classify(tag));
        let has_gpu = gpu_type.is_some();
        Self { supported_codecs, has_gpu, gpu_type, max_resolution: None }
    }
}

/// Heuristic only. Never route correctness-critical decisions on this.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GpuVendor {
    Nvidia,
    Intel,
    Vaapi,
    Apple,
    #[serde(rename = "raspberry-pi")]
    RaspberryPi,
    Unknown,
}

impl GpuVendor {
    pub fn classify(encoder_tag: &str) -> Option<Self> {
        let tag = encoder_tag.to_ascii_lowercase();
        if tag.contains("nvenc") || tag.contains("nvidia") || tag.contains("cuda") {
            Some(Self::Nvidia)
        } else if tag.contains("qsv") || tag.contains("intel") {
            Some(Self::Intel)
        } else if tag.contains("vaapi") {
            Some(Self::Vaapi)
        } else if tag.contains("videotoolbox") || tag.contains("apple") {
            Some(Self::Apple)
        } else if tag.contains("v4l2m2m") || tag.contains("raspberry") {
            Some(Self::RaspberryPi)
        } else {
            None
        }
    }
}

/// Ephemeral; not retained beyond the tick that produced it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct HostLoadSnapshot {
    pub cpu_percent: f32,
    pub ram_percent: f32,
}

impl HostLoadSnapshot {
    /// cpu_percent > 80 OR ram_percent > 90. Derived, never measured directly.
    pub fn is_busy(&self) -> bool {
        self.cpu_percent > 80.0 || self.ram_percent > 90.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Offline,
}

/// One output variant of a source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rendition {
    pub resolution: String,
    pub bitrate: String,
    pub codec: String,
    pub dest_path: String,
    pub audio: Option<AudioConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AudioConfig {
    pub codec: Option<String>,
    pub bitrate: Option<String>,
}

impl AudioConfig {
    pub const DEFAULT_CODEC: &'static str = "aac";
    pub const DEFAULT_BITRATE: &'static str = "128k";

    /// Per-rendition override wins, then this global config, then the built-in default.
    pub fn resolve(rendition: Option<&AudioConfig>, global: Option<&AudioConfig>) -> (String, String) {
        let codec = rendition
            .and_then(|a| a.codec.clone())
            .or_else(|| global.and_then(|a| a.codec.clone()))
            .unwrap_or_else(|| Self::DEFAULT_CODEC.to_string());
        let bitrate = rendition
            .and_then(|a| a.bitrate.clone())
            .or_else(|| global.and_then(|a| a.bitrate.clone()))
            .unwrap_or_else(|| Self::DEFAULT_BITRATE.to_string());
        (codec, bitrate)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HlsSettings {
    pub master_playlist_name: Option<String>,
    pub segment_time: Option<u32>,
}

impl HlsSettings {
    pub const DEFAULT_PLAYLIST_NAME: &'static str = "index.m3u8";
    pub const DEFAULT_SEGMENT_TIME: u32 = 6;

    pub fn playlist_name(&self) -> &str {
        self.master_playlist_name.as_deref().unwrap_or(Self::DEFAULT_PLAYLIST_NAME)
    }

    pub fn segment_time(&self) -> u32 {
        self.segment_time.unwrap_or(Self::DEFAULT_SEGMENT_TIME)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobInput {
    pub source_url: String,
}

/// Delivered opaquely by the orchestrator; `job_id` is the idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JobSpec {
    pub job_id: String,
    pub input: JobInput,
    pub outputs: Vec<Rendition>,
    pub hls_settings: HlsSettings,
    pub audio_config: Option<AudioConfig>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    Accepted,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressSample {
    pub percent: f64,
    pub fps: f64,
    pub eta_seconds: f64,
}

impl ProgressSample {
    pub fn from_ffmpeg_time(current_seconds: f64, total_seconds: f64, fps: f64) -> Self {
        let percent = if total_seconds > 0.0 {
            (100.0 * current_seconds / total_seconds).min(100.0)
        } else {
            0.0
        };
        let eta_seconds = if fps > 0.0 {
            ((total_seconds - current_seconds) / fps).max(0.0)
        } else {
            0.0
        };
        Self { percent, fps, eta_seconds }
    }
}

/// Minimum interval between progress-triggered status updates (Job Executor, C4).
pub const PROGRESS_REPORT_INTERVAL: Duration = Duration::from_secs(2);
pub const PROGRESS_CHANNEL_CAPACITY: usize = 10;
