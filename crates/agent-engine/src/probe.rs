//! Host Probe (C1): capability enumeration and host load sampling.

use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use regex::Regex;
use sysinfo::System;
use tokio::process::Command;
use tracing::debug;
use transcode_agent_core::domain::{Capabilities, HostLoadSnapshot};

use crate::error::{AgentError, Result};

/// Sampling window for CPU usage: long enough to smooth bursts, short enough
/// to stay responsive inside a 10s sync tick.
const CPU_SAMPLE_WINDOW: Duration = Duration::from_millis(500);

/// Encoder tags this agent knows how to recognize in `ffmpeg -encoders`
/// output. Unknown encoders are silently dropped from capabilities rather
/// than failing the probe.
const KNOWN_ENCODER_TAGS: &[&str] = &[
    "libx264",
    "libx265",
    "libsvtav1",
    "libaom-av1",
    "h264_nvenc",
    "hevc_nvenc",
    "av1_nvenc",
    "h264_qsv",
    "hevc_qsv",
    "h264_vaapi",
    "hevc_vaapi",
    "h264_videotoolbox",
    "hevc_videotoolbox",
    "h264_v4l2m2m",
];

/// Runs the external transcoder's encoder listing once at startup. The
/// result is meant to be cached by the caller for process lifetime.
pub async fn enumerate_capabilities(ffmpeg_bin: &str) -> Result<Capabilities> {
    let output = Command::new(ffmpeg_bin)
        .args(["-hide_banner", "-encoders"])
        .output()
        .await
        .map_err(|e| AgentError::ProbeFailed(format!("failed to run {ffmpeg_bin}: {e}")))?;

    if !output.status.success() {
        return Err(AgentError::ProbeFailed(format!(
            "{ffmpeg_bin} -encoders exited with {}",
            output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let line_re = Regex::new(r"^\s*[VAS\.]{6}\s+(\S+)").expect("static regex is valid");
    let found: Vec<String> = stdout
        .lines()
        .filter_map(|line| line_re.captures(line))
        .map(|caps| caps[1].to_string())
        .filter(|tag| KNOWN_ENCODER_TAGS.contains(&tag.as_str()))
        .collect();

    debug!(count = found.len(), "enumerated encoder capabilities");
    Ok(Capabilities::from_codecs(found))
}

/// Reuses a single `System` across calls so sysinfo's internal baselines are
/// warmed once instead of re-initializing on every tick.
fn cached_system() -> &'static Mutex<System> {
    static SYSTEM: OnceLock<Mutex<System>> = OnceLock::new();
    SYSTEM.get_or_init(|| Mutex::new(System::new()))
}

/// Returns a fresh host-load snapshot. Blocks the calling task for roughly
/// [`CPU_SAMPLE_WINDOW`]; run via `spawn_blocking` from async callers that
/// care about not stalling the runtime.
pub fn snapshot_load() -> Result<HostLoadSnapshot> {
    let mut sys = cached_system()
        .lock()
        .map_err(|_| AgentError::ProbeFailed("host metrics mutex poisoned".into()))?;

    sys.refresh_cpu_usage();
    std::thread::sleep(CPU_SAMPLE_WINDOW);
    sys.refresh_cpu_usage();
    sys.refresh_memory();

    let cpus = sys.cpus();
    let cpu_percent = if cpus.is_empty() {
        0.0
    } else {
        cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
    };

    let total = sys.total_memory();
    let ram_percent = if total == 0 {
        0.0
    } else {
        (sys.used_memory() as f64 / total as f64 * 100.0) as f32
    };

    Ok(HostLoadSnapshot { cpu_percent, ram_percent })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_load_is_busy_derivation_matches_spec() {
        let snap = HostLoadSnapshot { cpu_percent: 81.0, ram_percent: 10.0 };
        assert!(snap.is_busy());
        let snap = HostLoadSnapshot { cpu_percent: 10.0, ram_percent: 91.0 };
        assert!(snap.is_busy());
        let snap = HostLoadSnapshot { cpu_percent: 50.0, ram_percent: 50.0 };
        assert!(!snap.is_busy());
    }

    #[test]
    fn known_encoder_tags_drive_gpu_classification() {
        let caps = Capabilities::from_codecs(vec!["libx264".into(), "h264_nvenc".into()]);
        assert!(caps.has_gpu);
        assert_eq!(caps.supported_codecs.len(), 2);
    }
}
