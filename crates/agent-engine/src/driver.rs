//! Transcoder Driver (C3): the per-job pipeline. Stages outputs under a temp
//! directory, supervises the external transcoder with streaming progress
//! extraction and cooperative cancellation, then commits staged files into
//! the shared store one file at a time, fsynced.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use tracing::{debug, warn};
use transcode_agent_core::domain::{AudioConfig, JobSpec, ProgressSample, Rendition};

use crate::cancel::CancellationToken;
use crate::error::{AgentError, Result};

/// Grace period after a polite stop request before the subprocess is killed
/// outright.
const TERMINATE_GRACE: Duration = Duration::from_secs(10);

/// How many trailing stderr lines are retained for error messages.
const LOG_TAIL_LINES: usize = 20;

fn scale_height_for(resolution: &str) -> Option<u32> {
    match resolution {
        "2160p" => Some(2160),
        "1080p" => Some(1080),
        "720p" => Some(720),
        "480p" => Some(480),
        "360p" => Some(360),
        _ => None,
    }
}

pub struct Driver {
    pub ffmpeg_bin: String,
    pub ffprobe_bin: String,
}

impl Default for Driver {
    fn default() -> Self {
        Self { ffmpeg_bin: "ffmpeg".into(), ffprobe_bin: "ffprobe".into() }
    }
}

/// A staged rendition ready to be committed, paired with its destination.
struct StagedRendition<'a> {
    rendition: &'a Rendition,
    stage_dir: PathBuf,
    dest_dir: PathBuf,
}

impl Driver {
    /// Runs one job to completion. `dest_dirs` must be resolved, absolute,
    /// and line up 1:1 with `job.outputs`.
    pub async fn execute(
        &self,
        job: &JobSpec,
        input_path: &Path,
        dest_dirs: &[PathBuf],
        temp_root: &Path,
        cancel: CancellationToken,
        progress_tx: mpsc::Sender<ProgressSample>,
    ) -> Result<()> {
        if dest_dirs.len() != job.outputs.len() {
            return Err(AgentError::InputUnusable("dest path count does not match rendition count".into()));
        }
        if !input_path.is_file() {
            return Err(AgentError::InputUnusable(format!("input file does not exist: {}", input_path.display())));
        }

        let stage_root = temp_root.join(&job.job_id);
        let _cleanup = StagingGuard(stage_root.clone());
        std::fs::create_dir_all(&stage_root)
            .map_err(|e| AgentError::InputUnusable(format!("cannot create staging dir: {e}")))?;

        let total_duration = self.probe_duration(input_path).await?;

        for (rendition, dest_dir) in job.outputs.iter().zip(dest_dirs.iter()) {
            if cancel.is_cancelled() {
                return Err(AgentError::Cancelled);
            }
            let stage_dir = stage_root.join(format!("{}_{}", rendition.resolution, rendition.bitrate));
            std::fs::create_dir_all(&stage_dir)
                .map_err(|e| AgentError::TranscodeFailed(format!("cannot create rendition dir: {e}")))?;

            self.run_rendition(job, input_path, rendition, &stage_dir, total_duration, &cancel, &progress_tx)
                .await?;

            self.commit_rendition(&StagedRendition { rendition, stage_dir, dest_dir: dest_dir.clone() })?;
        }

        Ok(())
    }

    async fn probe_duration(&self, input_path: &Path) -> Result<f64> {
        let output = Command::new(&self.ffprobe_bin)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "csv=p=0",
            ])
            .arg(input_path)
            .output()
            .await
            .map_err(|e| AgentError::InputUnusable(format!("failed to probe input: {e}")))?;

        if !output.status.success() {
            return Err(AgentError::InputUnusable(format!("ffprobe exited with {}", output.status)));
        }

        String::from_utf8_lossy(&output.stdout)
            .trim()
            .parse::<f64>()
            .map_err(|e| AgentError::InputUnusable(format!("could not parse duration: {e}")))
    }

    fn build_args(&self, job: &JobSpec, input_path: &Path, rendition: &Rendition, stage_dir: &Path) -> Vec<String> {
        let mut args = vec!["-y".to_string(), "-i".to_string(), input_path.display().to_string()];

        if let Some(height) = scale_height_for(&rendition.resolution) {
            args.push("-vf".to_string());
            args.push(format!("scale=-2:{height}"));
        }

        args.push("-c:v".to_string());
        args.push(rendition.codec.clone());
        args.push("-b:v".to_string());
        args.push(rendition.bitrate.clone());

        let (audio_codec, audio_bitrate) = AudioConfig::resolve(rendition.audio.as_ref(), job.audio_config.as_ref());
        args.push("-c:a".to_string());
        args.push(audio_codec);
        args.push("-b:a".to_string());
        args.push(audio_bitrate);

        args.push("-f".to_string());
        args.push("hls".to_string());
        args.push("-hls_time".to_string());
        args.push(job.hls_settings.segment_time().to_string());
        args.push("-hls_playlist_type".to_string());
        args.push("vod".to_string());
        args.push("-hls_segment_filename".to_string());
        args.push(stage_dir.join("segment_%03d.ts").display().to_string());
        args.push(stage_dir.join(job.hls_settings.playlist_name()).display().to_string());

        args
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_rendition(
        &self,
        job: &JobSpec,
        input_path: &Path,
        rendition: &Rendition,
        stage_dir: &Path,
        total_duration: f64,
        cancel: &CancellationToken,
        progress_tx: &mpsc::Sender<ProgressSample>,
    ) -> Result<()> {
        let args = self.build_args(job, input_path, rendition, stage_dir);
        debug!(?args, "spawning transcoder");

        let mut child = Command::new(&self.ffmpeg_bin)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AgentError::TranscodeFailed(format!("failed to spawn {}: {e}", self.ffmpeg_bin)))?;

        let stderr = child.stderr.take().expect("stderr was piped");
        let mut lines = BufReader::new(stderr).lines();
        let time_re = Regex::new(r"time=(\d+):(\d+):(\d+(?:\.\d+)?)").expect("static regex is valid");
        let fps_re = Regex::new(r"fps=\s*([\d.]+)").expect("static regex is valid");
        let mut log_tail: Vec<String> = Vec::with_capacity(LOG_TAIL_LINES);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    terminate_politely(&mut child).await;
                    return Err(AgentError::Cancelled);
                }
                line = lines.next_line() => {
                    match line {
                        Ok(Some(text)) => {
                            if let Some(sample) = parse_progress(&text, &time_re, &fps_re, total_duration) {
                                let _ = progress_tx.try_send(sample);
                            } else {
                                push_tail(&mut log_tail, text);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "error reading transcoder stderr");
                            break;
                        }
                    }
                }
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| AgentError::TranscodeFailed(format!("failed to wait on transcoder: {e}")))?;

        if !status.success() {
            return Err(AgentError::TranscodeFailed(build_error_message(status.code(), &log_tail)));
        }
        Ok(())
    }

    fn commit_rendition(&self, staged: &StagedRendition<'_>) -> Result<()> {
        debug!(resolution = %staged.rendition.resolution, bitrate = %staged.rendition.bitrate, "committing rendition");
        std::fs::create_dir_all(&staged.dest_dir)
            .map_err(|e| AgentError::CommitFailed(format!("cannot create destination dir: {e}")))?;

        for entry in walkdir::WalkDir::new(&staged.stage_dir).into_iter() {
            let entry = entry.map_err(|e| AgentError::CommitFailed(format!("walk error: {e}")))?;
            if entry.file_type().is_dir() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&staged.stage_dir)
                .map_err(|e| AgentError::CommitFailed(format!("path error: {e}")))?;
            let target = staged.dest_dir.join(rel);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| AgentError::CommitFailed(format!("cannot create {}: {e}", parent.display())))?;
            }
            atomic_commit_file(entry.path(), &target)?;
        }
        Ok(())
    }
}

/// Writes `src`'s contents to `dest` such that `dest` appears fully or not
/// at all: copy to a sibling `.tmp` file, fsync it, then rename over the
/// destination (atomic on POSIX filesystems), and best-effort fsync the
/// parent directory entry.
fn atomic_commit_file(src: &Path, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension(format!(
        "tmp.{}",
        uuid::Uuid::new_v4().simple()
    ));

    {
        let mut tmp_file = std::fs::File::create(&tmp_path)
            .map_err(|e| AgentError::CommitFailed(format!("cannot create {}: {e}", tmp_path.display())))?;
        let mut src_file = std::fs::File::open(src)
            .map_err(|e| AgentError::CommitFailed(format!("cannot open {}: {e}", src.display())))?;
        std::io::copy(&mut src_file, &mut tmp_file)
            .map_err(|e| AgentError::CommitFailed(format!("copy failed: {e}")))?;
        tmp_file.sync_all().map_err(|e| AgentError::CommitFailed(format!("fsync failed: {e}")))?;
    }

    std::fs::rename(&tmp_path, dest).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        AgentError::CommitFailed(format!("rename failed: {e}"))
    })?;

    if let Some(parent) = dest.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    Ok(())
}

fn parse_progress(line: &str, time_re: &Regex, fps_re: &Regex, total_duration: f64) -> Option<ProgressSample> {
    let caps = time_re.captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let current_seconds = hours * 3600.0 + minutes * 60.0 + seconds;

    let fps = fps_re.captures(line).and_then(|c| c[1].parse::<f64>().ok()).unwrap_or(0.0);

    Some(ProgressSample::from_ffmpeg_time(current_seconds, total_duration, fps))
}

fn push_tail(tail: &mut Vec<String>, line: String) {
    if tail.len() >= LOG_TAIL_LINES {
        tail.remove(0);
    }
    tail.push(line);
}

fn build_error_message(exit_code: Option<i32>, log_tail: &[String]) -> String {
    let code = exit_code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string());
    if log_tail.is_empty() {
        format!("transcoder exited with code {code}")
    } else {
        format!("transcoder exited with code {code}: {}", log_tail.join(" | "))
    }
}

async fn terminate_politely(child: &mut Child) {
    if let Some(mut stdin) = child.stdin.take() {
        let _ = stdin.write_all(b"q\n").await;
        let _ = stdin.flush().await;
    }
    match timeout(TERMINATE_GRACE, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("transcoder did not exit within grace period, killing");
            let _ = child.kill().await;
        }
    }
}

/// Removes the staging directory on every exit path, including early
/// returns and cancellation.
struct StagingGuard(PathBuf);

impl Drop for StagingGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.0);
    }
}
