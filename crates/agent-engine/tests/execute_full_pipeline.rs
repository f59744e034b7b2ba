//! Drives `Driver::execute` through a full rendition (transcode + commit)
//! against fake `ffmpeg`/`ffprobe` shell scripts, standing in for the real
//! binaries the way the spec's own test tooling notes suggest.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use tokio::sync::mpsc;
use transcode_agent_core::domain::{HlsSettings, JobInput, JobSpec, Rendition};
use transcode_agent_engine::cancel::CancellationToken;
use transcode_agent_engine::driver::Driver;

fn write_script(path: &Path, body: &str) {
    std::fs::write(path, body).unwrap();
    let mut perms = std::fs::metadata(path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(path, perms).unwrap();
}

fn sample_job() -> JobSpec {
    JobSpec {
        job_id: "job-full-pipeline".into(),
        input: JobInput { source_url: "in.mkv".into() },
        outputs: vec![Rendition {
            resolution: "720p".into(),
            bitrate: "1500k".into(),
            codec: "libx264".into(),
            dest_path: "out/720p".into(),
            audio: None,
        }],
        hls_settings: HlsSettings { master_playlist_name: None, segment_time: Some(6) },
        audio_config: None,
    }
}

#[tokio::test]
async fn execute_transcodes_and_commits_a_full_rendition() {
    let scripts = tempfile::tempdir().unwrap();
    let input = tempfile::NamedTempFile::new().unwrap();
    let temp_root = tempfile::tempdir().unwrap();
    let dest_root = tempfile::tempdir().unwrap();

    let ffprobe_path = scripts.path().join("fake_ffprobe.sh");
    write_script(&ffprobe_path, "#!/bin/sh\necho 10.0\n");

    // The real driver's last argument is always the playlist output path;
    // this stand-in writes a minimal playlist and one segment next to it,
    // then emits a single progress line on stderr before exiting clean.
    let ffmpeg_path = scripts.path().join("fake_ffmpeg.sh");
    write_script(
        &ffmpeg_path,
        r#"#!/bin/sh
set -e
last=""
for arg in "$@"; do
  last="$arg"
done
dir=$(dirname "$last")
mkdir -p "$dir"
printf '#EXTM3U\n#EXT-X-ENDLIST\n' > "$last"
printf 'fake-ts-data' > "$dir/segment_000.ts"
echo "frame=100 fps=30.0 q=28.0 size=2048kB time=00:00:05.00 bitrate=1000kbits/s" >&2
exit 0
"#,
    );

    let driver = Driver { ffmpeg_bin: ffmpeg_path.display().to_string(), ffprobe_bin: ffprobe_path.display().to_string() };
    let job = sample_job();
    let dest_dirs = vec![dest_root.path().join("out/720p")];
    let (progress_tx, mut progress_rx) = mpsc::channel(10);

    driver
        .execute(&job, input.path(), &dest_dirs, temp_root.path(), CancellationToken::new(), progress_tx)
        .await
        .unwrap();

    let committed_playlist = dest_root.path().join("out/720p/index.m3u8");
    let committed_segment = dest_root.path().join("out/720p/segment_000.ts");
    assert_eq!(std::fs::read(&committed_playlist).unwrap(), b"#EXTM3U\n#EXT-X-ENDLIST\n");
    assert_eq!(std::fs::read(&committed_segment).unwrap(), b"fake-ts-data");

    let sample = progress_rx.try_recv().expect("at least one progress sample was forwarded");
    assert_eq!(sample.percent, 50.0);
    assert_eq!(sample.fps, 30.0);

    // Staging is removed unconditionally once the job finishes.
    assert!(!temp_root.path().join(&job.job_id).exists());
}

#[tokio::test]
async fn execute_fails_when_transcoder_exits_nonzero() {
    let scripts = tempfile::tempdir().unwrap();
    let input = tempfile::NamedTempFile::new().unwrap();
    let temp_root = tempfile::tempdir().unwrap();
    let dest_root = tempfile::tempdir().unwrap();

    let ffprobe_path = scripts.path().join("fake_ffprobe.sh");
    write_script(&ffprobe_path, "#!/bin/sh\necho 10.0\n");

    let ffmpeg_path = scripts.path().join("fake_ffmpeg.sh");
    write_script(&ffmpeg_path, "#!/bin/sh\necho 'boom' >&2\nexit 1\n");

    let driver = Driver { ffmpeg_bin: ffmpeg_path.display().to_string(), ffprobe_bin: ffprobe_path.display().to_string() };
    let job = sample_job();
    let dest_dirs = vec![dest_root.path().join("out/720p")];
    let (progress_tx, _progress_rx) = mpsc::channel(10);

    let err = driver
        .execute(&job, input.path(), &dest_dirs, temp_root.path(), CancellationToken::new(), progress_tx)
        .await
        .unwrap_err();

    assert!(matches!(err, transcode_agent_engine::error::AgentError::TranscodeFailed(_)));
    assert!(!dest_root.path().join("out/720p/index.m3u8").exists());
}
