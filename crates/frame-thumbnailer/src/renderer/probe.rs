//! Media probing
//!
//! Runs ffprobe against a prepared input and reduces its JSON report to the
//! [`MediaInfo`] a session needs to become ready.

use std::process::Stdio;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::{debug, warn};

use super::MediaInfo;
use super::source_descriptor::FfmpegInput;
use crate::errors::{RenderError, RenderResult};

/// Error section of an ffprobe report
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeError {
    pub code: Option<i32>,
    pub string: Option<String>,
}

/// Probes inputs with ffprobe
#[derive(Debug, Clone)]
pub struct MediaProber {
    ffprobe_command: String,
    probe_timeout: Duration,
}

impl MediaProber {
    pub fn new(ffprobe_command: impl Into<String>, probe_timeout: Duration) -> Self {
        Self {
            ffprobe_command: ffprobe_command.into(),
            probe_timeout,
        }
    }

    /// Probe an input and return its first decodable video stream
    pub async fn probe(&self, input: &FfmpegInput) -> RenderResult<MediaInfo> {
        self.spawn(input)?.finish().await
    }

    /// Start ffprobe without waiting for it. The returned probe owns nothing
    /// of `input`, so the input may be dropped while it runs.
    pub fn spawn(&self, input: &FfmpegInput) -> RenderResult<RunningProbe> {
        let mut cmd = Command::new(&self.ffprobe_command);
        cmd.args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_error",
            "-show_entries",
            "stream=index,codec_type,codec_name,width,height,duration:format=duration",
        ]);
        // ffprobe takes the same input options as ffmpeg, minus the leading "-i"
        let mut input_args = input.args(None);
        if let Some(position) = input_args.iter().rposition(|arg| arg == "-i") {
            input_args.remove(position);
        }
        cmd.args(&input_args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        debug!("Probing input with {}", self.ffprobe_command);

        let mut child = cmd
            .spawn()
            .map_err(|e| RenderError::spawn(&self.ffprobe_command, e.to_string()))?;
        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RenderError::invalid_state("ffprobe pipes were not captured"));
        };

        Ok(RunningProbe {
            command: self.ffprobe_command.clone(),
            timeout: self.probe_timeout,
            stdout,
            stderr,
            handle: ProbeHandle(Arc::new(Mutex::new(Some(child)))),
        })
    }
}

/// Kill switch for a running ffprobe, usable without awaiting
#[derive(Debug, Clone)]
pub struct ProbeHandle(Arc<Mutex<Option<Child>>>);

impl ProbeHandle {
    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Send the kill signal now. Idempotent.
    pub fn kill(&self) {
        if let Some(mut child) = self.lock().take()
            && let Err(e) = child.start_kill()
        {
            debug!("ffprobe already gone: {}", e);
        }
    }

    /// Whether the process is still owned here, i.e. neither killed nor reaped
    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    fn take(&self) -> Option<Child> {
        self.lock().take()
    }
}

/// An ffprobe run in progress
#[derive(Debug)]
pub struct RunningProbe {
    command: String,
    timeout: Duration,
    stdout: ChildStdout,
    stderr: ChildStderr,
    handle: ProbeHandle,
}

impl RunningProbe {
    pub fn handle(&self) -> ProbeHandle {
        self.handle.clone()
    }

    /// Collect the report. A killed probe finishes with a process error.
    pub async fn finish(self) -> RenderResult<MediaInfo> {
        let RunningProbe {
            command,
            timeout,
            mut stdout,
            mut stderr,
            handle,
        } = self;

        let read = async {
            let mut out = Vec::new();
            let mut err = Vec::new();
            let (out_read, err_read) =
                tokio::join!(stdout.read_to_end(&mut out), stderr.read_to_end(&mut err));
            out_read?;
            err_read?;
            Ok::<_, std::io::Error>((out, err))
        };

        let (stdout, stderr) = match tokio::time::timeout(timeout, read).await {
            Ok(output) => output?,
            Err(_) => {
                handle.kill();
                return Err(RenderError::Timeout {
                    operation: "ffprobe".to_string(),
                    after: timeout,
                });
            }
        };

        let status = match handle.take() {
            Some(mut child) => child.wait().await?.to_string(),
            None => "killed".to_string(),
        };

        let stdout = String::from_utf8_lossy(&stdout);
        if stdout.trim().is_empty() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(RenderError::Process {
                command,
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        let data: serde_json::Value = serde_json::from_str(&stdout)
            .map_err(|e| RenderError::invalid_output(format!("Failed to parse ffprobe output: {e}")))?;

        if let Some(error) = parse_probe_error(&data) {
            let message = error.string.as_deref().unwrap_or("Unknown ffprobe error");
            warn!("FFprobe reported error: {} (code: {:?})", message, error.code);
            return Err(RenderError::invalid_output(format!(
                "ffprobe error: {} (code: {:?})",
                message, error.code
            )));
        }

        let info = parse_media_info(&data)?;
        debug!(
            "Probed {}x{} {:?} stream, duration {:?}",
            info.width, info.height, info.codec, info.duration
        );
        Ok(info)
    }
}

fn parse_probe_error(data: &serde_json::Value) -> Option<ProbeError> {
    data.get("error").map(|error| ProbeError {
        code: error
            .get("code")
            .and_then(|v| v.as_i64())
            .and_then(|v| i32::try_from(v).ok()),
        string: error
            .get("string")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

/// Reduce an ffprobe JSON report to the first video stream with dimensions
pub fn parse_media_info(data: &serde_json::Value) -> RenderResult<MediaInfo> {
    let streams = data
        .get("streams")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    let video = streams
        .iter()
        .filter(|stream| stream.get("codec_type").and_then(|v| v.as_str()) == Some("video"))
        .find_map(|stream| {
            let width = stream.get("width").and_then(|v| v.as_u64())?;
            let height = stream.get("height").and_then(|v| v.as_u64())?;
            if width == 0 || height == 0 {
                return None;
            }
            Some((stream, u32::try_from(width).ok()?, u32::try_from(height).ok()?))
        });

    let Some((stream, width, height)) = video else {
        return Err(RenderError::invalid_output("no decodable video stream"));
    };

    // Stream duration is missing for some containers; the format section usually has it
    let duration = parse_seconds(stream.get("duration")).or_else(|| {
        parse_seconds(data.get("format").and_then(|format| format.get("duration")))
    });

    Ok(MediaInfo {
        width,
        height,
        duration,
        codec: stream
            .get("codec_name")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string()),
    })
}

fn parse_seconds(value: Option<&serde_json::Value>) -> Option<Duration> {
    let seconds: f64 = value?.as_str()?.parse().ok()?;
    (seconds.is_finite() && seconds > 0.0).then(|| Duration::from_secs_f64(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_first_video_stream_wins() {
        let data = json!({
            "streams": [
                {"index": 0, "codec_type": "audio", "codec_name": "aac", "duration": "10.0"},
                {"index": 1, "codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080, "duration": "10.000000"},
                {"index": 2, "codec_type": "video", "codec_name": "mjpeg", "width": 300, "height": 300}
            ],
            "format": {"duration": "10.023000"}
        });

        let info = parse_media_info(&data).unwrap();
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.duration, Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_duration_falls_back_to_format() {
        let data = json!({
            "streams": [{"codec_type": "video", "codec_name": "vp9", "width": 640, "height": 480}],
            "format": {"duration": "2.5"}
        });
        let info = parse_media_info(&data).unwrap();
        assert_eq!(info.duration, Some(Duration::from_millis(2500)));
    }

    #[test]
    fn test_audio_only_is_not_decodable() {
        let data = json!({
            "streams": [{"codec_type": "audio", "codec_name": "mp3"}],
            "format": {"duration": "180.0"}
        });
        assert!(parse_media_info(&data).is_err());
        assert!(parse_media_info(&json!({})).is_err());
    }

    #[test]
    fn test_error_section_is_parsed() {
        let data = json!({"error": {"code": -2, "string": "No such file or directory"}});
        let error = parse_probe_error(&data).unwrap();
        assert_eq!(error.code, Some(-2));
        assert_eq!(error.string.as_deref(), Some("No such file or directory"));
        assert_eq!(parse_probe_error(&json!({"streams": []})), None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_spawn_error() {
        let request = crate::models::ThumbnailRequest::parse("https://example.com/a.mp4", 200).unwrap();
        let input = FfmpegInput::prepare(&request).unwrap();
        let prober = MediaProber::new("frame-thumbnailer-no-such-ffprobe", Duration::from_secs(5));

        let err = prober.probe(&input).await.unwrap_err();
        assert!(matches!(err, RenderError::Spawn { .. }));
    }
}
