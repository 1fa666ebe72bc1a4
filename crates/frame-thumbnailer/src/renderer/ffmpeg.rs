//! ffmpeg-backed renderer
//!
//! Each [`FfmpegRenderer`] is one render context. Loading probes the source in
//! in a background task that owns only the ffprobe process, so unloading
//! kills it and removes any descriptor before returning; captures run a single-frame ffmpeg extraction at the
//! current playback position and read the frame back as raw RGB.

use async_trait::async_trait;
use image::RgbImage;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::probe::{MediaProber, ProbeHandle};
use super::source_descriptor::FfmpegInput;
use super::surface::HeadlessSurface;
use super::{EventSender, FrameGrab, HostSurface, MediaInfo, RenderBackend, Renderer, SessionEvent};
use crate::config::RenderConfig;
use crate::errors::{RenderError, RenderResult};
use crate::models::ThumbnailRequest;

/// Captures stay this far before the end of the media
const END_OF_MEDIA_MARGIN: Duration = Duration::from_millis(250);

/// Factory for ffmpeg render contexts
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    ffmpeg_command: String,
    ffprobe_command: String,
    probe_timeout: Duration,
    frame_timeout: Duration,
}

impl FfmpegBackend {
    pub fn new(config: &RenderConfig) -> Self {
        Self {
            ffmpeg_command: config.ffmpeg_command.clone(),
            ffprobe_command: config.ffprobe_command.clone(),
            probe_timeout: config.probe_timeout,
            frame_timeout: config.frame_timeout,
        }
    }
}

impl RenderBackend for FfmpegBackend {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn create_renderer(&self) -> Box<dyn Renderer> {
        Box::new(FfmpegRenderer::new(
            self.ffmpeg_command.clone(),
            MediaProber::new(self.ffprobe_command.clone(), self.probe_timeout),
            self.frame_timeout,
        ))
    }

    fn create_surface(&self) -> Box<dyn HostSurface> {
        Box::new(HeadlessSurface::new())
    }
}

/// Simulated playback position, started by a nudge
#[derive(Debug, Clone, Copy)]
struct PlaybackClock {
    origin: Duration,
    started: Instant,
}

impl PlaybackClock {
    fn start(origin: Duration) -> Self {
        Self {
            origin,
            started: Instant::now(),
        }
    }

    fn position(&self, duration: Option<Duration>) -> Duration {
        let position = self.origin + self.started.elapsed();
        match duration {
            Some(duration) => position.min(duration.saturating_sub(END_OF_MEDIA_MARGIN)),
            None => position,
        }
    }
}

/// One ffmpeg render context
pub struct FfmpegRenderer {
    ffmpeg_command: String,
    prober: MediaProber,
    frame_timeout: Duration,
    input: Option<FfmpegInput>,
    media: Arc<OnceLock<MediaInfo>>,
    probe: Option<ProbeHandle>,
    probe_task: Option<JoinHandle<()>>,
    clock: Option<PlaybackClock>,
}

impl FfmpegRenderer {
    pub fn new(ffmpeg_command: String, prober: MediaProber, frame_timeout: Duration) -> Self {
        Self {
            ffmpeg_command,
            prober,
            frame_timeout,
            input: None,
            media: Arc::new(OnceLock::new()),
            probe: None,
            probe_task: None,
            clock: None,
        }
    }

    fn frame_args(&self, input: &FfmpegInput, seek: Option<Duration>, width: u32, height: u32) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-loglevel", "error", "-nostdin"]
            .into_iter()
            .map(String::from)
            .collect();
        args.extend(input.args(seek));
        args.extend([
            "-frames:v".to_string(),
            "1".to_string(),
            "-vf".to_string(),
            format!("scale={width}:{height}"),
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            "rgb24".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn load(&mut self, request: &ThumbnailRequest, events: EventSender) -> RenderResult<()> {
        if self.input.is_some() {
            return Err(RenderError::invalid_state("renderer already loaded"));
        }

        let input = FfmpegInput::prepare(request)?;
        let running = self.prober.spawn(&input);
        self.input = Some(input);

        let running = match running {
            Ok(running) => running,
            Err(e) => {
                let _ = events.send(SessionEvent::LoadFailed(e.to_string()));
                return Ok(());
            }
        };
        self.probe = Some(running.handle());

        let media = self.media.clone();
        self.probe_task = Some(tokio::spawn(async move {
            match running.finish().await {
                Ok(info) => {
                    let _ = media.set(info.clone());
                    let _ = events.send(SessionEvent::Ready(info));
                }
                Err(e) => {
                    let _ = events.send(SessionEvent::LoadFailed(e.to_string()));
                }
            }
        }));

        Ok(())
    }

    async fn nudge(&mut self, offset: Duration) -> RenderResult<()> {
        if self.input.is_none() {
            return Err(RenderError::invalid_state("nudge before load"));
        }
        trace!("Restarting playback at {:?}", offset);
        self.clock = Some(PlaybackClock::start(offset));
        Ok(())
    }

    async fn grab_frame(&mut self, target_width: u32) -> RenderResult<FrameGrab> {
        let Some(input) = self.input.as_ref() else {
            return Err(RenderError::invalid_state("capture before load"));
        };
        let Some(info) = self.media.get() else {
            return Ok(FrameGrab::NotReady);
        };

        let (width, height) = info.scaled_size(target_width);
        let seek = self.clock.map(|clock| clock.position(info.duration));
        let args = self.frame_args(input, seek, width, height);

        let mut cmd = Command::new(&self.ffmpeg_command);
        cmd.args(&args);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        cmd.kill_on_drop(true);

        let output = tokio::time::timeout(self.frame_timeout, cmd.output())
            .await
            .map_err(|_| RenderError::Timeout {
                operation: "ffmpeg frame grab".to_string(),
                after: self.frame_timeout,
            })?
            .map_err(|e| RenderError::spawn(&self.ffmpeg_command, e.to_string()))?;

        if !output.status.success() {
            return Err(RenderError::Process {
                command: self.ffmpeg_command.clone(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        // Nothing decoded at this position yet (e.g. seek landed past the last keyframe)
        if output.stdout.is_empty() {
            debug!("No frame decoded at {:?}", seek);
            return Ok(FrameGrab::NotReady);
        }

        let expected = width as usize * height as usize * 3;
        if output.stdout.len() != expected {
            return Err(RenderError::invalid_output(format!(
                "expected {} bytes for {}x{} rgb24, got {}",
                expected,
                width,
                height,
                output.stdout.len()
            )));
        }

        RgbImage::from_raw(width, height, output.stdout)
            .map(FrameGrab::Frame)
            .ok_or_else(|| RenderError::invalid_output("frame buffer does not match dimensions"))
    }

    fn unload(&mut self) {
        if let Some(task) = self.probe_task.take() {
            task.abort();
        }
        if let Some(probe) = self.probe.take() {
            probe.kill();
        }
        self.clock = None;
        if self.input.take().is_some() {
            trace!("ffmpeg renderer unloaded");
        }
    }
}

impl Drop for FfmpegRenderer {
    fn drop(&mut self) {
        self.unload();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn renderer(ffmpeg: &str, ffprobe: &str) -> FfmpegRenderer {
        FfmpegRenderer::new(
            ffmpeg.to_string(),
            MediaProber::new(ffprobe, Duration::from_secs(5)),
            Duration::from_secs(5),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_playback_clock_is_clamped_before_end() {
        let clock = PlaybackClock::start(Duration::from_millis(100));
        tokio::time::advance(Duration::from_millis(400)).await;
        assert_eq!(clock.position(None), Duration::from_millis(500));
        assert_eq!(clock.position(Some(Duration::from_secs(10))), Duration::from_millis(500));

        tokio::time::advance(Duration::from_secs(20)).await;
        assert_eq!(
            clock.position(Some(Duration::from_secs(10))),
            Duration::from_millis(9750)
        );
    }

    #[test]
    fn test_frame_args_for_remote_input() {
        let request = ThumbnailRequest::parse("https://cdn.example.com/a.mp4", 200)
            .unwrap()
            .with_header("Cookie", "session=1");
        let input = FfmpegInput::prepare(&request).unwrap();
        let renderer = renderer("ffmpeg", "ffprobe");

        let args = renderer.frame_args(&input, Some(Duration::from_millis(100)), 200, 113);
        assert_eq!(
            args,
            vec![
                "-hide_banner", "-loglevel", "error", "-nostdin",
                "-ss", "0.100",
                "-headers", "Cookie: session=1\r\n",
                "-i", "https://cdn.example.com/a.mp4",
                "-frames:v", "1",
                "-vf", "scale=200:113",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "pipe:1",
            ]
        );
    }

    #[tokio::test]
    async fn test_operations_before_load_are_rejected() {
        let mut renderer = renderer("ffmpeg", "ffprobe");
        assert!(renderer.nudge(Duration::ZERO).await.is_err());
        assert!(renderer.grab_frame(200).await.is_err());
        renderer.unload();
        renderer.unload();
    }

    #[tokio::test]
    async fn test_load_failure_is_reported_as_event() {
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("clip.mp4");
        std::fs::write(&video, b"x").unwrap();
        let request = ThumbnailRequest::new(crate::models::MediaSource::Local(video), 200);

        let mut renderer = renderer("ffmpeg", "frame-thumbnailer-no-such-ffprobe");
        let (tx, mut rx) = mpsc::unbounded_channel();
        renderer.load(&request, tx).await.unwrap();

        // Ready is never reached, so captures report "not ready" rather than erroring
        assert!(matches!(renderer.grab_frame(200).await, Ok(FrameGrab::NotReady)));
        assert!(matches!(rx.recv().await, Some(SessionEvent::LoadFailed(_))));

        renderer.unload();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".ffconcat"))
            .collect();
        assert!(leftovers.is_empty());
    }

    fn descriptors_in(dir: &std::path::Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name().to_string_lossy().ends_with(".ffconcat"))
            .count()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unload_removes_descriptor_and_stops_helper() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().unwrap();
        let slow_ffprobe = bin.path().join("slow-ffprobe");
        std::fs::write(&slow_ffprobe, "#!/bin/sh\nexec sleep 30\n").unwrap();
        std::fs::set_permissions(&slow_ffprobe, std::fs::Permissions::from_mode(0o755)).unwrap();

        let media = tempfile::tempdir().unwrap();
        let video = media.path().join("clip.mp4");
        std::fs::write(&video, b"x").unwrap();
        let request = ThumbnailRequest::new(crate::models::MediaSource::Local(video), 200);

        let mut renderer = renderer("ffmpeg", slow_ffprobe.to_str().unwrap());
        let (tx, mut rx) = mpsc::unbounded_channel();
        renderer.load(&request, tx).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(descriptors_in(media.path()), 1);
        let helper = renderer.probe.clone().unwrap();
        assert!(helper.is_running());

        renderer.unload();

        // Released before unload returns, without yielding to the runtime
        assert_eq!(descriptors_in(media.path()), 0);
        assert!(!helper.is_running());
        assert!(renderer.probe.is_none());

        // The aborted task never reports back
        let closed = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_missing_local_source_fails_load() {
        let request = ThumbnailRequest::new(
            crate::models::MediaSource::Local("/no/such/dir/clip.mp4".into()),
            200,
        );
        let mut renderer = renderer("ffmpeg", "ffprobe");
        let (tx, _rx) = mpsc::unbounded_channel();
        assert!(renderer.load(&request, tx).await.is_err());
    }
}
