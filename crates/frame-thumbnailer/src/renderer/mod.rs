//! Renderer backends
//!
//! A renderer is the heavyweight component that decodes a media source and
//! can hand back its current frame. The rest of the crate only talks to it
//! through three seams:
//!
//! - [`RenderBackend`]: factory for renderer contexts and host surfaces
//! - [`Renderer`]: one context, owned by exactly one render session
//! - [`HostSurface`]: whatever the renderer must be attached to before it will
//!   process a load (a headless no-op for subprocess renderers)
//!
//! Readiness is reported through typed [`SessionEvent`]s on a channel that the
//! session hands to [`Renderer::load`].

use async_trait::async_trait;
use image::RgbImage;
use std::time::Duration;
use tokio::sync::mpsc;

use crate::errors::RenderResult;
use crate::models::ThumbnailRequest;

pub mod ffmpeg;
pub mod probe;
pub mod scripted;
pub mod source_descriptor;
pub mod surface;

pub use ffmpeg::{FfmpegBackend, FfmpegRenderer};
pub use scripted::{FrameStep, ScriptedBackend, ScriptedLoad, ScriptedStats};
pub use surface::HeadlessSurface;

/// Decodable metadata reported once a source is ready
#[derive(Debug, Clone, PartialEq)]
pub struct MediaInfo {
    pub width: u32,
    pub height: u32,
    pub duration: Option<Duration>,
    pub codec: Option<String>,
}

impl MediaInfo {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            duration: None,
            codec: None,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Output size for `target_width`, preserving the source aspect ratio
    pub fn scaled_size(&self, target_width: u32) -> (u32, u32) {
        (
            target_width,
            scaled_height(self.width, self.height, target_width),
        )
    }
}

/// `round(target_width * height / width)`, never less than one pixel
pub fn scaled_height(source_width: u32, source_height: u32, target_width: u32) -> u32 {
    if source_width == 0 {
        return target_width.max(1);
    }
    let height = (u64::from(target_width) * u64::from(source_height) + u64::from(source_width) / 2)
        / u64::from(source_width);
    u32::try_from(height).unwrap_or(u32::MAX).max(1)
}

/// Renderer-to-session notifications
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Ready(MediaInfo),
    LoadFailed(String),
    Destroyed,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Result of one atomic check-and-draw
#[derive(Debug, Clone)]
pub enum FrameGrab {
    /// Decode state has not reached "frame available"
    NotReady,
    /// The current frame, already drawn at the aspect-preserving target size
    Frame(RgbImage),
}

/// One heavyweight render context
#[async_trait]
pub trait Renderer: Send {
    /// Start loading. Must return promptly; readiness or failure is reported
    /// later through `events`.
    async fn load(&mut self, request: &ThumbnailRequest, events: EventSender) -> RenderResult<()>;

    /// Seek to `offset` and start playback so the decoder produces frames
    async fn nudge(&mut self, offset: Duration) -> RenderResult<()>;

    /// Check readiness and draw the current frame in a single operation
    async fn grab_frame(&mut self, target_width: u32) -> RenderResult<FrameGrab>;

    /// Release decode resources. Synchronous and idempotent.
    fn unload(&mut self);
}

/// Display/compositing surface a renderer has to be attached to
pub trait HostSurface: Send {
    fn attach(&mut self) -> RenderResult<()>;

    /// Idempotent
    fn detach(&mut self);
}

/// Factory for renderer contexts and their host surfaces
pub trait RenderBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_renderer(&self) -> Box<dyn Renderer>;

    fn create_surface(&self) -> Box<dyn HostSurface>;
}
