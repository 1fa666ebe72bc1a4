//! Deterministic in-process renderer
//!
//! [`ScriptedBackend`] plays back a fixed load outcome and a sequence of frame
//! results, and counts what the session layer did with it. It is what the unit
//! and integration tests drive the service with, and is handy for exercising
//! the capture protocol without ffmpeg installed.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::task::JoinHandle;

use super::{EventSender, FrameGrab, HostSurface, MediaInfo, RenderBackend, Renderer, SessionEvent};
use crate::errors::{RenderError, RenderResult};
use crate::models::ThumbnailRequest;

/// How a scripted load resolves
#[derive(Debug, Clone)]
pub enum ScriptedLoad {
    Ready { after: Duration, media: MediaInfo },
    Fail { after: Duration, message: String },
    /// Never reports anything, but keeps the event channel open
    Never,
}

/// Result of one scripted capture attempt
#[derive(Debug, Clone, PartialEq)]
pub enum FrameStep {
    NotReady,
    /// All-black frame
    Blank,
    Solid([u8; 3]),
    Error(String),
}

/// Counters describing what sessions did with the scripted renderers
#[derive(Debug, Default)]
pub struct ScriptedStats {
    renderers_created: AtomicUsize,
    live_renderers: AtomicUsize,
    max_live_renderers: AtomicUsize,
    attached_surfaces: AtomicUsize,
    loads: AtomicUsize,
    nudges: AtomicUsize,
    grabs: AtomicUsize,
}

impl ScriptedStats {
    pub fn renderers_created(&self) -> usize {
        self.renderers_created.load(Ordering::SeqCst)
    }

    /// Renderers that have been created and not yet dropped
    pub fn live_renderers(&self) -> usize {
        self.live_renderers.load(Ordering::SeqCst)
    }

    /// High-water mark of `live_renderers`
    pub fn max_live_renderers(&self) -> usize {
        self.max_live_renderers.load(Ordering::SeqCst)
    }

    pub fn attached_surfaces(&self) -> usize {
        self.attached_surfaces.load(Ordering::SeqCst)
    }

    pub fn loads(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub fn nudges(&self) -> usize {
        self.nudges.load(Ordering::SeqCst)
    }

    pub fn grabs(&self) -> usize {
        self.grabs.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
struct Script {
    load: ScriptedLoad,
    frames: Vec<FrameStep>,
    fallback: FrameStep,
    grab_delay: Duration,
}

/// Backend producing scripted renderers
#[derive(Debug, Clone)]
pub struct ScriptedBackend {
    script: Arc<Script>,
    stats: Arc<ScriptedStats>,
}

impl ScriptedBackend {
    pub fn new(load: ScriptedLoad) -> Self {
        Self {
            script: Arc::new(Script {
                load,
                frames: Vec::new(),
                fallback: FrameStep::Solid([180, 120, 60]),
                grab_delay: Duration::ZERO,
            }),
            stats: Arc::new(ScriptedStats::default()),
        }
    }

    /// Becomes ready immediately with the given source dimensions
    pub fn ready(media: MediaInfo) -> Self {
        Self::new(ScriptedLoad::Ready {
            after: Duration::ZERO,
            media,
        })
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self::new(ScriptedLoad::Fail {
            after: Duration::ZERO,
            message: message.into(),
        })
    }

    pub fn never_ready() -> Self {
        Self::new(ScriptedLoad::Never)
    }

    /// Steps played back in order, one per capture attempt
    pub fn with_frames(mut self, frames: Vec<FrameStep>) -> Self {
        self.script_mut().frames = frames;
        self
    }

    /// Step used once the scripted frames run out
    pub fn with_fallback(mut self, fallback: FrameStep) -> Self {
        self.script_mut().fallback = fallback;
        self
    }

    /// Time every capture attempt spends "drawing"
    pub fn with_grab_delay(mut self, delay: Duration) -> Self {
        self.script_mut().grab_delay = delay;
        self
    }

    pub fn stats(&self) -> Arc<ScriptedStats> {
        self.stats.clone()
    }

    fn script_mut(&mut self) -> &mut Script {
        Arc::make_mut(&mut self.script)
    }
}

impl RenderBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn create_renderer(&self) -> Box<dyn Renderer> {
        self.stats.renderers_created.fetch_add(1, Ordering::SeqCst);
        let live = self.stats.live_renderers.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_live_renderers.fetch_max(live, Ordering::SeqCst);

        Box::new(ScriptedRenderer {
            script: self.script.clone(),
            stats: self.stats.clone(),
            media: Arc::new(OnceLock::new()),
            load_task: None,
            held_events: None,
            cursor: 0,
            loaded: false,
        })
    }

    fn create_surface(&self) -> Box<dyn HostSurface> {
        Box::new(ScriptedSurface {
            stats: self.stats.clone(),
            attached: false,
        })
    }
}

struct ScriptedRenderer {
    script: Arc<Script>,
    stats: Arc<ScriptedStats>,
    media: Arc<OnceLock<MediaInfo>>,
    load_task: Option<JoinHandle<()>>,
    held_events: Option<EventSender>,
    cursor: usize,
    loaded: bool,
}

#[async_trait]
impl Renderer for ScriptedRenderer {
    async fn load(&mut self, _request: &ThumbnailRequest, events: EventSender) -> RenderResult<()> {
        if self.loaded {
            return Err(RenderError::invalid_state("renderer already loaded"));
        }
        self.loaded = true;
        self.stats.loads.fetch_add(1, Ordering::SeqCst);

        match self.script.load.clone() {
            ScriptedLoad::Ready { after, media } => {
                let ready = self.media.clone();
                self.load_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = ready.set(media.clone());
                    let _ = events.send(SessionEvent::Ready(media));
                }));
            }
            ScriptedLoad::Fail { after, message } => {
                self.load_task = Some(tokio::spawn(async move {
                    tokio::time::sleep(after).await;
                    let _ = events.send(SessionEvent::LoadFailed(message));
                }));
            }
            ScriptedLoad::Never => self.held_events = Some(events),
        }
        Ok(())
    }

    async fn nudge(&mut self, _offset: Duration) -> RenderResult<()> {
        self.stats.nudges.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn grab_frame(&mut self, target_width: u32) -> RenderResult<FrameGrab> {
        self.stats.grabs.fetch_add(1, Ordering::SeqCst);
        if !self.script.grab_delay.is_zero() {
            tokio::time::sleep(self.script.grab_delay).await;
        }

        let Some(media) = self.media.get() else {
            return Ok(FrameGrab::NotReady);
        };
        let step = self
            .script
            .frames
            .get(self.cursor)
            .unwrap_or(&self.script.fallback)
            .clone();
        self.cursor += 1;

        let (width, height) = media.scaled_size(target_width);
        match step {
            FrameStep::NotReady => Ok(FrameGrab::NotReady),
            FrameStep::Blank => Ok(FrameGrab::Frame(RgbImage::new(width, height))),
            FrameStep::Solid(rgb) => Ok(FrameGrab::Frame(RgbImage::from_pixel(
                width,
                height,
                Rgb(rgb),
            ))),
            FrameStep::Error(message) => Err(RenderError::invalid_output(message)),
        }
    }

    fn unload(&mut self) {
        if let Some(task) = self.load_task.take() {
            task.abort();
        }
        self.held_events = None;
    }
}

impl Drop for ScriptedRenderer {
    fn drop(&mut self) {
        self.unload();
        self.stats.live_renderers.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ScriptedSurface {
    stats: Arc<ScriptedStats>,
    attached: bool,
}

impl HostSurface for ScriptedSurface {
    fn attach(&mut self) -> RenderResult<()> {
        if !self.attached {
            self.attached = true;
            self.stats.attached_surfaces.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn detach(&mut self) {
        if std::mem::take(&mut self.attached) {
            self.stats.attached_surfaces.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSurface {
    fn drop(&mut self) {
        self.detach();
    }
}
