//! Render Session
//!
//! Owns exactly one renderer context and drives it through
//! `Created -> Loading -> Ready/Failed -> Capturing -> Destroyed`. Sessions are
//! never pooled or reused; `destroy` runs on every path, at the latest from
//! `Drop`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use strum::Display;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::frame_encoder::FrameEncoder;
use crate::errors::{CaptureFailure, RenderError, RenderResult, ThumbnailError, ThumbnailResult};
use crate::models::{Thumbnail, ThumbnailRequest};
use crate::renderer::{
    EventReceiver, FrameGrab, HostSurface, MediaInfo, RenderBackend, Renderer, SessionEvent,
};

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    Created,
    Loading,
    Ready,
    Capturing,
    Failed,
    Destroyed,
}

/// Count of sessions that exist and have not been destroyed
#[derive(Debug, Clone, Default)]
pub struct ActiveSessions(Arc<AtomicUsize>);

impl ActiveSessions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    fn enter(&self) -> ActiveSessionGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveSessionGuard(self.0.clone())
    }
}

#[derive(Debug)]
struct ActiveSessionGuard(Arc<AtomicUsize>);

impl Drop for ActiveSessionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct RenderSession {
    id: u64,
    locator: String,
    state: SessionState,
    renderer: Option<Box<dyn Renderer>>,
    surface: Option<Box<dyn HostSurface>>,
    events: Option<EventReceiver>,
    media: Option<MediaInfo>,
    active: Option<ActiveSessionGuard>,
}

impl RenderSession {
    /// Instantiate a renderer context and attach it to its host surface
    pub fn create(
        backend: &dyn RenderBackend,
        request: &ThumbnailRequest,
        active: &ActiveSessions,
    ) -> ThumbnailResult<Self> {
        let renderer = backend.create_renderer();
        let mut surface = backend.create_surface();
        surface.attach()?;

        let id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            "Created render session {} ({} backend) for {}",
            id,
            backend.name(),
            request.source
        );

        Ok(Self {
            id,
            locator: request.source.to_string(),
            state: SessionState::Created,
            renderer: Some(renderer),
            surface: Some(surface),
            events: None,
            media: None,
            active: Some(active.enter()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Metadata reported by the renderer, once ready
    pub fn media(&self) -> Option<&MediaInfo> {
        self.media.as_ref()
    }

    fn renderer_mut(&mut self) -> RenderResult<&mut Box<dyn Renderer>> {
        self.renderer
            .as_mut()
            .ok_or_else(|| RenderError::invalid_state("session destroyed"))
    }

    /// Begin loading. Returns once the renderer has accepted the source;
    /// readiness arrives later through the session's event channel.
    pub async fn load(&mut self, request: &ThumbnailRequest) -> ThumbnailResult<()> {
        if self.state != SessionState::Created {
            return Err(RenderError::invalid_state(format!("cannot load in state {}", self.state)).into());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        self.state = SessionState::Loading;

        let locator = self.locator.clone();
        let result = self.renderer_mut()?.load(request, tx).await;
        if let Err(e) = result {
            self.state = SessionState::Failed;
            return Err(ThumbnailError::load_failure(locator, e.to_string()));
        }

        trace!("Render session {} loading", self.id);
        Ok(())
    }

    /// Poll the event channel every `poll_interval` until the renderer reports
    /// ready, reports failure, or `timeout` elapses.
    pub async fn await_ready(
        &mut self,
        timeout: Duration,
        poll_interval: Duration,
    ) -> ThumbnailResult<MediaInfo> {
        if self.state != SessionState::Loading {
            return Err(RenderError::invalid_state(format!("cannot await readiness in state {}", self.state)).into());
        }

        let deadline = Instant::now() + timeout;
        loop {
            let event = match self.events.as_mut() {
                Some(events) => events.try_recv(),
                None => Err(TryRecvError::Disconnected),
            };

            match event {
                Ok(SessionEvent::Ready(info)) => {
                    debug!(
                        "Render session {} ready: {}x{}",
                        self.id, info.width, info.height
                    );
                    self.state = SessionState::Ready;
                    self.media = Some(info.clone());
                    return Ok(info);
                }
                Ok(SessionEvent::LoadFailed(message)) => {
                    self.state = SessionState::Failed;
                    return Err(ThumbnailError::load_failure(self.locator.clone(), message));
                }
                Ok(SessionEvent::Destroyed) | Err(TryRecvError::Disconnected) => {
                    self.state = SessionState::Failed;
                    return Err(ThumbnailError::load_failure(
                        self.locator.clone(),
                        "renderer went away before becoming ready",
                    ));
                }
                Err(TryRecvError::Empty) => {}
            }

            let now = Instant::now();
            if now >= deadline {
                self.state = SessionState::Failed;
                return Err(ThumbnailError::ReadyTimeout {
                    locator: self.locator.clone(),
                    waited: timeout,
                });
            }
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// One atomic check-and-capture attempt
    pub async fn capture(
        &mut self,
        target_width: u32,
        encoder: &FrameEncoder,
    ) -> Result<Thumbnail, CaptureFailure> {
        if !matches!(self.state, SessionState::Ready | SessionState::Capturing) {
            return Err(CaptureFailure::Renderer(format!(
                "cannot capture in state {}",
                self.state
            )));
        }
        self.state = SessionState::Capturing;

        let renderer = self
            .renderer_mut()
            .map_err(|e| CaptureFailure::Renderer(e.to_string()))?;
        match renderer.grab_frame(target_width).await {
            Ok(FrameGrab::Frame(frame)) => encoder.validate_and_encode(&frame),
            Ok(FrameGrab::NotReady) => Err(CaptureFailure::NotReady),
            Err(e) => Err(CaptureFailure::Renderer(e.to_string())),
        }
    }

    /// Seek near the start and resume playback
    pub async fn nudge(&mut self, offset: Duration) -> RenderResult<()> {
        self.renderer_mut()?.nudge(offset).await
    }

    /// Tear down: stop listening for events, unload and drop the renderer,
    /// detach the surface. Synchronous and idempotent.
    pub fn destroy(&mut self) {
        if self.state == SessionState::Destroyed {
            return;
        }
        let previous = self.state;

        self.events = None;
        if let Some(mut renderer) = self.renderer.take() {
            renderer.unload();
        }
        if let Some(mut surface) = self.surface.take() {
            surface.detach();
        }
        self.state = SessionState::Destroyed;
        self.active = None;

        debug!("Render session {} destroyed (was {})", self.id, previous);
    }
}

impl Drop for RenderSession {
    fn drop(&mut self) {
        if self.state != SessionState::Destroyed {
            debug!("Render session {} dropped before destroy", self.id);
            self.destroy();
        }
    }
}

impl std::fmt::Debug for RenderSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderSession")
            .field("id", &self.id)
            .field("locator", &self.locator)
            .field("state", &self.state)
            .field("media", &self.media)
            .finish()
    }
}
