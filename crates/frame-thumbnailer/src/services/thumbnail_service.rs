//! Thumbnail Service
//!
//! Orchestrates a request: cache lookup, then (on a miss) a gated render
//! session whose captured frame is written through the store. Every failure
//! is logged and surfaces as `None`.
//!
//! Concurrent requests for the same identity share one render when
//! coalescing is enabled. The shared work is only referenced weakly from the
//! in-flight map, so once every caller has gone away it is dropped, which
//! destroys its session and returns its ticket.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared, WeakShared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::capture_loop::{CaptureLoop, CapturePolicy};
use super::concurrency_gate::ConcurrencyGate;
use super::frame_encoder::FrameEncoder;
use super::render_session::{ActiveSessions, RenderSession};
use super::thumbnail_store::ThumbnailStore;
use crate::config::Config;
use crate::errors::{StoreResult, ThumbnailResult};
use crate::models::{CacheKey, Thumbnail, ThumbnailRequest};
use crate::renderer::RenderBackend;

type RenderFuture = BoxFuture<'static, Option<Thumbnail>>;

struct ServiceInner {
    backend: Arc<dyn RenderBackend>,
    gate: ConcurrencyGate,
    store: Arc<ThumbnailStore>,
    capture: CaptureLoop,
    ready_timeout: Duration,
    ready_poll_interval: Duration,
    coalesce: bool,
    active: ActiveSessions,
    in_flight: Mutex<HashMap<String, WeakShared<RenderFuture>>>,
}

/// Entry point for thumbnail generation. Cheap to clone.
#[derive(Clone)]
pub struct ThumbnailService {
    inner: Arc<ServiceInner>,
}

impl ThumbnailService {
    pub fn new(
        config: &Config,
        backend: Arc<dyn RenderBackend>,
        gate: ConcurrencyGate,
        store: Arc<ThumbnailStore>,
    ) -> Self {
        info!(
            "Thumbnail service using {} backend, {} concurrent render(s)",
            backend.name(),
            gate.capacity()
        );

        Self {
            inner: Arc::new(ServiceInner {
                backend,
                gate,
                store,
                capture: CaptureLoop::new(
                    CapturePolicy::from(&config.capture),
                    FrameEncoder::from(&config.capture),
                ),
                ready_timeout: config.render.ready_timeout,
                ready_poll_interval: config.render.ready_poll_interval,
                coalesce: config.service.coalesce_requests,
                active: ActiveSessions::new(),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Produce a thumbnail for `request`, or `None` if none could be made
    pub async fn generate(&self, request: ThumbnailRequest) -> Option<Thumbnail> {
        if let Err(e) = request.validate() {
            warn!("Rejected thumbnail request for {}: {}", request.source, e);
            return None;
        }

        let identity = request.identity();
        let fingerprint = request.fingerprint();
        if let Some(thumbnail) = self.inner.store.get(&identity, fingerprint.as_ref()).await {
            return Some(thumbnail);
        }

        if !self.inner.coalesce {
            return self
                .inner
                .clone()
                .render_and_store(request, identity, fingerprint)
                .await;
        }

        self.join_or_start(request, identity, fingerprint).await
    }

    fn join_or_start(
        &self,
        request: ThumbnailRequest,
        identity: String,
        fingerprint: Option<CacheKey>,
    ) -> Shared<RenderFuture> {
        let mut in_flight = self.inner.lock_in_flight();
        if let Some(existing) = in_flight.get(&identity).and_then(WeakShared::upgrade) {
            debug!("Joining in-flight render for {}", identity);
            return existing;
        }
        // Entries whose callers were all cancelled
        in_flight.retain(|_, weak| weak.upgrade().is_some());

        let inner = self.inner.clone();
        let key = identity.clone();
        let render: RenderFuture = async move {
            let result = inner.clone().render_and_store(request, key.clone(), fingerprint).await;
            inner.lock_in_flight().remove(&key);
            result
        }
        .boxed();

        let shared = render.shared();
        if let Some(weak) = shared.downgrade() {
            in_flight.insert(identity, weak);
        }
        shared
    }

    /// Empty both cache tiers
    pub async fn clear_all(&self) -> StoreResult<usize> {
        self.inner.store.clear_all().await
    }

    /// Stop admitting new renders; queued requests resolve to `None`
    pub fn shutdown(&self) {
        self.inner.gate.close();
    }

    /// Sessions created and not yet destroyed
    pub fn active_sessions(&self) -> usize {
        self.inner.active.count()
    }

    /// Gate tickets currently held
    pub fn outstanding_tickets(&self) -> usize {
        self.inner.gate.outstanding()
    }

    /// Distinct identities currently being rendered with coalescing
    pub fn in_flight(&self) -> usize {
        self.inner
            .lock_in_flight()
            .values()
            .filter(|weak| weak.upgrade().is_some())
            .count()
    }

    pub fn gate(&self) -> &ConcurrencyGate {
        &self.inner.gate
    }

    pub fn store(&self) -> &Arc<ThumbnailStore> {
        &self.inner.store
    }
}

impl ServiceInner {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, WeakShared<RenderFuture>>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn render_and_store(
        self: Arc<Self>,
        request: ThumbnailRequest,
        identity: String,
        fingerprint: Option<CacheKey>,
    ) -> Option<Thumbnail> {
        let started = Instant::now();
        let result = self
            .gate
            .with_permit(|| self.render(&request, &identity, fingerprint.as_ref()))
            .await;

        match result {
            Ok(thumbnail) => {
                info!(
                    "Generated {}x{} {} thumbnail for {} in {:?}",
                    thumbnail.width,
                    thumbnail.height,
                    thumbnail.format,
                    identity,
                    started.elapsed()
                );
                Some(thumbnail)
            }
            Err(e) => {
                warn!(
                    error_type = e.error_type(),
                    "Thumbnail generation failed for {} after {:?}: {}",
                    identity,
                    started.elapsed(),
                    e
                );
                None
            }
        }
    }

    /// Runs while holding a gate ticket. The session is destroyed before the
    /// ticket is returned, on every path.
    async fn render(
        &self,
        request: &ThumbnailRequest,
        identity: &str,
        fingerprint: Option<&CacheKey>,
    ) -> ThumbnailResult<Thumbnail> {
        let mut session = RenderSession::create(self.backend.as_ref(), request, &self.active)?;
        let result = self.drive(&mut session, request).await;

        if let Ok(thumbnail) = &result {
            self.store.set(identity, thumbnail.clone(), fingerprint).await;
        }
        session.destroy();
        result
    }

    async fn drive(
        &self,
        session: &mut RenderSession,
        request: &ThumbnailRequest,
    ) -> ThumbnailResult<Thumbnail> {
        session.load(request).await?;
        session
            .await_ready(self.ready_timeout, self.ready_poll_interval)
            .await?;
        self.capture.run(session, request.target_width).await
    }
}
