//! Capture Loop
//!
//! The renderer cannot be asked for "frame N", so a thumbnail is obtained by
//! repeatedly checking for a drawable, non-blank frame. Playback is nudged on
//! the first attempt and every `nudge_every` attempts after it, in case the
//! decoder stalled before producing anything. Every failure is retryable;
//! `max_attempts` is the only ceiling.

use std::time::Duration;
use tracing::{debug, trace};

use super::frame_encoder::FrameEncoder;
use super::render_session::RenderSession;
use crate::config::CaptureConfig;
use crate::errors::{CaptureFailure, ThumbnailError, ThumbnailResult};
use crate::models::Thumbnail;

/// Retry budget and pacing for one capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePolicy {
    pub max_attempts: u32,
    pub attempt_interval: Duration,
    pub nudge_every: u32,
    pub nudge_settle_delay: Duration,
    pub nudge_offset: Duration,
}

impl CapturePolicy {
    /// Attempts are numbered from zero
    pub fn should_nudge(&self, attempt: u32) -> bool {
        self.nudge_every > 0 && attempt % self.nudge_every == 0
    }

    /// Longest time spent waiting, excluding time spent inside the renderer
    pub fn worst_case_delay(&self) -> Duration {
        let nudges = if self.nudge_every == 0 {
            0
        } else {
            self.max_attempts.div_ceil(self.nudge_every)
        };
        self.attempt_interval * self.max_attempts.saturating_sub(1)
            + self.nudge_settle_delay * nudges
    }
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::from(&CaptureConfig::default())
    }
}

impl From<&CaptureConfig> for CapturePolicy {
    fn from(config: &CaptureConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            attempt_interval: config.attempt_interval,
            nudge_every: config.nudge_every,
            nudge_settle_delay: config.nudge_settle_delay,
            nudge_offset: config.nudge_offset,
        }
    }
}

/// Drives a ready session to a validated, encoded frame
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    policy: CapturePolicy,
    encoder: FrameEncoder,
}

impl CaptureLoop {
    pub fn new(policy: CapturePolicy, encoder: FrameEncoder) -> Self {
        Self { policy, encoder }
    }

    pub fn policy(&self) -> &CapturePolicy {
        &self.policy
    }

    pub async fn run(
        &self,
        session: &mut RenderSession,
        target_width: u32,
    ) -> ThumbnailResult<Thumbnail> {
        let max_attempts = self.policy.max_attempts;
        let mut last_failure = CaptureFailure::NotReady;

        for attempt in 0..max_attempts {
            if self.policy.should_nudge(attempt) {
                if let Err(e) = session.nudge(self.policy.nudge_offset).await {
                    debug!("Nudge before attempt {} failed (ignored): {}", attempt + 1, e);
                }
                tokio::time::sleep(self.policy.nudge_settle_delay).await;
            }

            match session.capture(target_width, &self.encoder).await {
                Ok(thumbnail) => {
                    debug!(
                        "Captured {}x{} frame on attempt {} of {} ({} bytes)",
                        thumbnail.width,
                        thumbnail.height,
                        attempt + 1,
                        max_attempts,
                        thumbnail.len()
                    );
                    return Ok(thumbnail);
                }
                Err(failure) => {
                    trace!(
                        "Capture attempt {} of {} failed: {}",
                        attempt + 1,
                        max_attempts,
                        failure
                    );
                    last_failure = failure;
                }
            }

            if attempt + 1 < max_attempts {
                tokio::time::sleep(self.policy.attempt_interval).await;
            }
        }

        match last_failure {
            CaptureFailure::Encode(message) => Err(ThumbnailError::EncodeFailure {
                attempts: max_attempts,
                message,
            }),
            last_failure => Err(ThumbnailError::CaptureExhausted {
                attempts: max_attempts,
                last_failure,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ThumbnailFormat, ThumbnailRequest};
    use crate::renderer::{FrameStep, MediaInfo, ScriptedBackend};
    use crate::services::render_session::ActiveSessions;
    use tokio::time::Instant;

    async fn ready_session(backend: &ScriptedBackend, active: &ActiveSessions) -> RenderSession {
        let request = ThumbnailRequest::parse("/media/clip.mp4", 200).unwrap();
        let mut session = RenderSession::create(backend, &request, active).unwrap();
        session.load(&request).await.unwrap();
        session
            .await_ready(Duration::from_secs(1), Duration::from_millis(10))
            .await
            .unwrap();
        session
    }

    fn capture_loop() -> CaptureLoop {
        CaptureLoop::new(
            CapturePolicy::default(),
            FrameEncoder::new(ThumbnailFormat::Png, 80, 4),
        )
    }

    #[test]
    fn test_nudge_schedule() {
        let policy = CapturePolicy::default();
        let nudged: Vec<u32> = (0..50).filter(|&i| policy.should_nudge(i)).collect();
        assert_eq!(nudged, vec![0, 10, 20, 30, 40]);
    }

    #[test]
    fn test_worst_case_delay_with_defaults() {
        let policy = CapturePolicy::default();
        assert_eq!(policy.worst_case_delay(), Duration::from_millis(6400));

        let bound = policy.attempt_interval * policy.max_attempts
            + policy.nudge_settle_delay * (policy.max_attempts / policy.nudge_every);
        assert!(policy.worst_case_delay() <= bound);
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_blank_exhausts_within_bound() {
        let backend = ScriptedBackend::ready(MediaInfo::new(1920, 1080)).with_fallback(FrameStep::Blank);
        let stats = backend.stats();
        let active = ActiveSessions::new();
        let mut session = ready_session(&backend, &active).await;
        let capture = capture_loop();

        let started = Instant::now();
        let err = capture.run(&mut session, 200).await.unwrap_err();
        let elapsed = started.elapsed();

        match err {
            ThumbnailError::CaptureExhausted {
                attempts,
                last_failure,
            } => {
                assert_eq!(attempts, 50);
                assert_eq!(last_failure, CaptureFailure::Blank);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(stats.grabs(), 50);
        assert_eq!(stats.nudges(), 5);
        assert_eq!(elapsed, capture.policy().worst_case_delay());
        assert!(elapsed <= Duration::from_millis(50 * 100 + 5 * 300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_transient_failures() {
        let backend = ScriptedBackend::ready(MediaInfo::new(640, 480)).with_frames(vec![
            FrameStep::NotReady,
            FrameStep::Blank,
            FrameStep::Error("decoder hiccup".to_string()),
            FrameStep::Solid([90, 160, 40]),
        ]);
        let stats = backend.stats();
        let active = ActiveSessions::new();
        let mut session = ready_session(&backend, &active).await;

        let started = Instant::now();
        let thumbnail = capture_loop().run(&mut session, 200).await.unwrap();

        assert_eq!((thumbnail.width, thumbnail.height), (200, 150));
        assert_eq!(stats.grabs(), 4);
        assert_eq!(stats.nudges(), 1);
        // One settle delay plus three retry intervals
        assert_eq!(started.elapsed(), Duration::from_millis(300 + 3 * 100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_encode_errors_surface_as_encode_failure() {
        // JPEG cannot encode frames wider than 65535 pixels
        let backend = ScriptedBackend::ready(MediaInfo::new(70_000, 1));
        let stats = backend.stats();
        let active = ActiveSessions::new();
        let mut session = ready_session(&backend, &active).await;

        let policy = CapturePolicy {
            max_attempts: 3,
            ..CapturePolicy::default()
        };
        let capture = CaptureLoop::new(policy, FrameEncoder::new(ThumbnailFormat::Jpeg, 80, 4));
        let err = capture.run(&mut session, 70_000).await.unwrap_err();

        assert!(matches!(err, ThumbnailError::EncodeFailure { attempts: 3, .. }));
        assert_eq!(err.error_type(), "encode_failure");
        assert_eq!(stats.grabs(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_renderer_errors_are_retried_until_exhausted() {
        let backend = ScriptedBackend::ready(MediaInfo::new(640, 480))
            .with_fallback(FrameStep::Error("no surface".to_string()));
        let active = ActiveSessions::new();
        let mut session = ready_session(&backend, &active).await;

        let policy = CapturePolicy {
            max_attempts: 3,
            ..CapturePolicy::default()
        };
        let capture = CaptureLoop::new(policy, FrameEncoder::new(ThumbnailFormat::Jpeg, 80, 4));
        let err = capture.run(&mut session, 200).await.unwrap_err();
        assert!(matches!(
            err,
            ThumbnailError::CaptureExhausted {
                attempts: 3,
                last_failure: CaptureFailure::Renderer(_)
            }
        ));
    }
}
