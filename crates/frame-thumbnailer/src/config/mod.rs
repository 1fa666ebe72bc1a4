use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub mod defaults;
pub mod duration_serde;

use crate::errors::ConfigError;
use crate::models::ThumbnailFormat;
use defaults::*;
use duration_serde::duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub render: RenderConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub service: ServiceConfig,
}

/// Render context admission and renderer backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Upper bound on simultaneously live render sessions
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,
    /// How long a session may take to report decodable metadata
    #[serde(with = "duration", default = "default_ready_timeout")]
    pub ready_timeout: Duration,
    #[serde(with = "duration", default = "default_ready_poll_interval")]
    pub ready_poll_interval: Duration,
    #[serde(default = "default_ffmpeg_command")]
    pub ffmpeg_command: String,
    #[serde(default = "default_ffprobe_command")]
    pub ffprobe_command: String,
    #[serde(with = "duration", default = "default_probe_timeout")]
    pub probe_timeout: Duration,
    /// Budget for a single frame grab
    #[serde(with = "duration", default = "default_frame_timeout")]
    pub frame_timeout: Duration,
}

/// Capture retry protocol and output encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(with = "duration", default = "default_attempt_interval")]
    pub attempt_interval: Duration,
    /// Nudge on the first attempt and every `nudge_every` attempts after it
    #[serde(default = "default_nudge_every")]
    pub nudge_every: u32,
    #[serde(with = "duration", default = "default_nudge_settle_delay")]
    pub nudge_settle_delay: Duration,
    /// Near-zero media offset that a nudge seeks to
    #[serde(with = "duration", default = "default_nudge_offset")]
    pub nudge_offset: Duration,
    /// Sampled pixels with every channel at or below this are "black"
    #[serde(default = "default_blank_threshold")]
    pub blank_threshold: u8,
    #[serde(default)]
    pub output_format: ThumbnailFormat,
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Memory tier bound, in entries
    #[serde(default = "default_memory_capacity")]
    pub memory_capacity: usize,
    #[serde(default = "default_disk_path")]
    pub disk_path: PathBuf,
    #[serde(default = "default_disk_enabled")]
    pub disk_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Share one render between concurrent requests for the same identity
    #[serde(default = "default_coalesce_requests")]
    pub coalesce_requests: bool,
}

fn default_max_concurrent_renders() -> usize {
    DEFAULT_MAX_CONCURRENT_RENDERS
}

fn default_ready_timeout() -> Duration {
    Duration::from_millis(DEFAULT_READY_TIMEOUT_MS)
}

fn default_ready_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_READY_POLL_INTERVAL_MS)
}

fn default_ffmpeg_command() -> String {
    DEFAULT_FFMPEG_COMMAND.to_string()
}

fn default_ffprobe_command() -> String {
    DEFAULT_FFPROBE_COMMAND.to_string()
}

fn default_probe_timeout() -> Duration {
    Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS)
}

fn default_frame_timeout() -> Duration {
    Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS)
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_attempt_interval() -> Duration {
    Duration::from_millis(DEFAULT_ATTEMPT_INTERVAL_MS)
}

fn default_nudge_every() -> u32 {
    DEFAULT_NUDGE_EVERY
}

fn default_nudge_settle_delay() -> Duration {
    Duration::from_millis(DEFAULT_NUDGE_SETTLE_DELAY_MS)
}

fn default_nudge_offset() -> Duration {
    Duration::from_millis(DEFAULT_NUDGE_OFFSET_MS)
}

fn default_blank_threshold() -> u8 {
    DEFAULT_BLANK_THRESHOLD
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_memory_capacity() -> usize {
    DEFAULT_MEMORY_CAPACITY
}

fn default_disk_path() -> PathBuf {
    PathBuf::from(DEFAULT_DISK_PATH)
}

fn default_disk_enabled() -> bool {
    DEFAULT_DISK_ENABLED
}

fn default_coalesce_requests() -> bool {
    DEFAULT_COALESCE_REQUESTS
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_renders: default_max_concurrent_renders(),
            ready_timeout: default_ready_timeout(),
            ready_poll_interval: default_ready_poll_interval(),
            ffmpeg_command: default_ffmpeg_command(),
            ffprobe_command: default_ffprobe_command(),
            probe_timeout: default_probe_timeout(),
            frame_timeout: default_frame_timeout(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            attempt_interval: default_attempt_interval(),
            nudge_every: default_nudge_every(),
            nudge_settle_delay: default_nudge_settle_delay(),
            nudge_offset: default_nudge_offset(),
            blank_threshold: default_blank_threshold(),
            output_format: ThumbnailFormat::default(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            memory_capacity: default_memory_capacity(),
            disk_path: default_disk_path(),
            disk_enabled: default_disk_enabled(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            coalesce_requests: default_coalesce_requests(),
        }
    }
}

impl Config {
    /// Load from `$FRAME_THUMBNAILER_CONFIG`, falling back to `config.toml`
    pub fn load() -> Result<Self> {
        let config_file =
            std::env::var(CONFIG_FILE_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
        Self::load_from_file(&config_file)
    }

    /// Read a TOML config file, writing the defaults out first if it does not exist
    pub fn load_from_file(config_file: impl AsRef<Path>) -> Result<Self> {
        let config_file = config_file.as_ref();
        let config = if config_file.exists() {
            let contents = std::fs::read_to_string(config_file)
                .with_context(|| format!("Failed to read {}", config_file.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", config_file.display()))?
        } else {
            let default_config = Self::default();
            let contents = toml::to_string_pretty(&default_config)?;
            std::fs::write(config_file, contents)
                .with_context(|| format!("Failed to write {}", config_file.display()))?;
            info!("Created default config file: {}", config_file.display());
            default_config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.render.max_concurrent_renders == 0 {
            return Err(ConfigError::invalid(
                "render.max_concurrent_renders",
                "must be at least 1",
            ));
        }
        if self.render.ready_poll_interval.is_zero() {
            return Err(ConfigError::invalid(
                "render.ready_poll_interval",
                "must be greater than zero",
            ));
        }
        if self.capture.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "capture.max_attempts",
                "must be at least 1",
            ));
        }
        if self.capture.nudge_every == 0 {
            return Err(ConfigError::invalid(
                "capture.nudge_every",
                "must be at least 1",
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(ConfigError::invalid(
                "capture.jpeg_quality",
                format!("{} is outside 1-100", self.capture.jpeg_quality),
            ));
        }
        if self.cache.memory_capacity == 0 {
            return Err(ConfigError::invalid(
                "cache.memory_capacity",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_capture_protocol() {
        let config = Config::default();
        assert_eq!(config.render.max_concurrent_renders, 1);
        assert_eq!(config.capture.max_attempts, 50);
        assert_eq!(config.capture.attempt_interval, Duration::from_millis(100));
        assert_eq!(config.capture.nudge_every, 10);
        assert_eq!(config.capture.nudge_settle_delay, Duration::from_millis(300));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [render]
            max_concurrent_renders = 2
            ready_timeout = "3s"

            [capture]
            output_format = "png"
            "#,
        )
        .unwrap();

        assert_eq!(config.render.max_concurrent_renders, 2);
        assert_eq!(config.render.ready_timeout, Duration::from_secs(3));
        assert_eq!(config.render.ffmpeg_command, "ffmpeg");
        assert_eq!(config.capture.output_format, ThumbnailFormat::Png);
        assert_eq!(config.capture.max_attempts, 50);
        assert_eq!(config.cache.memory_capacity, DEFAULT_MEMORY_CAPACITY);
        assert!(config.service.coalesce_requests);
    }

    #[test]
    fn test_validation_rejects_zero_capacity() {
        let mut config = Config::default();
        config.render.max_concurrent_renders = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_concurrent_renders"));

        let mut config = Config::default();
        config.capture.nudge_every = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.capture.jpeg_quality = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_writes_defaults() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("config.toml");

        let created = Config::load_from_file(&path).unwrap();
        assert!(path.exists());
        assert_eq!(created.capture.max_attempts, DEFAULT_MAX_ATTEMPTS);

        let reloaded = Config::load_from_file(&path).unwrap();
        assert_eq!(reloaded.capture.attempt_interval, created.capture.attempt_interval);
        assert_eq!(reloaded.cache.disk_path, created.cache.disk_path);
    }
}
