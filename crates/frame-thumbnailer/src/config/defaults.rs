/// Configuration default values
///
/// All default values for configuration options live here so they can be
/// changed in one place.
// Render defaults
pub const DEFAULT_MAX_CONCURRENT_RENDERS: usize = 1;
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 100;
pub const DEFAULT_FFMPEG_COMMAND: &str = "ffmpeg";
pub const DEFAULT_FFPROBE_COMMAND: &str = "ffprobe";
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 5_000;

// Capture loop defaults
pub const DEFAULT_MAX_ATTEMPTS: u32 = 50;
pub const DEFAULT_ATTEMPT_INTERVAL_MS: u64 = 100;
pub const DEFAULT_NUDGE_EVERY: u32 = 10;
pub const DEFAULT_NUDGE_SETTLE_DELAY_MS: u64 = 300;
pub const DEFAULT_NUDGE_OFFSET_MS: u64 = 100;
pub const DEFAULT_BLANK_THRESHOLD: u8 = 4;
pub const DEFAULT_JPEG_QUALITY: u8 = 80;

// Cache defaults
pub const DEFAULT_MEMORY_CAPACITY: usize = 200;
pub const DEFAULT_DISK_PATH: &str = "./data/thumbnails";
pub const DEFAULT_DISK_ENABLED: bool = true;

// Service defaults
pub const DEFAULT_COALESCE_REQUESTS: bool = true;

// Config file
pub const DEFAULT_CONFIG_FILE: &str = "config.toml";
pub const CONFIG_FILE_ENV: &str = "FRAME_THUMBNAILER_CONFIG";
