//! Thumbnail requests and the identities derived from them

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use strum::{Display, EnumString};
use url::Url;

use crate::errors::{ThumbnailError, ThumbnailResult};

/// Where the media lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MediaSource {
    Local(PathBuf),
    Remote(Url),
}

impl MediaSource {
    /// Parse a locator string. Anything with a network scheme is remote,
    /// `file://` URLs and bare paths are local.
    pub fn parse(locator: &str) -> ThumbnailResult<Self> {
        let locator = locator.trim();
        if locator.is_empty() {
            return Err(ThumbnailError::invalid_request("empty source locator"));
        }

        match Url::parse(locator) {
            Ok(url) if url.scheme() == "file" => url
                .to_file_path()
                .map(MediaSource::Local)
                .map_err(|_| ThumbnailError::invalid_request(format!("bad file URL: {locator}"))),
            Ok(url) if Self::is_network_scheme(url.scheme()) => Ok(MediaSource::Remote(url)),
            // Windows drive letters ("C:\...") parse as a one-letter scheme
            _ => Ok(MediaSource::Local(PathBuf::from(locator))),
        }
    }

    fn is_network_scheme(scheme: &str) -> bool {
        matches!(
            scheme,
            "http" | "https" | "rtsp" | "rtmp" | "rtmps" | "hls" | "srt" | "udp" | "tcp"
        )
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, MediaSource::Remote(_))
    }

    /// Extension of the final path segment, lowercased
    pub fn extension(&self) -> Option<String> {
        let path = match self {
            MediaSource::Local(path) => path.as_path(),
            MediaSource::Remote(url) => Path::new(url.path()),
        };
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
    }
}

impl fmt::Display for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaSource::Local(path) => write!(f, "{}", path.display()),
            MediaSource::Remote(url) => write!(f, "{url}"),
        }
    }
}

/// Media type tag supplied by the media-item layer
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case", ascii_case_insensitive)]
pub enum MediaKind {
    #[default]
    Video,
    Audio,
    AnimatedImage,
}

impl MediaKind {
    /// Best guess from a file extension, for callers without a type tag
    pub fn from_extension(extension: Option<&str>) -> Self {
        match extension {
            Some("gif" | "apng") => MediaKind::AnimatedImage,
            Some("mp3" | "m4a" | "aac" | "flac" | "ogg" | "opus" | "wav") => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }

    /// Animated images are frame sequences; a single persisted frame would
    /// misrepresent them on the next load, so they only live in memory.
    pub fn persists_to_disk(&self) -> bool {
        !matches!(self, MediaKind::AnimatedImage)
    }
}

/// Stable disk-cache key: hex SHA-256 of the source identity and target width
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Local paths are canonicalized when they resolve, so every spelling of
    /// the same file shares one key.
    pub fn for_source(source: &MediaSource, target_width: u32) -> Self {
        let mut hasher = Sha256::new();
        match source {
            MediaSource::Local(path) => {
                let path = path.canonicalize().unwrap_or_else(|_| path.clone());
                let directory = path.parent().unwrap_or_else(|| Path::new(""));
                let file_name = path.file_name().unwrap_or(path.as_os_str());
                hasher.update(b"local\0");
                hasher.update(directory.to_string_lossy().as_bytes());
                hasher.update(b"\0");
                hasher.update(file_name.to_string_lossy().as_bytes());
            }
            MediaSource::Remote(url) => {
                hasher.update(b"remote\0");
                hasher.update(url.as_str().as_bytes());
            }
        }
        hasher.update(b"\0");
        hasher.update(target_width.to_be_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One thumbnail request. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThumbnailRequest {
    pub source: MediaSource,
    /// Passed through unmodified to the renderer's HTTP stack
    pub headers: Vec<(String, String)>,
    pub target_width: u32,
    /// The media item's own id, used as the memory-tier identity when present
    pub media_id: Option<String>,
    pub kind: MediaKind,
}

impl ThumbnailRequest {
    pub fn new(source: MediaSource, target_width: u32) -> Self {
        let kind = MediaKind::from_extension(source.extension().as_deref());
        Self {
            source,
            headers: Vec::new(),
            target_width,
            media_id: None,
            kind,
        }
    }

    /// Parse the locator and build a request
    pub fn parse(locator: &str, target_width: u32) -> ThumbnailResult<Self> {
        Ok(Self::new(MediaSource::parse(locator)?, target_width))
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_media_id(mut self, media_id: impl Into<String>) -> Self {
        self.media_id = Some(media_id.into());
        self
    }

    pub fn with_kind(mut self, kind: MediaKind) -> Self {
        self.kind = kind;
        self
    }

    /// Memory-tier identity: the media id (or locator) at this width
    pub fn identity(&self) -> String {
        match &self.media_id {
            Some(id) => format!("{}@{}", id, self.target_width),
            None => format!("{}@{}", self.source, self.target_width),
        }
    }

    /// Disk-tier key, absent for sources that must not be persisted
    pub fn fingerprint(&self) -> Option<CacheKey> {
        self.kind
            .persists_to_disk()
            .then(|| CacheKey::for_source(&self.source, self.target_width))
    }

    pub fn validate(&self) -> ThumbnailResult<()> {
        if self.target_width == 0 {
            return Err(ThumbnailError::invalid_request("target width must be positive"));
        }
        if let Some((name, _)) = self
            .headers
            .iter()
            .find(|(name, value)| name.trim().is_empty() || value.contains(['\r', '\n']))
        {
            return Err(ThumbnailError::invalid_request(format!(
                "malformed header: {name:?}"
            )));
        }
        Ok(())
    }
}
