//! Encoded thumbnail images

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Compressed output format for thumbnails
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ThumbnailFormat {
    #[default]
    Jpeg,
    Png,
    Webp,
}

impl ThumbnailFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "jpg",
            ThumbnailFormat::Png => "png",
            ThumbnailFormat::Webp => "webp",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "image/jpeg",
            ThumbnailFormat::Png => "image/png",
            ThumbnailFormat::Webp => "image/webp",
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            ThumbnailFormat::Jpeg => image::ImageFormat::Jpeg,
            ThumbnailFormat::Png => image::ImageFormat::Png,
            ThumbnailFormat::Webp => image::ImageFormat::WebP,
        }
    }

    pub fn from_image_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ThumbnailFormat::Jpeg),
            image::ImageFormat::Png => Some(ThumbnailFormat::Png),
            image::ImageFormat::WebP => Some(ThumbnailFormat::Webp),
            _ => None,
        }
    }
}

/// An encoded thumbnail. Cloning is cheap; the bytes are reference counted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Thumbnail {
    pub bytes: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: ThumbnailFormat,
}

impl Thumbnail {
    pub fn new(bytes: impl Into<Bytes>, width: u32, height: u32, format: ThumbnailFormat) -> Self {
        Self {
            bytes: bytes.into(),
            width,
            height,
            format,
        }
    }

    /// Size of the encoded image in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
