//! Frame validation and encoding

use image::codecs::jpeg::JpegEncoder;
use image::{ImageResult, Rgb, RgbImage};
use std::io::Cursor;

use crate::config::CaptureConfig;
use crate::errors::CaptureFailure;
use crate::models::{Thumbnail, ThumbnailFormat};

/// Rejects blank frames and serializes the rest
#[derive(Debug, Clone)]
pub struct FrameEncoder {
    format: ThumbnailFormat,
    jpeg_quality: u8,
    blank_threshold: u8,
}

impl FrameEncoder {
    pub fn new(format: ThumbnailFormat, jpeg_quality: u8, blank_threshold: u8) -> Self {
        Self {
            format,
            jpeg_quality,
            blank_threshold,
        }
    }

    pub fn format(&self) -> ThumbnailFormat {
        self.format
    }

    /// A frame is blank when both the centre pixel and the quarter-offset
    /// pixel are black (every channel at or below the threshold).
    pub fn is_blank(&self, frame: &RgbImage) -> bool {
        let (width, height) = frame.dimensions();
        if width == 0 || height == 0 {
            return true;
        }

        [(width / 2, height / 2), (width / 4, height / 4)]
            .into_iter()
            .all(|(x, y)| {
                let Rgb(channels) = *frame.get_pixel(x, y);
                channels.iter().all(|&c| c <= self.blank_threshold)
            })
    }

    pub fn encode(&self, frame: &RgbImage) -> ImageResult<Thumbnail> {
        let mut bytes = Vec::new();
        match self.format {
            ThumbnailFormat::Jpeg => {
                JpegEncoder::new_with_quality(&mut bytes, self.jpeg_quality).encode_image(frame)?
            }
            ThumbnailFormat::Png | ThumbnailFormat::Webp => {
                frame.write_to(&mut Cursor::new(&mut bytes), self.format.image_format())?
            }
        }

        Ok(Thumbnail::new(bytes, frame.width(), frame.height(), self.format))
    }

    /// Blank check followed by encoding, reported as a capture attempt outcome
    pub fn validate_and_encode(&self, frame: &RgbImage) -> Result<Thumbnail, CaptureFailure> {
        if self.is_blank(frame) {
            return Err(CaptureFailure::Blank);
        }
        self.encode(frame)
            .map_err(|e| CaptureFailure::Encode(format!("{} encoding failed: {}", self.format, e)))
    }
}

impl From<&CaptureConfig> for FrameEncoder {
    fn from(config: &CaptureConfig) -> Self {
        Self::new(
            config.output_format,
            config.jpeg_quality,
            config.blank_threshold,
        )
    }
}
