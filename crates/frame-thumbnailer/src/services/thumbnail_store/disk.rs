//! Persistent on-disk tier
//!
//! Entries are plain image files named `<fingerprint>.<ext>` in a flat
//! sandboxed directory. Dimensions and format are recovered from the image
//! header on read, so no side metadata is kept. Entries are never expired.

use sandboxed_file_manager::{ManagerStats, SandboxedManager};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use crate::errors::{StoreError, StoreResult};
use crate::models::{CacheKey, Thumbnail, ThumbnailFormat};

const LOOKUP_ORDER: [ThumbnailFormat; 3] = [
    ThumbnailFormat::Jpeg,
    ThumbnailFormat::Png,
    ThumbnailFormat::Webp,
];

#[derive(Debug, Clone)]
pub struct DiskTier {
    manager: SandboxedManager,
}

impl DiskTier {
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let manager = SandboxedManager::builder()
            .base_directory(path.as_ref())
            .build()
            .await?;
        debug!(
            "Opened thumbnail disk tier at {}",
            manager.base_directory().display()
        );
        Ok(Self { manager })
    }

    pub fn base_directory(&self) -> &Path {
        self.manager.base_directory()
    }

    fn entry_name(key: &CacheKey, format: ThumbnailFormat) -> String {
        format!("{}.{}", key, format.extension())
    }

    /// Read an entry. A corrupt entry is removed and reported as `Corrupt`.
    pub async fn get(&self, key: &CacheKey) -> StoreResult<Option<Thumbnail>> {
        for format in LOOKUP_ORDER {
            let name = Self::entry_name(key, format);
            let Some(bytes) = self.manager.read_optional(&name).await? else {
                continue;
            };

            return match decode_header(&bytes) {
                Ok((width, height, stored_format)) if stored_format == format => {
                    Ok(Some(Thumbnail::new(bytes, width, height, format)))
                }
                Ok((_, _, stored_format)) => {
                    self.discard(&name).await;
                    Err(StoreError::Corrupt {
                        entry: name,
                        message: format!("contains {stored_format} data"),
                    })
                }
                Err(message) => {
                    self.discard(&name).await;
                    Err(StoreError::Corrupt {
                        entry: name,
                        message,
                    })
                }
            };
        }
        Ok(None)
    }

    /// Write an entry atomically, replacing any copy stored in another format
    pub async fn put(&self, key: &CacheKey, thumbnail: &Thumbnail) -> StoreResult<()> {
        let name = Self::entry_name(key, thumbnail.format);
        self.manager.write(&name, &thumbnail.bytes).await?;

        for format in LOOKUP_ORDER.into_iter().filter(|f| *f != thumbnail.format) {
            self.manager
                .remove_file(Self::entry_name(key, format))
                .await?;
        }
        Ok(())
    }

    /// Remove every entry, returning how many there were
    pub async fn clear(&self) -> StoreResult<usize> {
        Ok(self.manager.clear().await?)
    }

    pub async fn stats(&self) -> StoreResult<ManagerStats> {
        Ok(self.manager.stats().await?)
    }

    async fn discard(&self, name: &str) {
        if let Err(e) = self.manager.remove_file(name).await {
            warn!("Failed to remove corrupt cache entry {}: {}", name, e);
        }
    }
}

fn decode_header(bytes: &[u8]) -> Result<(u32, u32, ThumbnailFormat), String> {
    let reader = image::ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| e.to_string())?;
    let format = reader
        .format()
        .and_then(ThumbnailFormat::from_image_format)
        .ok_or_else(|| "unrecognised image data".to_string())?;
    let (width, height) = reader.into_dimensions().map_err(|e| e.to_string())?;
    Ok((width, height, format))
}
