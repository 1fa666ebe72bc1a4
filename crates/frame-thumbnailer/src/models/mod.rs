//! Data models shared by the renderer, store and service layers

pub mod request;
pub mod thumbnail;

pub use request::{CacheKey, MediaKind, MediaSource, ThumbnailRequest};
pub use thumbnail::{Thumbnail, ThumbnailFormat};
