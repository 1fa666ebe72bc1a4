//! Bounded-concurrency thumbnail extraction for video and other streamable
//! media.
//!
//! A request is served from a two-tier cache when possible. Otherwise a
//! heavyweight render session is admitted through a FIFO concurrency gate,
//! loaded, and driven by a retrying capture loop until it yields a non-blank
//! frame, which is then written through the cache.

pub mod config;
pub mod errors;
pub mod models;
pub mod renderer;
pub mod services;

pub use config::Config;
pub use errors::{ThumbnailError, ThumbnailResult};
pub use models::{CacheKey, MediaKind, MediaSource, Thumbnail, ThumbnailFormat, ThumbnailRequest};
pub use services::{ConcurrencyGate, ThumbnailService, ThumbnailStore};
