//! Centralized error handling for the thumbnailer
//!
//! # Error Categories
//!
//! - **Thumbnail Errors**: why a request produced no image (load, readiness, capture, encode)
//! - **Render Errors**: renderer backend failures (helper processes, host surfaces)
//! - **Store Errors**: disk tier failures, always downgraded to cache misses
//! - **Config Errors**: rejected configuration values

pub mod types;

pub use types::*;

/// Convenience type alias for Results using ThumbnailError
pub type ThumbnailResult<T> = Result<T, ThumbnailError>;

/// Convenience type alias for renderer Results
pub type RenderResult<T> = Result<T, RenderError>;

/// Convenience type alias for store Results
pub type StoreResult<T> = Result<T, StoreError>;
