//! # Sandboxed File Manager
//!
//! A flat, sandboxed cache directory with atomic writes.
//!
//! All operations address entries by a single file name below the base
//! directory; names that would escape the sandbox (`..`, absolute paths,
//! separators, null bytes) are rejected before touching the filesystem.
//! Writes are staged and renamed into place so that a concurrent reader
//! never observes a partially written entry. Entries are never expired
//! automatically; only [`SandboxedManager::remove_file`] and
//! [`SandboxedManager::clear`] delete them.
//!
//! ## Basic Usage
//!
//! ```rust
//! use sandboxed_file_manager::SandboxedManager;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = SandboxedManager::builder()
//!     .base_directory("/var/cache/thumbnails")
//!     .build()
//!     .await?;
//!
//! manager.write("3f2a9c.jpg", b"...jpeg bytes...").await?;
//! let bytes = manager.read_optional("3f2a9c.jpg").await?;
//! assert!(bytes.is_some());
//!
//! manager.clear().await?;
//! # Ok(())
//! # }
//! ```
//!
//! **❌ Blocked operations:**
//! ```rust,ignore
//! // manager.write("../../../etc/passwd", "evil").await?;   // Escapes sandbox
//! // manager.write("/etc/passwd", "evil").await?;           // Absolute path
//! // manager.write("nested/file.jpg", "data").await?;       // Not a flat entry
//! ```

pub mod error;
pub mod manager;
pub mod security;

pub use error::{Result, SandboxedFileError};
pub use manager::{ManagerStats, SandboxedManager, SandboxedManagerBuilder};
