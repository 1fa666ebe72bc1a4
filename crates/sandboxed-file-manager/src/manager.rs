//! Core sandboxed file manager implementation.

use crate::{
    error::{Result, SandboxedFileError},
    security::{set_secure_permissions, validate_entry_name, validate_path_within_sandbox},
};

use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tokio::fs;

/// Statistics about the files currently in the sandbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerStats {
    pub total_files: usize,
    pub total_size_bytes: u64,
    pub base_directory: PathBuf,
}

/// Flat, sandboxed cache directory.
///
/// Every entry is a single file directly below the base directory. Writes go
/// to a dot-prefixed staging file first and are renamed into place, so a
/// concurrent reader either sees the previous contents or the complete new
/// contents. Nothing is ever removed implicitly.
#[derive(Clone, Debug)]
pub struct SandboxedManager {
    base_dir: PathBuf,
    write_seq: Arc<AtomicU64>,
}

impl SandboxedManager {
    /// Create a new builder for configuring the manager.
    #[must_use]
    pub fn builder() -> SandboxedManagerBuilder {
        SandboxedManagerBuilder::new()
    }

    /// The sandbox root.
    #[must_use]
    pub fn base_directory(&self) -> &std::path::Path {
        &self.base_dir
    }

    /// Atomically replace (or create) an entry.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or the staging write/rename fails.
    pub async fn write<N: AsRef<str>, C: AsRef<[u8]>>(&self, name: N, contents: C) -> Result<()> {
        let file_path = self.validate_and_get_path(name.as_ref())?;
        let staging_path = self.staging_path(name.as_ref());

        if let Err(e) = fs::write(&staging_path, contents.as_ref()).await {
            let _ = fs::remove_file(&staging_path).await;
            return Err(e.into());
        }

        if let Err(e) = fs::rename(&staging_path, &file_path).await {
            let _ = fs::remove_file(&staging_path).await;
            return Err(e.into());
        }

        tracing::trace!(
            "Wrote {} bytes to {}",
            contents.as_ref().len(),
            file_path.display()
        );
        Ok(())
    }

    /// Read an entry, returning `None` when it does not exist.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or the read fails for a reason
    /// other than the file being absent.
    pub async fn read_optional<N: AsRef<str>>(&self, name: N) -> Result<Option<Vec<u8>>> {
        let file_path = self.validate_and_get_path(name.as_ref())?;

        match fs::read(&file_path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Sandboxed version of `std::fs::read`.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or the file cannot be read.
    pub async fn read<N: AsRef<str>>(&self, name: N) -> Result<Vec<u8>> {
        let file_path = self.validate_and_get_path(name.as_ref())?;
        Ok(fs::read(&file_path).await?)
    }

    /// Sandboxed version of `Path::exists`.
    ///
    /// # Errors
    /// Returns an error if the name is invalid.
    pub async fn exists<N: AsRef<str>>(&self, name: N) -> Result<bool> {
        let file_path = self.validate_and_get_path(name.as_ref())?;
        Ok(fs::try_exists(&file_path).await?)
    }

    /// Remove an entry. Returns `false` if it was already absent.
    ///
    /// # Errors
    /// Returns an error if the name is invalid or removal fails.
    pub async fn remove_file<N: AsRef<str>>(&self, name: N) -> Result<bool> {
        let file_path = self.validate_and_get_path(name.as_ref())?;

        match fs::remove_file(&file_path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List entry names, excluding in-flight staging files.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str()
                && !name.starts_with('.')
            {
                files.push(name.to_string());
            }
        }

        files.sort();
        Ok(files)
    }

    /// Remove every entry (and any leftover staging file). Returns the number
    /// of entries removed.
    ///
    /// # Errors
    /// Returns an error if the directory cannot be read or a file cannot be removed.
    pub async fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        let mut entries = fs::read_dir(&self.base_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let is_staging = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with('.'));

            match fs::remove_file(entry.path()).await {
                Ok(()) if !is_staging => removed += 1,
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            "Cleared {} entries from {}",
            removed,
            self.base_dir.display()
        );
        Ok(removed)
    }

    /// Count and size of the current entries.
    ///
    /// # Errors
    /// Returns an error if the directory or file metadata cannot be read.
    pub async fn stats(&self) -> Result<ManagerStats> {
        let mut total_files = 0;
        let mut total_size_bytes = 0;

        for name in self.list_files().await? {
            let path = self.base_dir.join(&name);
            match fs::metadata(&path).await {
                Ok(metadata) => {
                    total_files += 1;
                    total_size_bytes += metadata.len();
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Ok(ManagerStats {
            total_files,
            total_size_bytes,
            base_directory: self.base_dir.clone(),
        })
    }

    fn staging_path(&self, name: &str) -> PathBuf {
        let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
        self.base_dir
            .join(format!(".{}.{}.{}.partial", name, std::process::id(), seq))
    }

    fn validate_and_get_path(&self, name: &str) -> Result<PathBuf> {
        validate_entry_name(name)?;
        let full_path = self.base_dir.join(name);
        validate_path_within_sandbox(&full_path, &self.base_dir)?;
        Ok(full_path)
    }
}

/// Builder for configuring a `SandboxedManager`.
pub struct SandboxedManagerBuilder {
    base_directory: Option<PathBuf>,
    secure_permissions: bool,
}

impl SandboxedManagerBuilder {
    fn new() -> Self {
        Self {
            base_directory: None,
            secure_permissions: true,
        }
    }

    /// Set the base directory for file storage.
    #[must_use]
    pub fn base_directory<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.base_directory = Some(path.into());
        self
    }

    /// Restrict the base directory to the current user (Unix, default on).
    #[must_use]
    #[allow(clippy::missing_const_for_fn)]
    pub fn secure_permissions(mut self, enabled: bool) -> Self {
        self.secure_permissions = enabled;
        self
    }

    /// Build the `SandboxedManager`.
    ///
    /// # Errors
    /// Returns an error if:
    /// - Base directory is not set
    /// - Base directory cannot be created or secured
    pub async fn build(self) -> Result<SandboxedManager> {
        let base_dir = self
            .base_directory
            .ok_or_else(|| SandboxedFileError::Configuration {
                message: "Base directory is required".to_string(),
            })?;

        fs::create_dir_all(&base_dir)
            .await
            .map_err(|e| SandboxedFileError::DirectoryCreation {
                path: base_dir.clone(),
                source: e,
            })?;

        if self.secure_permissions {
            set_secure_permissions(&base_dir).await?;
        }

        tracing::info!("SandboxedManager initialized - base_dir: {:?}", base_dir);

        Ok(SandboxedManager {
            base_dir,
            write_seq: Arc::new(AtomicU64::new(0)),
        })
    }
}
