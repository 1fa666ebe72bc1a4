//! Security utilities for path validation and sandboxing.

use crate::error::{Result, SandboxedFileError};
use std::path::{Component, Path};

/// Sets secure permissions on a directory (Unix only).
pub async fn set_secure_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o700);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|_e| SandboxedFileError::Permission {
                operation: "set secure permissions".to_string(),
                path: path.to_path_buf(),
            })?;
    }

    #[cfg(not(unix))]
    {
        if !path.exists() {
            return Err(SandboxedFileError::invalid_path(
                path,
                "Directory does not exist",
            ));
        }
    }

    Ok(())
}

/// Validates a caller-supplied entry name.
///
/// Cache entries live directly under the sandbox root, so a valid name is a
/// single normal path component: no separators, no `..`, no null bytes and
/// no leading dot (dot-prefixed names are reserved for in-flight writes).
pub fn validate_entry_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SandboxedFileError::invalid_path(
            name,
            "Entry name cannot be empty",
        ));
    }

    if name.contains('\0') {
        return Err(SandboxedFileError::invalid_path(
            name,
            "Entry name contains null bytes",
        ));
    }

    if name.starts_with('.') {
        return Err(SandboxedFileError::invalid_path(
            name,
            "Entry names starting with '.' are reserved",
        ));
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(SandboxedFileError::invalid_path(
            name,
            "Entry name must be a single path component",
        )),
    }
}

/// Validates that a resolved path is within the specified sandbox directory.
pub fn validate_path_within_sandbox(resolved_path: &Path, sandbox_base: &Path) -> Result<()> {
    let canonical_base = sandbox_base.canonicalize().map_err(|e| {
        SandboxedFileError::invalid_path(sandbox_base, format!("Failed to resolve sandbox base: {e}"))
    })?;

    let canonical_path = if resolved_path.exists() {
        resolved_path.canonicalize().map_err(|e| {
            SandboxedFileError::invalid_path(resolved_path, format!("Failed to resolve path: {e}"))
        })?
    } else {
        let parent = resolved_path.parent().ok_or_else(|| {
            SandboxedFileError::invalid_path(resolved_path, "Path has no parent directory")
        })?;
        let filename = resolved_path
            .file_name()
            .ok_or_else(|| SandboxedFileError::invalid_path(resolved_path, "Invalid filename"))?;

        parent
            .canonicalize()
            .map_err(|e| {
                SandboxedFileError::invalid_path(parent, format!("Failed to resolve parent: {e}"))
            })?
            .join(filename)
    };

    if !canonical_path.starts_with(&canonical_base) {
        return Err(SandboxedFileError::invalid_path(
            resolved_path,
            format!(
                "Path escapes sandbox: resolves to '{}' (outside '{}')",
                canonical_path.display(),
                canonical_base.display()
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entry_name() {
        assert!(validate_entry_name("abc123.jpg").is_ok());
        assert!(validate_entry_name("thumb").is_ok());

        assert!(validate_entry_name("").is_err());
        assert!(validate_entry_name("file\0.jpg").is_err());
        assert!(validate_entry_name(".hidden").is_err());
        assert!(validate_entry_name("..").is_err());
        assert!(validate_entry_name("nested/file.jpg").is_err());
        assert!(validate_entry_name("/etc/passwd").is_err());
    }

    #[tokio::test]
    async fn test_validate_path_within_sandbox() {
        let temp_dir = tempfile::tempdir().unwrap();
        let base = temp_dir.path();

        let inside = base.join("inside.jpg");
        std::fs::write(&inside, "data").unwrap();
        assert!(validate_path_within_sandbox(&inside, base).is_ok());

        // Not-yet-existing files resolve through their parent
        assert!(validate_path_within_sandbox(&base.join("pending.jpg"), base).is_ok());

        let outside_temp = tempfile::tempdir().unwrap();
        let outside = outside_temp.path().join("outside.jpg");
        std::fs::write(&outside, "data").unwrap();
        assert!(validate_path_within_sandbox(&outside, base).is_err());
    }
}
