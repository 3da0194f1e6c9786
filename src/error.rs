//! Error handling module for squashrepo
//!
//! Provides centralized error handling with proper error types using thiserror.
//! One variant per pipeline failure kind, plus the ambient I/O, JSON and
//! configuration errors.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for squashrepo
#[derive(Error, Debug)]
pub enum RepoError {
    /// The archive image could not be downloaded
    #[error("Download failed for {url}: {detail}")]
    Fetch { url: String, detail: String },

    /// The archive image could not be mounted
    #[error("Failed to mount {} at {}: {detail}", .archive.display(), .mount_point.display())]
    Mount {
        archive: PathBuf,
        mount_point: PathBuf,
        detail: String,
    },

    /// The mounted tree contained no package files
    #[error("No packages found under {}", .0.display())]
    NoArtifactsFound(PathBuf),

    /// A single package failed to install
    #[error("Failed to install package {}: {detail}", .path.display())]
    Install { path: PathBuf, detail: String },

    /// The conflict query tool failed to run (soft failure)
    #[error("Failed to check for conflicting packages of {package}: {detail}")]
    ConflictQuery { package: String, detail: String },

    /// A detected conflict could not be resolved
    #[error("Failed to resolve conflict {conflict} for package {package}: {detail}")]
    ConflictResolution {
        package: String,
        conflict: String,
        detail: String,
    },

    /// The mount point could not be unmounted
    #[error("Failed to unmount {}: {detail}", .mount_point.display())]
    Unmount { mount_point: PathBuf, detail: String },

    /// The run was stopped by SIGINT/SIGTERM/SIGHUP
    #[error("Interrupted before {stage} finished")]
    Interrupted { stage: String },

    /// Catalog download or parsing errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// An external command could not be spawned
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (config values, user input)
    #[error("Validation error: {0}")]
    Validation(String),

    /// IO errors (directory creation, file reads)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for squashrepo operations
pub type Result<T> = std::result::Result<T, RepoError>;

// Convenient error constructors
impl RepoError {
    /// Create a download error
    pub fn fetch(url: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::Fetch {
            url: url.into(),
            detail: detail.into(),
        }
    }

    /// Create a mount error
    pub fn mount(archive: &Path, mount_point: &Path, detail: impl Into<String>) -> Self {
        Self::Mount {
            archive: archive.to_path_buf(),
            mount_point: mount_point.to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Create a per-package install error
    pub fn install(path: &Path, detail: impl Into<String>) -> Self {
        Self::Install {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Create an unmount error
    pub fn unmount(mount_point: &Path, detail: impl Into<String>) -> Self {
        Self::Unmount {
            mount_point: mount_point.to_path_buf(),
            detail: detail.into(),
        }
    }

    /// Create a catalog error
    pub fn catalog(msg: impl Into<String>) -> Self {
        Self::Catalog(msg.into())
    }

    /// Create a command spawn error
    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Soft failures are reported but never change the outcome of a run.
    pub fn is_soft(&self) -> bool {
        matches!(self, Self::ConflictQuery { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = RepoError::config("work_dir is empty");
        assert_eq!(err.to_string(), "Configuration error: work_dir is empty");

        let err = RepoError::mount(Path::new("/mnt/repo.squashfs"), Path::new("/mnt/repo"), "exit code 32");
        assert_eq!(
            err.to_string(),
            "Failed to mount /mnt/repo.squashfs at /mnt/repo: exit code 32"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: RepoError = io_err.into();
        assert!(matches!(err, RepoError::Io(_)));
    }

    #[test]
    fn test_only_conflict_query_is_soft() {
        let soft = RepoError::ConflictQuery {
            package: "foo".to_string(),
            detail: "pacman missing".to_string(),
        };
        assert!(soft.is_soft());
        assert!(!RepoError::install(Path::new("/x.pkg.tar.zst"), "boom").is_soft());
        assert!(!RepoError::NoArtifactsFound(PathBuf::from("/mnt/repo")).is_soft());
    }
}
