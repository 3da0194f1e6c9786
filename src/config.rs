//! Pipeline configuration that can be saved/loaded as JSON.
//!
//! Every working path the pipeline touches is derived from this struct, so a
//! run can be pointed at a temporary directory instead of `/mnt`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{RepoError, Result};

/// Configuration for one pipeline run and the catalog it is selected from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    // Session working paths
    pub work_dir: PathBuf,
    pub archive_file: String,
    pub mount_dir: String,

    // Archive contents
    pub package_suffix: String,
    pub filesystem_type: String,

    // External tools
    pub use_sudo: bool,
    pub transfer_tool: String,
    pub no_check_certificate: bool,

    // Catalog source
    pub catalog_repo_url: String,
    pub catalog_dir: PathBuf,
    pub catalog_file: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/mnt"),
            archive_file: "repo.squashfs".to_string(),
            mount_dir: "repo".to_string(),
            package_suffix: ".pkg.tar.zst".to_string(),
            filesystem_type: "squashfs".to_string(),
            use_sudo: true,
            transfer_tool: "wget".to_string(),
            no_check_certificate: true,
            catalog_repo_url: "https://github.com/claudemods/Squashfs-Iso-Repos.git".to_string(),
            catalog_dir: PathBuf::from("/tmp/Squashfs-Iso-Repos"),
            catalog_file: "repos.txt".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Configuration rooted at `work_dir`, everything else default.
    pub fn with_work_dir(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            ..Self::default()
        }
    }

    /// Where the downloaded image is written
    pub fn archive_path(&self) -> PathBuf {
        self.work_dir.join(&self.archive_file)
    }

    /// Where the image is mounted
    pub fn mount_point(&self) -> PathBuf {
        self.work_dir.join(&self.mount_dir)
    }

    /// Where the catalog text file lands after cloning
    pub fn catalog_path(&self) -> PathBuf {
        self.catalog_dir.join(&self.catalog_file)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path.as_ref(), json).map_err(|e| {
            RepoError::config(format!(
                "Failed to write configuration to {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Ok(())
    }

    /// Load configuration from a JSON file. Missing keys take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            RepoError::config(format!(
                "Failed to read configuration from {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let config: Self = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Check the configuration for values that would break a run.
    pub fn validate(&self) -> Result<()> {
        if self.work_dir.as_os_str().is_empty() {
            return Err(RepoError::validation("work_dir must not be empty"));
        }
        for (key, value) in [
            ("archive_file", &self.archive_file),
            ("mount_dir", &self.mount_dir),
            ("filesystem_type", &self.filesystem_type),
            ("transfer_tool", &self.transfer_tool),
            ("catalog_file", &self.catalog_file),
        ] {
            if value.trim().is_empty() {
                return Err(RepoError::validation(format!("{} must not be empty", key)));
            }
            if value.contains('/') && key != "transfer_tool" {
                return Err(RepoError::validation(format!(
                    "{} must be a plain name, got '{}'",
                    key, value
                )));
            }
        }
        if self.archive_file == self.mount_dir {
            return Err(RepoError::validation(
                "archive_file and mount_dir must name different entries",
            ));
        }
        if !self.package_suffix.starts_with('.') || self.package_suffix.len() < 2 {
            return Err(RepoError::validation(format!(
                "package_suffix must start with '.', got '{}'",
                self.package_suffix
            )));
        }
        if !self.catalog_repo_url.starts_with("https://") {
            return Err(RepoError::validation(format!(
                "catalog_repo_url must be an https:// URL, got '{}'",
                self.catalog_repo_url
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_paths_match_live_layout() {
        let config = PipelineConfig::default();
        assert_eq!(config.archive_path(), PathBuf::from("/mnt/repo.squashfs"));
        assert_eq!(config.mount_point(), PathBuf::from("/mnt/repo"));
        assert_eq!(
            config.catalog_path(),
            PathBuf::from("/tmp/Squashfs-Iso-Repos/repos.txt")
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("squashrepo.json");

        let mut config = PipelineConfig::with_work_dir(dir.path());
        config.use_sudo = false;
        config.save_to_file(&path).unwrap();

        let loaded = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("partial.json");
        fs::write(&path, r#"{ "work_dir": "/srv/repos", "use_sudo": false }"#).unwrap();

        let loaded = PipelineConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.work_dir, PathBuf::from("/srv/repos"));
        assert!(!loaded.use_sudo);
        assert_eq!(loaded.package_suffix, ".pkg.tar.zst");
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let err = PipelineConfig::load_from_file("/nonexistent/squashrepo.json").unwrap_err();
        assert!(matches!(err, RepoError::Config(_)));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.mount_dir = config.archive_file.clone();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.package_suffix = "pkg.tar.zst".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.mount_dir = "nested/repo".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.catalog_repo_url = "http://example.com/repos.git".to_string();
        assert!(config.validate().is_err());
    }
}
