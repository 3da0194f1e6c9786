//! Archive Fetcher
//!
//! Downloads the repository image with the configured transfer tool. Google
//! Drive sharing links are rewritten to their direct-download form first.

use crate::command_runner::{CommandRunner, build_argv};
use crate::config::PipelineConfig;
use crate::error::{RepoError, Result};
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

const DRIVE_HOST: &str = "drive.google.com";

/// A download link, already rewritten into a form the transfer tool can use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLink(String);

impl RemoteLink {
    /// Resolve a raw catalog link into a fetchable one.
    pub fn resolve(raw: &str) -> Self {
        Self(normalize_link(raw.trim()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RemoteLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rewrite `...drive.google.com/...id=<ID>&...` to
/// `https://drive.google.com/uc?export=download&id=<ID>`.
/// Other links are returned unchanged.
pub fn normalize_link(raw: &str) -> String {
    if !raw.contains(DRIVE_HOST) {
        return raw.to_string();
    }

    let Some(start) = raw.find("id=") else {
        warn!("Drive link without an id= parameter, using as-is: {}", raw);
        return raw.to_string();
    };
    let id = raw[start + 3..].split('&').next().unwrap_or_default();
    if id.is_empty() {
        warn!("Drive link with an empty id= parameter, using as-is: {}", raw);
        return raw.to_string();
    }

    format!("https://{}/uc?export=download&id={}", DRIVE_HOST, id)
}

/// Download `link` to `dest`, overwriting any previous image.
pub fn fetch_archive(
    runner: &dyn CommandRunner,
    config: &PipelineConfig,
    link: &RemoteLink,
    dest: &Path,
) -> Result<()> {
    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(|e| {
                RepoError::fetch(
                    link.as_str(),
                    format!("cannot create {}: {}", parent.display(), e),
                )
            })?;
        }
    }

    let dest_str = dest.to_string_lossy();
    let mut parts = vec![config.transfer_tool.as_str()];
    if config.no_check_certificate {
        parts.push("--no-check-certificate");
    }
    parts.extend([link.as_str(), "-O", &*dest_str]);
    let argv = build_argv(config.use_sudo, &parts);

    info!("Downloading {} to {}", link, dest.display());
    let output = runner
        .run(&argv)
        .map_err(|e| RepoError::fetch(link.as_str(), e.to_string()))?;
    if !output.success() {
        return Err(RepoError::fetch(link.as_str(), output.failure_detail()));
    }

    info!("Download completed successfully.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{CommandOutput, ScriptedRunner};
    use tempfile::TempDir;

    #[test]
    fn test_drive_link_is_rewritten() {
        let raw = "https://drive.google.com/open?id=1AbC-xyz_9&usp=sharing";
        assert_eq!(
            normalize_link(raw),
            "https://drive.google.com/uc?export=download&id=1AbC-xyz_9"
        );
    }

    #[test]
    fn test_drive_link_id_at_end() {
        let raw = "https://drive.google.com/file/view?usp=drive_link&id=XYZ";
        assert_eq!(
            normalize_link(raw),
            "https://drive.google.com/uc?export=download&id=XYZ"
        );
    }

    #[test]
    fn test_other_links_unchanged() {
        let raw = "https://example.com/repos/apex.squashfs?id=5";
        assert_eq!(normalize_link(raw), raw);
    }

    #[test]
    fn test_drive_link_without_id_unchanged() {
        let raw = "https://drive.google.com/drive/folders/abc";
        assert_eq!(normalize_link(raw), raw);
    }

    #[test]
    fn test_resolve_trims_whitespace() {
        let link = RemoteLink::resolve("  https://example.com/a.squashfs \n");
        assert_eq!(link.as_str(), "https://example.com/a.squashfs");
    }

    #[test]
    fn test_fetch_invokes_transfer_tool() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::with_work_dir(dir.path());
        let runner = ScriptedRunner::new();
        let dest = config.archive_path();
        let link = RemoteLink::resolve("https://example.com/a.squashfs");

        fetch_archive(&runner, &config, &link, &dest).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0],
            vec![
                "sudo".to_string(),
                "-n".to_string(),
                "wget".to_string(),
                "--no-check-certificate".to_string(),
                "https://example.com/a.squashfs".to_string(),
                "-O".to_string(),
                dest.to_string_lossy().to_string(),
            ]
        );
    }

    #[test]
    fn test_fetch_failure_is_reported() {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::with_work_dir(dir.path());
        let runner = ScriptedRunner::new();
        runner.respond(&["wget"], CommandOutput::failed(8, "ERROR 404: Not Found."));

        let link = RemoteLink::resolve("https://example.com/missing.squashfs");
        let err = fetch_archive(&runner, &config, &link, &config.archive_path()).unwrap_err();
        match err {
            RepoError::Fetch { url, detail } => {
                assert_eq!(url, "https://example.com/missing.squashfs");
                assert!(detail.contains("404"));
            }
            other => panic!("expected fetch error, got {:?}", other),
        }
    }
}
