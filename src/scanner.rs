//! Package Catalog Scanner
//!
//! Walks a mounted image for package files and derives each file's base
//! name, the key used for deduplication and conflict lookup.

use crate::error::{RepoError, Result};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

/// An installable package file inside the mounted tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageArtifact {
    pub path: PathBuf,
    pub base_name: String,
}

impl PackageArtifact {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let base_name = extract_base_name(&path);
        Self { path, base_name }
    }
}

/// Strip version, release and architecture from a package file name.
///
/// The base name is everything before the first `-` that is immediately
/// followed by an ASCII digit, with at least one character in front of it.
/// Without such a marker the whole file name is returned.
///
/// ```
/// use squashrepo::scanner::extract_base_name;
/// use std::path::Path;
///
/// assert_eq!(extract_base_name(Path::new("/mnt/repo/foo-1.2.3-1-x86_64.pkg.tar.zst")), "foo");
/// assert_eq!(extract_base_name(Path::new("lib32-glibc-2.39-1-x86_64.pkg.tar.zst")), "lib32-glibc");
/// assert_eq!(extract_base_name(Path::new("nomarker.pkg.tar.zst")), "nomarker.pkg.tar.zst");
/// ```
pub fn extract_base_name(path: &Path) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string());

    let bytes = file_name.as_bytes();
    let marker = (1..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'-' && bytes[i + 1].is_ascii_digit());

    match marker {
        Some(end) => file_name[..end].to_string(),
        None => file_name,
    }
}

/// Recursively collect files under `root` whose name ends with `suffix`.
///
/// Symlinks to regular files count as packages; dangling links do not.
/// Results are in file-name order within each directory. An empty result is
/// not an error here; the installer decides what "nothing found" means.
pub fn scan(root: &Path, suffix: &str) -> Result<Vec<PackageArtifact>> {
    let mut artifacts = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            RepoError::Io(std::io::Error::other(format!(
                "failed to scan {}: {}",
                root.display(),
                e
            )))
        })?;
        if !entry.path().is_file() {
            continue;
        }
        if entry.file_name().to_string_lossy().ends_with(suffix) {
            let artifact = PackageArtifact::new(entry.path());
            debug!(path = %artifact.path.display(), base = %artifact.base_name, "found package");
            artifacts.push(artifact);
        }
    }

    Ok(artifacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_base_name_examples() {
        assert_eq!(extract_base_name(Path::new("foo-1.2.3-1-x86_64.pkg.tar.zst")), "foo");
        assert_eq!(
            extract_base_name(Path::new("nomarker.pkg.tar.zst")),
            "nomarker.pkg.tar.zst"
        );
        assert_eq!(
            extract_base_name(Path::new("xf86-video-amdgpu-23.0.0-1-x86_64.pkg.tar.zst")),
            "xf86-video-amdgpu"
        );
    }

    #[test]
    fn test_base_name_uses_file_name_only() {
        assert_eq!(
            extract_base_name(Path::new("/mnt/repo-2/x86_64/myapp-2.0-1-any.pkg.tar.zst")),
            "myapp"
        );
    }

    #[test]
    fn test_leading_marker_needs_a_prefix() {
        // "-1" at the very start cannot end an empty name
        assert_eq!(extract_base_name(Path::new("-1abc-2.pkg.tar.zst")), "-1abc");
        assert_eq!(extract_base_name(Path::new("-1")), "-1");
    }

    #[test]
    fn test_trailing_hyphen_is_not_a_marker() {
        assert_eq!(extract_base_name(Path::new("weird-")), "weird-");
    }

    #[test]
    fn test_scan_finds_nested_packages() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("x86_64/extra");
        fs::create_dir_all(&nested).unwrap();
        fs::write(dir.path().join("b-1.0-1-any.pkg.tar.zst"), b"").unwrap();
        fs::write(nested.join("a-2.0-1-x86_64.pkg.tar.zst"), b"").unwrap();
        fs::write(nested.join("a-2.0-1-x86_64.pkg.tar.zst.sig"), b"").unwrap();
        fs::write(dir.path().join("README"), b"").unwrap();

        let artifacts = scan(dir.path(), ".pkg.tar.zst").unwrap();
        let mut names: Vec<String> = artifacts.iter().map(|a| a.base_name.clone()).collect();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_scan_follows_symlinked_packages() {
        let dir = TempDir::new().unwrap();
        let pool = dir.path().join("pool");
        let root = dir.path().join("repo");
        fs::create_dir_all(&pool).unwrap();
        fs::create_dir_all(&root).unwrap();
        let target = pool.join("linked-3.1-1-x86_64.pkg.tar.zst");
        fs::write(&target, b"").unwrap();
        std::os::unix::fs::symlink(&target, root.join("linked-3.1-1-x86_64.pkg.tar.zst")).unwrap();
        std::os::unix::fs::symlink(
            pool.join("missing-1.0-1-any.pkg.tar.zst"),
            root.join("missing-1.0-1-any.pkg.tar.zst"),
        )
        .unwrap();

        let artifacts = scan(&root, ".pkg.tar.zst").unwrap();
        assert_eq!(artifacts.len(), 1);
        assert_eq!(artifacts[0].base_name, "linked");
        assert_eq!(artifacts[0].path, root.join("linked-3.1-1-x86_64.pkg.tar.zst"));
    }

    #[test]
    fn test_scan_empty_tree() {
        let dir = TempDir::new().unwrap();
        assert!(scan(dir.path(), ".pkg.tar.zst").unwrap().is_empty());
    }

    #[test]
    fn test_scan_missing_root_is_error() {
        assert!(scan(Path::new("/nonexistent/squashrepo-mount"), ".pkg.tar.zst").is_err());
    }
}
