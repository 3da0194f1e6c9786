//! Repository catalog
//!
//! The catalog is a line-oriented text file cloned from a git repository.
//! Each non-blank line is classified on its own:
//!
//! | Line                                              | Meaning            |
//! |---------------------------------------------------|--------------------|
//! | contains `Repos` and `Squashfs` or `Iso`          | starts a category  |
//! | contains `Repos`, inside a category               | starts a repository|
//! | contains `https://`, inside a repository          | a download link    |
//!
//! Anything else is ignored. A category only appears once it has a
//! repository; names seen again are merged into the existing entry.

use crate::command_runner::{CommandRunner, build_argv};
use crate::config::PipelineConfig;
use crate::error::{RepoError, Result};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogLink {
    pub url: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Repository {
    pub name: String,
    pub links: Vec<CatalogLink>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Category {
    pub name: String,
    pub repositories: Vec<Repository>,
}

/// Category → repository → links, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Catalog {
    pub categories: Vec<Category>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LineKind {
    Category,
    Repository,
    Link,
    Other,
}

fn classify(line: &str, in_category: bool, in_repository: bool) -> LineKind {
    let has_repos = line.contains("Repos");
    if has_repos && (line.contains("Squashfs") || line.contains("Iso")) {
        LineKind::Category
    } else if has_repos && in_category {
        LineKind::Repository
    } else if line.contains("https://") && in_category && in_repository {
        LineKind::Link
    } else {
        LineKind::Other
    }
}

impl Catalog {
    /// Parse catalog text. Never fails; unrecognised lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut catalog = Catalog::default();
        let mut category: Option<String> = None;
        // (category index, repository index) of the open repository
        let mut open: Option<(usize, usize)> = None;

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            match classify(line, category.is_some(), open.is_some()) {
                LineKind::Category => {
                    category = Some(line.to_string());
                    open = None;
                }
                LineKind::Repository => {
                    let Some(category_name) = category.as_deref() else {
                        continue;
                    };
                    let ci = catalog.category_index_or_insert(category_name);
                    let repos = &mut catalog.categories[ci].repositories;
                    let ri = match repos.iter().position(|r| r.name == line) {
                        Some(ri) => ri,
                        None => {
                            repos.push(Repository {
                                name: line.to_string(),
                                links: Vec::new(),
                            });
                            repos.len() - 1
                        }
                    };
                    open = Some((ci, ri));
                }
                LineKind::Link => {
                    if let Some((ci, ri)) = open {
                        catalog.categories[ci].repositories[ri].links.push(CatalogLink {
                            url: line.to_string(),
                            label: String::new(),
                        });
                    }
                }
                LineKind::Other => debug!("ignoring catalog line: {}", line),
            }
        }

        catalog
    }

    /// Read and parse a catalog file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            RepoError::catalog(format!("Failed to open {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&text))
    }

    fn category_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(i) = self.categories.iter().position(|c| c.name == name) {
            return i;
        }
        self.categories.push(Category {
            name: name.to_string(),
            repositories: Vec::new(),
        });
        self.categories.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.categories.is_empty()
    }

    pub fn link_count(&self) -> usize {
        self.categories
            .iter()
            .flat_map(|c| &c.repositories)
            .map(|r| r.links.len())
            .sum()
    }
}

/// Clone the catalog repository afresh and return the catalog file path.
pub fn fetch_catalog(runner: &dyn CommandRunner, config: &PipelineConfig) -> Result<PathBuf> {
    let dir = &config.catalog_dir;
    let dir_str = dir.to_string_lossy();

    if dir.exists() {
        let argv = build_argv(config.use_sudo, &["rm", "-rf", &*dir_str]);
        let output = runner.run(&argv)?;
        if !output.success() {
            return Err(RepoError::catalog(format!(
                "Failed to delete {}: {}",
                dir.display(),
                output.failure_detail()
            )));
        }
        info!("Deleted existing catalog folder {}", dir.display());
    }

    let argv = build_argv(false, &["git", "clone", &config.catalog_repo_url, &*dir_str]);
    let output = runner.run(&argv)?;
    if !output.success() {
        return Err(RepoError::catalog(format!(
            "Failed to clone {}: {}",
            config.catalog_repo_url,
            output.failure_detail()
        )));
    }

    info!("Catalog repository cloned successfully.");
    Ok(config.catalog_path())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{CommandOutput, ScriptedRunner};
    use tempfile::TempDir;

    const SAMPLE: &str = "\
Apex Squashfs Repos

Apex KdeLinux Stable Repos
stable Package Database Build 21-02-2024 link 1 https://drive.google.com/open?id=AAA&usp=sharing
random note
Apex KdeLinux Testing Repos
https://example.com/testing.squashfs

Iso Repos
Spitfire Repos
https://example.com/spitfire.iso
";

    #[test]
    fn test_parse_sample() {
        let catalog = Catalog::parse(SAMPLE);
        assert_eq!(catalog.categories.len(), 2);

        let apex = &catalog.categories[0];
        assert_eq!(apex.name, "Apex Squashfs Repos");
        assert_eq!(apex.repositories.len(), 2);
        assert_eq!(apex.repositories[0].name, "Apex KdeLinux Stable Repos");
        assert_eq!(apex.repositories[0].links.len(), 1);
        assert!(apex.repositories[0].links[0].url.starts_with("stable Package Database"));
        assert_eq!(apex.repositories[0].links[0].label, "");

        assert_eq!(catalog.categories[1].name, "Iso Repos");
        assert_eq!(catalog.link_count(), 3);
    }

    #[test]
    fn test_links_before_repository_are_ignored() {
        let catalog = Catalog::parse("Apex Squashfs Repos\nhttps://example.com/orphan\n");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_repository_line_without_category_is_ignored() {
        let catalog = Catalog::parse("Lonely Repos\nhttps://example.com/a\n");
        assert!(catalog.is_empty());
    }

    #[test]
    fn test_repeated_names_merge() {
        let text = "A Squashfs Repos\nX Repos\nhttps://a/1\nB Iso Repos\nY Repos\nhttps://b/1\nA Squashfs Repos\nX Repos\nhttps://a/2\n";
        let catalog = Catalog::parse(text);
        assert_eq!(catalog.categories.len(), 2);
        assert_eq!(catalog.categories[0].repositories.len(), 1);
        assert_eq!(catalog.categories[0].repositories[0].links.len(), 2);
    }

    #[test]
    fn test_load_missing_file() {
        let err = Catalog::load(Path::new("/nonexistent/repos.txt")).unwrap_err();
        assert!(matches!(err, RepoError::Catalog(_)));
    }

    #[test]
    fn test_fetch_catalog_removes_old_clone_first() {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::with_work_dir(dir.path());
        config.catalog_dir = dir.path().join("catalog");
        fs::create_dir(&config.catalog_dir).unwrap();
        let runner = ScriptedRunner::new();

        let path = fetch_catalog(&runner, &config).unwrap();

        assert_eq!(path, config.catalog_dir.join("repos.txt"));
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0][..4], ["sudo", "-n", "rm", "-rf"]);
        assert_eq!(calls[1][..2], ["git", "clone"]);
    }

    #[test]
    fn test_fetch_catalog_clone_failure() {
        let dir = TempDir::new().unwrap();
        let mut config = PipelineConfig::with_work_dir(dir.path());
        config.catalog_dir = dir.path().join("catalog");
        let runner = ScriptedRunner::new();
        runner.respond(&["git", "clone"], CommandOutput::failed(128, "could not resolve host"));

        let err = fetch_catalog(&runner, &config).unwrap_err();
        assert!(matches!(err, RepoError::Catalog(_)));
        assert!(!runner.was_invoked(&["rm"]));
    }
}
