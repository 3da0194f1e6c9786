//! squashrepo library
//!
//! Fetches a SquashFS repository image, mounts it, installs its packages
//! with pacman and tears the mount down again.

pub mod catalog;
pub mod cli;
pub mod command_runner;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod installer;
pub mod menu;
pub mod mount;
pub mod pipeline;
pub mod process_guard;
pub mod sanity;
pub mod scanner;

// Re-export main types for convenience
pub use catalog::{Catalog, CatalogLink, Category, Repository, fetch_catalog};
pub use command_runner::{CommandOutput, CommandRunner, DryRunRunner, ScriptedRunner, SystemRunner};
pub use config::PipelineConfig;
pub use error::{RepoError, Result};
pub use fetcher::{RemoteLink, fetch_archive, normalize_link};
pub use installer::{InstallOutcome, InstallReport, Installer, deduplicate};
pub use menu::{Menu, MenuState};
pub use mount::{MountManager, MountSession};
pub use pipeline::{Pipeline, PipelineContext, PipelineReport, PipelineStage};
pub use process_guard::{
    ActiveMount, CommandProcessGroup, InterruptFlag, ProcessGuard, SessionRegistry,
};
pub use scanner::{PackageArtifact, extract_base_name, scan};
