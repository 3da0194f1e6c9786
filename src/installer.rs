//! Deduplicating Installer
//!
//! Installs every package found in a mounted image through pacman, keeping
//! one file per base name, then makes a second pass that resolves conflicts
//! with already-installed packages.
//!
//! # Passes
//!
//! 1. **Install**: `pacman -U --noconfirm <file>` for every retained file
//! 2. **Conflict**: `pacman -T <base>` for every retained file, in the same
//!    order. A non-empty answer names a conflicting package, which is
//!    refreshed from the sync repos (`pacman -Sy --noconfirm <name>`) before
//!    the local file is installed again.
//!
//! Individual failures never stop a pass. They are logged and collected in
//! the `InstallReport`. An interrupt stops both passes before the next
//! pacman call.

use crate::command_runner::{CommandRunner, build_argv};
use crate::error::{RepoError, Result};
use crate::process_guard::InterruptFlag;
use crate::scanner::PackageArtifact;
use std::path::Path;
use strum::Display;
use tracing::{error, info, warn};

/// Per-package result of an install run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum InstallOutcome {
    #[strum(serialize = "installed")]
    Installed,
    #[strum(serialize = "installed, conflict resolved")]
    ConflictResolved,
    #[strum(serialize = "failed")]
    Failed,
}

/// Keep exactly one artifact per base name.
///
/// Artifacts are ordered by base name, then by the raw bytes of the path
/// (plain string order, not `Path`'s per-component order); for each base
/// name the last one in that order wins. The result is sorted by base name, and
/// deduplicating it again returns it unchanged.
pub fn deduplicate(artifacts: Vec<PackageArtifact>) -> Vec<PackageArtifact> {
    let mut sorted = artifacts;
    sorted.sort_by(|a, b| {
        a.base_name
            .cmp(&b.base_name)
            .then_with(|| {
                a.path
                    .as_os_str()
                    .as_encoded_bytes()
                    .cmp(b.path.as_os_str().as_encoded_bytes())
            })
    });

    let mut retained: Vec<PackageArtifact> = Vec::with_capacity(sorted.len());
    for artifact in sorted {
        match retained.last_mut() {
            Some(last) if last.base_name == artifact.base_name => *last = artifact,
            _ => retained.push(artifact),
        }
    }
    retained
}

/// Everything an install run did.
#[derive(Debug, Default)]
pub struct InstallReport {
    /// Retained artifacts in install order, with their final outcome
    pub results: Vec<(PackageArtifact, InstallOutcome)>,
    /// Every failure, including soft conflict-query failures
    pub errors: Vec<RepoError>,
    /// The run was cut short by an interrupt
    pub interrupted: bool,
}

impl InstallReport {
    /// True when no hard failure was recorded.
    pub fn is_success(&self) -> bool {
        !self.interrupted && self.errors.iter().all(RepoError::is_soft)
    }

    pub fn count(&self, outcome: InstallOutcome) -> usize {
        self.results.iter().filter(|(_, o)| *o == outcome).count()
    }

    pub fn outcome_of(&self, base_name: &str) -> Option<InstallOutcome> {
        self.results
            .iter()
            .find(|(a, _)| a.base_name == base_name)
            .map(|(_, o)| *o)
    }
}

/// Drives pacman over a list of package files.
pub struct Installer<'a> {
    runner: &'a dyn CommandRunner,
    sudo: bool,
    interrupt: InterruptFlag,
}

impl<'a> Installer<'a> {
    pub fn new(runner: &'a dyn CommandRunner, sudo: bool) -> Self {
        Self {
            runner,
            sudo,
            interrupt: InterruptFlag::global(),
        }
    }

    /// Watch `interrupt` instead of the process-wide flag.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    fn interrupted(&self, report: &mut InstallReport) -> bool {
        if self.interrupt.is_raised() && !report.interrupted {
            warn!("Interrupted, skipping the remaining packages");
            report.interrupted = true;
        }
        report.interrupted
    }

    /// Deduplicate and install `artifacts`.
    ///
    /// # Errors
    ///
    /// Only `NoArtifactsFound` when the list is empty. Per-package failures
    /// are recorded in the returned report instead.
    pub fn install(&self, source: &Path, artifacts: Vec<PackageArtifact>) -> Result<InstallReport> {
        if artifacts.is_empty() {
            error!("No packages found in {}", source.display());
            return Err(RepoError::NoArtifactsFound(source.to_path_buf()));
        }

        let found = artifacts.len();
        let retained = deduplicate(artifacts);
        info!("Installing {} package(s) ({} found)", retained.len(), found);

        let mut report = InstallReport::default();

        for artifact in retained {
            if self.interrupted(&mut report) {
                break;
            }
            let outcome = match self.install_local(&artifact.path) {
                Ok(()) => InstallOutcome::Installed,
                Err(e) => {
                    error!("{}", e);
                    report.errors.push(e);
                    InstallOutcome::Failed
                }
            };
            report.results.push((artifact, outcome));
        }

        for i in 0..report.results.len() {
            if self.interrupted(&mut report) {
                break;
            }
            let (artifact, outcome) = &mut report.results[i];
            let conflict = match self.query_conflict(&artifact.base_name) {
                Ok(conflict) => conflict,
                Err(e) => {
                    warn!("{} (assuming no conflict)", e);
                    report.errors.push(e);
                    None
                }
            };
            let Some(conflict) = conflict else {
                continue;
            };

            warn!("Conflict detected with package: {}", conflict);
            if let Err(e) = self.install_remote(&conflict) {
                let e = RepoError::ConflictResolution {
                    package: artifact.base_name.clone(),
                    conflict: conflict.clone(),
                    detail: e.to_string(),
                };
                error!("{}", e);
                report.errors.push(e);
            }

            info!("Reinstalling package: {}", artifact.path.display());
            *outcome = match self.install_local(&artifact.path) {
                Ok(()) => InstallOutcome::ConflictResolved,
                Err(e) => {
                    error!("Reinstall failed: {}", e);
                    report.errors.push(e);
                    InstallOutcome::Failed
                }
            };
        }

        info!(
            installed = report.count(InstallOutcome::Installed),
            resolved = report.count(InstallOutcome::ConflictResolved),
            failed = report.count(InstallOutcome::Failed),
            "install run finished"
        );
        Ok(report)
    }

    /// `pacman -U --noconfirm <file>`
    fn install_local(&self, path: &Path) -> Result<()> {
        info!("Installing package: {}", path.display());
        let path_str = path.to_string_lossy();
        let argv = build_argv(self.sudo, &["pacman", "-U", "--noconfirm", &*path_str]);
        let output = self
            .runner
            .run(&argv)
            .map_err(|e| RepoError::install(path, e.to_string()))?;
        if !output.success() {
            return Err(RepoError::install(path, output.failure_detail()));
        }
        Ok(())
    }

    /// `pacman -T <name>`; `Ok(None)` when nothing conflicts.
    fn query_conflict(&self, package: &str) -> Result<Option<String>> {
        let argv = build_argv(self.sudo, &["pacman", "-T", package]);
        let failed = |detail: String| RepoError::ConflictQuery {
            package: package.to_string(),
            detail,
        };

        let output = self.runner.run(&argv).map_err(|e| failed(e.to_string()))?;
        if !output.success() {
            return Err(failed(output.failure_detail()));
        }

        let name = output.stdout.trim();
        Ok((!name.is_empty()).then(|| name.to_string()))
    }

    /// `pacman -Sy --noconfirm <name>`
    fn install_remote(&self, package: &str) -> Result<()> {
        info!("Resolving conflict by installing: {}", package);
        let argv = build_argv(self.sudo, &["pacman", "-Sy", "--noconfirm", package]);
        let output = self.runner.run(&argv)?;
        if !output.success() {
            return Err(RepoError::command(output.failure_detail()));
        }
        Ok(())
    }
}
