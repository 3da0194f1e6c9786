//! Pipeline Orchestrator
//!
//! Runs one selected link through Fetch → Mount → Install → Unmount and
//! guarantees the cleanup owed by each stage that already succeeded.
//!
//! # Stage Flow
//!
//! ```text
//! Idle
//!   ↓
//! Fetching ───────┐
//!   ↓             │
//! Mounting ───────┤ (fatal failure)
//!   ↓             ↓
//! Installing    Failed
//!   ↓
//! Unmounting
//!   ↓
//! Idle
//! ```
//!
//! Install failures (including "no packages found") are recorded but the
//! run still advances to Unmounting. An interrupt behaves the same way: a
//! mounted image is always unmounted before `run` returns. A run never
//! aborts the caller: every outcome comes back as a `PipelineReport`.

use crate::command_runner::CommandRunner;
use crate::config::PipelineConfig;
use crate::error::RepoError;
use crate::fetcher::{RemoteLink, fetch_archive};
use crate::installer::{InstallOutcome, InstallReport, Installer};
use crate::mount::MountManager;
use crate::process_guard::InterruptFlag;
use crate::scanner;
use std::fmt;
use strum::Display;
use thiserror::Error;
use tracing::{error, info, warn};

/// Stages of one pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PipelineStage {
    #[strum(serialize = "idle")]
    Idle,
    #[strum(serialize = "fetching")]
    Fetching,
    #[strum(serialize = "mounting")]
    Mounting,
    #[strum(serialize = "installing")]
    Installing,
    #[strum(serialize = "unmounting")]
    Unmounting,
    /// Absorbing state after a fatal fetch or mount failure
    #[strum(serialize = "failed")]
    Failed,
}

impl PipelineStage {
    /// The stage that follows this one on the success path.
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Idle => Some(Self::Fetching),
            Self::Fetching => Some(Self::Mounting),
            Self::Mounting => Some(Self::Installing),
            Self::Installing => Some(Self::Unmounting),
            Self::Unmounting => Some(Self::Idle),
            Self::Failed => None,
        }
    }

    /// Whether a failure in this stage stops the run.
    pub const fn is_fatal_on_failure(self) -> bool {
        matches!(self, Self::Fetching | Self::Mounting)
    }
}

/// Invalid use of the stage machine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageTransitionError {
    #[error("Cannot leave the failed state")]
    FromFailed,

    #[error("Cannot move from {from} to {to}; expected {expected}")]
    OutOfOrder {
        from: PipelineStage,
        to: PipelineStage,
        expected: PipelineStage,
    },
}

/// Tracks the current stage of a run and its history.
#[derive(Debug, Clone)]
pub struct PipelineContext {
    current: PipelineStage,
    failed_at: Option<PipelineStage>,
    history: Vec<PipelineStage>,
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineContext {
    pub fn new() -> Self {
        Self {
            current: PipelineStage::Idle,
            failed_at: None,
            history: vec![PipelineStage::Idle],
        }
    }

    pub fn current_stage(&self) -> PipelineStage {
        self.current
    }

    pub fn failed_at(&self) -> Option<PipelineStage> {
        self.failed_at
    }

    pub fn history(&self) -> &[PipelineStage] {
        &self.history
    }

    /// Move to `to`, which must be the next stage.
    pub fn transition_to(&mut self, to: PipelineStage) -> Result<(), StageTransitionError> {
        let expected = self.current.next().ok_or(StageTransitionError::FromFailed)?;
        if to != expected {
            return Err(StageTransitionError::OutOfOrder {
                from: self.current,
                to,
                expected,
            });
        }
        info!("Pipeline stage: {} -> {}", self.current, to);
        self.current = to;
        self.history.push(to);
        Ok(())
    }

    /// Record a failure in the current stage. Fatal stages move to `Failed`.
    pub fn fail(&mut self) {
        if self.current == PipelineStage::Failed {
            return;
        }
        self.failed_at.get_or_insert(self.current);
        if self.current.is_fatal_on_failure() {
            self.current = PipelineStage::Failed;
            self.history.push(PipelineStage::Failed);
        }
    }
}

/// Result of running one link through the pipeline.
#[derive(Debug)]
pub struct PipelineReport {
    pub link: RemoteLink,
    pub final_stage: PipelineStage,
    pub failed_at: Option<PipelineStage>,
    pub stage_history: Vec<PipelineStage>,
    pub install: Option<InstallReport>,
    /// Stage-level errors: fetch, mount, no artifacts, unmount, cleanup
    pub errors: Vec<RepoError>,
    pub unmounted: bool,
    pub mount_point_removed: bool,
}

impl PipelineReport {
    /// No stage failed. Per-package failures are in `install`.
    pub fn is_success(&self) -> bool {
        self.failed_at.is_none()
    }

    /// Fetch or mount failed, nothing was installed.
    pub fn is_aborted(&self) -> bool {
        self.final_stage == PipelineStage::Failed
    }

    pub fn was_interrupted(&self) -> bool {
        self.errors
            .iter()
            .any(|e| matches!(e, RepoError::Interrupted { .. }))
    }

    /// Human-readable summary for the terminal.
    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Repository image: {}", self.link)];
        match self.failed_at {
            None => lines.push("  Result: completed".to_string()),
            Some(stage) => lines.push(format!("  Result: failed while {}", stage)),
        }
        if let Some(install) = &self.install {
            lines.push(format!(
                "  Packages: {} installed, {} conflict(s) resolved, {} failed",
                install.count(InstallOutcome::Installed),
                install.count(InstallOutcome::ConflictResolved),
                install.count(InstallOutcome::Failed),
            ));
            for e in &install.errors {
                lines.push(format!("    - {}", e));
            }
        }
        for e in &self.errors {
            lines.push(format!("  Error: {}", e));
        }
        lines.join("\n")
    }
}

impl fmt::Display for PipelineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.summary())
    }
}

/// Runs links through Fetch → Mount → Install → Unmount.
pub struct Pipeline<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a PipelineConfig,
    interrupt: InterruptFlag,
}

impl<'a> Pipeline<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a PipelineConfig) -> Self {
        Self {
            runner,
            config,
            interrupt: InterruptFlag::global(),
        }
    }

    /// Watch `interrupt` instead of the process-wide flag.
    pub fn with_interrupt(mut self, interrupt: InterruptFlag) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Run the full pipeline for one catalog link.
    pub fn run(&self, raw_link: &str) -> PipelineReport {
        let link = RemoteLink::resolve(raw_link);
        let archive = self.config.archive_path();
        let mount_point = self.config.mount_point();
        let mounter = MountManager::new(
            self.runner,
            &self.config.filesystem_type,
            self.config.use_sudo,
        );

        let mut ctx = PipelineContext::new();
        let mut errors = Vec::new();
        let mut install = None;

        advance(&mut ctx, PipelineStage::Fetching);
        if let Err(e) = fetch_archive(self.runner, self.config, &link, &archive) {
            error!("Failed to download repository image: {}", e);
            errors.push(e);
            ctx.fail();
            return finish(link, ctx, install, errors, false, false);
        }

        if self.interrupt.is_raised() {
            warn!("Interrupted after download, not mounting");
            errors.push(RepoError::Interrupted {
                stage: PipelineStage::Fetching.to_string(),
            });
            ctx.fail();
            return finish(link, ctx, install, errors, false, false);
        }

        advance(&mut ctx, PipelineStage::Mounting);
        let mut session = match mounter.mount(&archive, &mount_point) {
            Ok(session) => session,
            Err(e) => {
                error!("Failed to mount repository image: {}", e);
                errors.push(e);
                ctx.fail();
                return finish(link, ctx, install, errors, false, false);
            }
        };

        advance(&mut ctx, PipelineStage::Installing);
        let installer =
            Installer::new(self.runner, self.config.use_sudo).with_interrupt(self.interrupt.clone());
        let installed = scanner::scan(session.mount_point(), &self.config.package_suffix)
            .and_then(|artifacts| installer.install(session.mount_point(), artifacts));
        match installed {
            Ok(report) if report.interrupted => {
                errors.push(RepoError::Interrupted {
                    stage: PipelineStage::Installing.to_string(),
                });
                ctx.fail();
                install = Some(report);
            }
            Ok(report) => {
                if !report.is_success() {
                    warn!("Some packages failed to install from {}", link);
                }
                install = Some(report);
            }
            Err(e) => {
                error!("Failed to install packages from repository image: {}", e);
                errors.push(e);
                ctx.fail();
            }
        }

        advance(&mut ctx, PipelineStage::Unmounting);
        let unmounted = match mounter.unmount(&mut session) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to unmount repository image: {}", e);
                errors.push(e);
                ctx.fail();
                false
            }
        };
        let mount_point_removed = match mounter.remove_mount_point(session) {
            Ok(()) => true,
            Err(e) => {
                warn!("Failed to remove mount point {}: {}", mount_point.display(), e);
                errors.push(e);
                false
            }
        };

        advance(&mut ctx, PipelineStage::Idle);
        finish(link, ctx, install, errors, unmounted, mount_point_removed)
    }
}

/// Move along the success path. The pipeline only ever requests the next
/// stage, so a refusal here is logged rather than propagated.
fn advance(ctx: &mut PipelineContext, to: PipelineStage) {
    if let Err(e) = ctx.transition_to(to) {
        warn!("Stage transition refused: {}", e);
    }
}

fn finish(
    link: RemoteLink,
    ctx: PipelineContext,
    install: Option<InstallReport>,
    errors: Vec<RepoError>,
    unmounted: bool,
    mount_point_removed: bool,
) -> PipelineReport {
    let report = PipelineReport {
        link,
        final_stage: ctx.current_stage(),
        failed_at: ctx.failed_at(),
        stage_history: ctx.history().to_vec(),
        install,
        errors,
        unmounted,
        mount_point_removed,
    };
    if report.is_success() {
        info!("Pipeline finished for {}", report.link);
    } else {
        warn!(failed_at = ?report.failed_at, "Pipeline finished with errors for {}", report.link);
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_sequence() {
        let mut stage = PipelineStage::Idle;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
            if stage == PipelineStage::Idle {
                break;
            }
        }
        assert_eq!(
            seen,
            vec![
                PipelineStage::Idle,
                PipelineStage::Fetching,
                PipelineStage::Mounting,
                PipelineStage::Installing,
                PipelineStage::Unmounting,
                PipelineStage::Idle,
            ]
        );
        assert_eq!(PipelineStage::Failed.next(), None);
    }

    #[test]
    fn test_cannot_skip_stages() {
        let mut ctx = PipelineContext::new();
        let err = ctx.transition_to(PipelineStage::Installing).unwrap_err();
        assert_eq!(
            err,
            StageTransitionError::OutOfOrder {
                from: PipelineStage::Idle,
                to: PipelineStage::Installing,
                expected: PipelineStage::Fetching,
            }
        );
        assert_eq!(ctx.current_stage(), PipelineStage::Idle);
    }

    #[test]
    fn test_fetch_failure_is_absorbing() {
        let mut ctx = PipelineContext::new();
        ctx.transition_to(PipelineStage::Fetching).unwrap();
        ctx.fail();

        assert_eq!(ctx.current_stage(), PipelineStage::Failed);
        assert_eq!(ctx.failed_at(), Some(PipelineStage::Fetching));
        assert_eq!(
            ctx.transition_to(PipelineStage::Mounting),
            Err(StageTransitionError::FromFailed)
        );
    }

    #[test]
    fn test_install_failure_keeps_progressing() {
        let mut ctx = PipelineContext::new();
        for stage in [
            PipelineStage::Fetching,
            PipelineStage::Mounting,
            PipelineStage::Installing,
        ] {
            ctx.transition_to(stage).unwrap();
        }
        ctx.fail();
        assert_eq!(ctx.current_stage(), PipelineStage::Installing);

        ctx.transition_to(PipelineStage::Unmounting).unwrap();
        ctx.fail();
        // First failure wins
        assert_eq!(ctx.failed_at(), Some(PipelineStage::Installing));
        assert!(ctx.transition_to(PipelineStage::Idle).is_ok());
    }
}
