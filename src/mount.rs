//! Mount Manager
//!
//! Mounts the downloaded image read-only at the session mount point and
//! tears it down again. A `MountSession` only exists for an image that was
//! actually mounted; it remembers whether the mount point directory was
//! created by us so cleanup removes only what this run added.

use crate::command_runner::{CommandRunner, build_argv};
use crate::error::{RepoError, Result};
use crate::process_guard::{ActiveMount, SessionRegistry};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A mounted archive image.
#[derive(Debug)]
pub struct MountSession {
    mount_point: PathBuf,
    created_dir: bool,
    mounted: bool,
}

impl MountSession {
    pub fn mount_point(&self) -> &Path {
        &self.mount_point
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn created_dir(&self) -> bool {
        self.created_dir
    }
}

/// Mounts and unmounts compressed read-only images through the runner.
pub struct MountManager<'a> {
    runner: &'a dyn CommandRunner,
    filesystem_type: &'a str,
    sudo: bool,
}

impl<'a> MountManager<'a> {
    pub fn new(runner: &'a dyn CommandRunner, filesystem_type: &'a str, sudo: bool) -> Self {
        Self {
            runner,
            filesystem_type,
            sudo,
        }
    }

    /// Mount `archive` at `mount_point`, creating the directory if needed.
    ///
    /// On failure nothing is left mounted, and a directory created by this
    /// call is removed again before the error is returned.
    pub fn mount(&self, archive: &Path, mount_point: &Path) -> Result<MountSession> {
        let created_dir = !mount_point.exists();
        if created_dir {
            fs::create_dir_all(mount_point).map_err(|e| {
                RepoError::mount(archive, mount_point, format!("cannot create mount point: {}", e))
            })?;
            info!("Created mount point directory: {}", mount_point.display());
        }

        let archive_str = archive.to_string_lossy();
        let mount_str = mount_point.to_string_lossy();
        let argv = build_argv(
            self.sudo,
            &["mount", "-t", self.filesystem_type, &*archive_str, &*mount_str],
        );

        let detail = match self.runner.run(&argv) {
            Ok(output) if output.success() => None,
            Ok(output) => Some(output.failure_detail()),
            Err(e) => Some(e.to_string()),
        };

        if let Some(detail) = detail {
            if created_dir {
                if let Err(e) = fs::remove_dir(mount_point) {
                    warn!("Failed to remove mount point {}: {}", mount_point.display(), e);
                }
            }
            return Err(RepoError::mount(archive, mount_point, detail));
        }

        info!("Mounted {} successfully at: {}", self.filesystem_type, mount_point.display());
        SessionRegistry::global().track_mount(ActiveMount {
            mount_point: mount_point.to_path_buf(),
            sudo: self.sudo,
            created_dir,
        });
        Ok(MountSession {
            mount_point: mount_point.to_path_buf(),
            created_dir,
            mounted: true,
        })
    }

    /// Unmount the session's mount point. Attempted at most once per session.
    pub fn unmount(&self, session: &mut MountSession) -> Result<()> {
        if !session.mounted {
            return Ok(());
        }
        session.mounted = false;

        let mount_str = session.mount_point.to_string_lossy();
        let argv = build_argv(self.sudo, &["umount", &*mount_str]);
        let output = self
            .runner
            .run(&argv)
            .map_err(|e| RepoError::unmount(&session.mount_point, e.to_string()))?;
        if !output.success() {
            return Err(RepoError::unmount(&session.mount_point, output.failure_detail()));
        }

        info!("Unmounted {} successfully.", session.mount_point.display());
        Ok(())
    }

    /// Remove the mount point directory. Consumes the session.
    pub fn remove_mount_point(&self, session: MountSession) -> Result<()> {
        SessionRegistry::global().forget_mount(&session.mount_point);
        if !session.mount_point.exists() {
            return Ok(());
        }
        fs::remove_dir(&session.mount_point)?;
        info!("Removed mount point {}", session.mount_point.display());
        Ok(())
    }
}
