//! Pre-flight checks for the runtime environment
//!
//! Verifies before anything is downloaded that:
//! - the external tools the pipeline calls are on `PATH`
//! - we can get root, either directly (EUID 0) or through `sudo`
//!
//! Privileged commands later run as `sudo -n` outside the terminal's
//! foreground group, so sudo credentials are cached here, in the
//! foreground, where sudo can prompt for a password.

use crate::command_runner::{CommandRunner, build_argv};
use crate::config::PipelineConfig;
use crate::error::{RepoError, Result};
use std::fmt::Write as _;
use tracing::{debug, info};

/// Result of environment verification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SanityCheckResult {
    pub missing_binaries: Vec<String>,
    pub is_root: bool,
    /// Privileged commands go through sudo, so EUID 0 is not required
    pub uses_sudo: bool,
}

impl SanityCheckResult {
    pub fn is_ok(&self) -> bool {
        self.missing_binaries.is_empty() && (self.is_root || self.uses_sudo)
    }

    /// Multi-line explanation of what failed, empty when everything passed.
    pub fn report(&self) -> String {
        let mut out = String::new();
        if !self.is_root && !self.uses_sudo {
            let _ = writeln!(out, "ERROR: Root privileges required");
            let _ = writeln!(out, "   Mounting images and installing packages needs root.");
            let _ = writeln!(out, "   Run as root, or drop --no-sudo to use sudo.");
        }
        if !self.missing_binaries.is_empty() {
            let _ = writeln!(out, "ERROR: Missing required binaries");
            for binary in &self.missing_binaries {
                let _ = writeln!(out, "   - {} (install: pacman -S {})", binary, package_for_binary(binary));
            }
        }
        out
    }
}

/// Binaries the pipeline and catalog fetch invoke with this config.
pub fn required_binaries(config: &PipelineConfig) -> Vec<String> {
    let mut binaries = vec![
        config.transfer_tool.clone(),
        "mount".to_string(),
        "umount".to_string(),
        "pacman".to_string(),
        "git".to_string(),
    ];
    if config.use_sudo {
        binaries.push("sudo".to_string());
    }
    binaries
}

fn package_for_binary(binary: &str) -> &str {
    match binary {
        "mount" | "umount" => "util-linux",
        "wget" => "wget",
        "git" => "git",
        "sudo" => "sudo",
        "pacman" => "pacman",
        other => other,
    }
}

fn binary_exists(runner: &dyn CommandRunner, name: &str) -> bool {
    runner
        .run(&build_argv(false, &["which", name]))
        .map(|output| output.success())
        .unwrap_or(false)
}

/// Perform all checks and return the result
pub fn verify_environment(runner: &dyn CommandRunner, config: &PipelineConfig) -> SanityCheckResult {
    let missing: Vec<String> = required_binaries(config)
        .into_iter()
        .filter(|binary| !binary_exists(runner, binary))
        .collect();
    debug!(?missing, "pre-flight binary check finished");

    SanityCheckResult {
        missing_binaries: missing,
        is_root: nix::unistd::geteuid().is_root(),
        uses_sudo: config.use_sudo,
    }
}

/// Cache sudo credentials with `sudo -v` when privileged commands will go
/// through sudo. No-op when running as root or without sudo.
pub fn authenticate_sudo(runner: &dyn CommandRunner, result: &SanityCheckResult) -> Result<()> {
    if !result.uses_sudo || result.is_root {
        return Ok(());
    }
    info!("Caching sudo credentials for mount, umount and pacman");
    let output = runner.run_foreground(&["sudo".to_string(), "-v".to_string()])?;
    if !output.success() {
        return Err(RepoError::command(format!(
            "sudo authentication failed ({})",
            output.failure_detail()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command_runner::{CommandOutput, ScriptedRunner};

    #[test]
    fn test_all_present_with_sudo() {
        let runner = ScriptedRunner::new();
        let result = verify_environment(&runner, &PipelineConfig::default());
        assert!(result.missing_binaries.is_empty());
        assert!(result.is_ok());
        assert!(result.report().is_empty());
        assert!(runner.was_invoked(&["which", "sudo"]));
    }

    #[test]
    fn test_missing_binary_is_reported() {
        let runner = ScriptedRunner::new();
        runner.respond(&["which", "wget"], CommandOutput::failed(1, ""));
        let result = verify_environment(&runner, &PipelineConfig::default());

        assert_eq!(result.missing_binaries, vec!["wget".to_string()]);
        assert!(!result.is_ok());
        assert!(result.report().contains("pacman -S wget"));
    }

    #[test]
    fn test_no_sudo_skips_sudo_check() {
        let mut config = PipelineConfig::default();
        config.use_sudo = false;
        assert!(!required_binaries(&config).contains(&"sudo".to_string()));
    }

    #[test]
    fn test_root_required_without_sudo() {
        let result = SanityCheckResult {
            missing_binaries: Vec::new(),
            is_root: false,
            uses_sudo: false,
        };
        assert!(!result.is_ok());
        assert!(result.report().contains("Root privileges required"));
    }

    fn checked(is_root: bool, uses_sudo: bool) -> SanityCheckResult {
        SanityCheckResult {
            missing_binaries: Vec::new(),
            is_root,
            uses_sudo,
        }
    }

    #[test]
    fn test_sudo_credentials_cached_for_regular_user() {
        let runner = ScriptedRunner::new();
        authenticate_sudo(&runner, &checked(false, true)).unwrap();
        assert_eq!(runner.calls(), vec![vec!["sudo".to_string(), "-v".to_string()]]);
    }

    #[test]
    fn test_sudo_not_needed_for_root_or_no_sudo() {
        let runner = ScriptedRunner::new();
        authenticate_sudo(&runner, &checked(true, true)).unwrap();
        authenticate_sudo(&runner, &checked(false, false)).unwrap();
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn test_sudo_authentication_failure() {
        let runner = ScriptedRunner::new();
        runner.respond(&["sudo", "-v"], CommandOutput::failed(1, "incorrect password"));
        let err = authenticate_sudo(&runner, &checked(false, true)).unwrap_err();
        assert!(matches!(err, RepoError::Command(_)));
    }
}
