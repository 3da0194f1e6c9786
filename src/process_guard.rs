//! Session bookkeeping for interrupts
//!
//! A pipeline run owns two kinds of system state that must not outlive it:
//! running external commands (`wget`, `pacman`, ...) and a mounted image.
//! Both are tracked in a process-wide `SessionRegistry`.
//!
//! When SIGINT, SIGTERM or SIGHUP arrives the handler thread raises the
//! `InterruptFlag` and stops every tracked command group. A pipeline that
//! sees the flag skips the remaining work but still unmounts and removes its
//! mount point. The handler waits for that to happen and only unmounts on
//! the pipeline's behalf if it does not finish within `CLEANUP_GRACE`.

use crate::command_runner::{CommandRunner, SystemRunner, build_argv};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How long running commands get to exit after SIGTERM
const STOP_GRACE: Duration = Duration::from_secs(3);

/// How long the pipeline gets to clean up after itself
const CLEANUP_GRACE: Duration = Duration::from_secs(30);

/// Shared "stop what you are doing" signal.
///
/// Cloning shares the flag. `InterruptFlag::global()` is the one the signal
/// handler raises; tests create private ones.
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
    signal: Arc<AtomicI32>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> Self {
        static GLOBAL: OnceLock<InterruptFlag> = OnceLock::new();
        GLOBAL.get_or_init(InterruptFlag::new).clone()
    }

    /// Mark the flag raised by `signal` (0 when not caused by a signal).
    pub fn raise(&self, signal: i32) {
        self.signal.store(signal, Ordering::SeqCst);
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Conventional shell exit status for the signal that raised the flag
    pub fn exit_code(&self) -> i32 {
        128 + self.signal.load(Ordering::SeqCst)
    }
}

/// A mounted image that still owes an unmount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveMount {
    pub mount_point: PathBuf,
    pub sudo: bool,
    /// The directory was created for this mount and is removed with it
    pub created_dir: bool,
}

/// Commands and mounts belonging to the current run.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    commands: Vec<u32>,
    mounts: Vec<ActiveMount>,
    /// Set once the running commands have been stopped
    stopped: bool,
}

impl SessionRegistry {
    /// Lock the process-wide registry. A poisoned lock is still usable:
    /// every mutation leaves the lists consistent.
    pub fn global() -> MutexGuard<'static, SessionRegistry> {
        static GLOBAL: OnceLock<Mutex<SessionRegistry>> = OnceLock::new();
        GLOBAL
            .get_or_init(Mutex::default)
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track_command(&mut self, pid: u32) {
        debug!(pid, "tracking command");
        self.commands.push(pid);
    }

    pub fn forget_command(&mut self, pid: u32) {
        self.commands.retain(|&p| p != pid);
    }

    pub fn track_mount(&mut self, mount: ActiveMount) {
        debug!(mount_point = %mount.mount_point.display(), "tracking mount");
        self.mounts.retain(|m| m.mount_point != mount.mount_point);
        self.mounts.push(mount);
    }

    pub fn forget_mount(&mut self, mount_point: &Path) {
        self.mounts.retain(|m| m.mount_point != mount_point);
    }

    pub fn tracks_mount(&self, mount_point: &Path) -> bool {
        self.mounts.iter().any(|m| m.mount_point == mount_point)
    }

    pub fn has_mounts(&self) -> bool {
        !self.mounts.is_empty()
    }

    pub fn take_mounts(&mut self) -> Vec<ActiveMount> {
        std::mem::take(&mut self.mounts)
    }

    /// Send SIGTERM to every tracked command group. Returns the groups that
    /// were signalled; the caller decides whether to escalate. Only the
    /// first call does anything.
    pub fn stop_commands(&mut self) -> Vec<u32> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        for &pid in &self.commands {
            send_to_group(pid, Signal::SIGTERM);
        }
        self.commands.clone()
    }
}

/// Commands are spawned as their own group leaders, so the PID is also the
/// group id and `sudo`'s child is reached too.
fn send_to_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    if let Err(e) = killpg(Pid::from_raw(raw), signal) {
        debug!(pid, "cannot signal command group: {}", e);
    }
}

/// Wait for signalled groups to go away, then SIGKILL the rest. Commands
/// started after the stop (the pipeline's own `umount`) are left alone.
fn reap_stopped(pids: &[u32]) {
    if pids.is_empty() {
        return;
    }
    info!("Stopping {} running command(s)...", pids.len());
    let still_running = || -> Vec<u32> {
        let registry = SessionRegistry::global();
        pids.iter()
            .copied()
            .filter(|pid| registry.commands.contains(pid))
            .collect()
    };
    let deadline = Instant::now() + STOP_GRACE;
    while Instant::now() < deadline {
        if still_running().is_empty() {
            return;
        }
        thread::sleep(Duration::from_millis(100));
    }
    for pid in still_running() {
        warn!(pid, "command ignored SIGTERM, killing it");
        send_to_group(pid, Signal::SIGKILL);
    }
}

/// Unmount and remove leftover mount points. Failures are logged; every
/// mount is attempted.
pub fn release_mounts(runner: &dyn CommandRunner, mounts: Vec<ActiveMount>) {
    for mount in mounts {
        let mount_str = mount.mount_point.to_string_lossy();
        let argv = build_argv(mount.sudo, &["umount", &*mount_str]);
        match runner.run(&argv) {
            Ok(output) if output.success() => info!("Unmounted {}", mount.mount_point.display()),
            Ok(output) => error!(
                "Failed to unmount {}: {}",
                mount.mount_point.display(),
                output.failure_detail()
            ),
            Err(e) => error!("Failed to unmount {}: {}", mount.mount_point.display(), e),
        }
        if mount.created_dir {
            if let Err(e) = fs::remove_dir(&mount.mount_point) {
                warn!("Failed to remove mount point {}: {}", mount.mount_point.display(), e);
            }
        }
    }
}

/// Stop running commands and release any mount still tracked, e.g. when
/// `main` returns early with an error.
pub struct ProcessGuard;

impl ProcessGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ProcessGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let stopped = SessionRegistry::global().stop_commands();
        reap_stopped(&stopped);
        let leftover = SessionRegistry::global().take_mounts();
        release_mounts(&SystemRunner::quiet(), leftover);
    }
}

/// Install the SIGINT/SIGTERM/SIGHUP handler thread. The process exits with
/// `128 + signo` once every tracked mount has been released.
pub fn init_signal_handlers(interrupt: InterruptFlag) -> Result<(), std::io::Error> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM, SIGHUP])?;

    thread::spawn(move || {
        let Some(sig) = signals.forever().next() else {
            return;
        };
        warn!(signal = sig, "interrupted, stopping the current run");
        interrupt.raise(sig);

        let stopped = SessionRegistry::global().stop_commands();
        reap_stopped(&stopped);

        let deadline = Instant::now() + CLEANUP_GRACE;
        while SessionRegistry::global().has_mounts() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(100));
        }
        let leftover = SessionRegistry::global().take_mounts();
        if !leftover.is_empty() {
            warn!("Pipeline did not clean up in time, unmounting directly");
            release_mounts(&SystemRunner::quiet(), leftover);
        }
        std::process::exit(interrupt.exit_code());
    });

    Ok(())
}

/// Extension trait for `std::process::Command` to isolate children
pub trait CommandProcessGroup {
    /// Make the child lead its own process group and receive SIGTERM if
    /// this process dies first.
    fn in_new_process_group(&mut self) -> &mut Self;
}

impl CommandProcessGroup for std::process::Command {
    fn in_new_process_group(&mut self) -> &mut Self {
        use nix::libc;
        use std::os::unix::process::CommandExt;
        // SAFETY: setpgid and prctl are async-signal-safe
        unsafe {
            self.pre_exec(|| {
                nix::unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0))
                    .map_err(std::io::Error::other)?;
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGTERM) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}
