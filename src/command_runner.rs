//! Execution seam for external tools
//!
//! Every component that shells out (`wget`, `mount`, `umount`, `pacman`,
//! `git`) goes through the `CommandRunner` trait. Production uses
//! `SystemRunner`, `--dry-run` uses `DryRunRunner`, and tests script the
//! responses with `ScriptedRunner`.

use crate::error::{RepoError, Result};
use crate::process_guard::{CommandProcessGroup, InterruptFlag, SessionRegistry};
use std::io::{self, Read, Write};
use std::process::{Command, Stdio};
use std::sync::Mutex;
use std::thread;
use tracing::{debug, info};

/// Output from one external command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    /// Exit code (None if terminated by signal).
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    /// Successful exit with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            exit_code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Non-zero exit with the given stderr.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// One-line description of a failure, for error messages.
    pub fn failure_detail(&self) -> String {
        let code = match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            code
        } else {
            format!("{}: {}", code, stderr)
        }
    }
}

/// Capability to run an external command to completion.
///
/// `Err` means the command could not be started at all; a command that ran
/// and failed is an `Ok` with a non-zero exit code.
pub trait CommandRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput>;

    /// Run a command that may talk to the user on the terminal (a password
    /// prompt). Nothing is captured.
    fn run_foreground(&self, argv: &[String]) -> Result<CommandOutput> {
        self.run(argv)
    }
}

/// Build an argv, prefixed with `sudo -n` when the command needs privilege.
///
/// Commands run outside the terminal's foreground group, where a password
/// prompt would stop them. `-n` makes sudo fail instead; credentials are
/// cached up front by the pre-flight `sudo -v`.
pub fn build_argv(sudo: bool, parts: &[&str]) -> Vec<String> {
    let mut argv = Vec::with_capacity(parts.len() + 2);
    if sudo {
        argv.push("sudo".to_string());
        argv.push("-n".to_string());
    }
    argv.extend(parts.iter().map(|p| p.to_string()));
    argv
}

/// Runs real processes, each leading its own process group and tracked in
/// the `SessionRegistry` while it runs.
///
/// Output is captured for the caller and, unless the runner is quiet,
/// echoed to the terminal as it arrives so download and install progress
/// stays visible.
#[derive(Debug, Clone, Copy)]
pub struct SystemRunner {
    echo: bool,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self { echo: true }
    }

    /// Capture output without echoing it, for lookups like `which`.
    pub fn quiet() -> Self {
        Self { echo: false }
    }
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

/// Copy everything from `source` into a buffer, echoing each chunk to
/// `sink` when there is one.
fn spawn_tee<R, W>(mut source: R, mut sink: Option<W>) -> thread::JoinHandle<Vec<u8>>
where
    R: Read + Send + 'static,
    W: Write + Send + 'static,
{
    thread::spawn(move || {
        let mut captured = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match source.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    captured.extend_from_slice(&chunk[..n]);
                    if let Some(sink) = sink.as_mut() {
                        let _ = sink.write_all(&chunk[..n]);
                        let _ = sink.flush();
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            }
        }
        captured
    })
}

impl CommandRunner for SystemRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RepoError::command("empty command line"))?;

        info!("Executing command: {}", argv.join(" "));

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .in_new_process_group()
            .spawn()
            .map_err(|e| RepoError::command(format!("failed to spawn {}: {}", program, e)))?;
        let pid = child.id();
        SessionRegistry::global().track_command(pid);

        let stdout = child
            .stdout
            .take()
            .map(|out| spawn_tee(out, self.echo.then(io::stdout)));
        let stderr = child
            .stderr
            .take()
            .map(|err| spawn_tee(err, self.echo.then(io::stderr)));

        let status = child.wait();
        SessionRegistry::global().forget_command(pid);
        let status =
            status.map_err(|e| RepoError::command(format!("failed waiting for {}: {}", program, e)))?;

        let collect = |handle: Option<thread::JoinHandle<Vec<u8>>>| {
            let bytes = handle
                .map(|h| h.join().unwrap_or_default())
                .unwrap_or_default();
            String::from_utf8_lossy(&bytes).to_string()
        };
        let result = CommandOutput {
            exit_code: status.code(),
            stdout: collect(stdout),
            stderr: collect(stderr),
        };
        debug!(program = %program, exit_code = ?result.exit_code, "command finished");
        Ok(result)
    }

    fn run_foreground(&self, argv: &[String]) -> Result<CommandOutput> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| RepoError::command("empty command line"))?;

        info!("Executing command: {}", argv.join(" "));
        let status = Command::new(program)
            .args(args)
            .status()
            .map_err(|e| RepoError::command(format!("failed to run {}: {}", program, e)))?;
        Ok(CommandOutput {
            exit_code: status.code(),
            ..Default::default()
        })
    }
}

/// Logs commands instead of running them; every command "succeeds".
#[derive(Debug, Default, Clone, Copy)]
pub struct DryRunRunner;

impl CommandRunner for DryRunRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        info!("[dry-run] would execute: {}", argv.join(" "));
        Ok(CommandOutput::ok(""))
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Output(CommandOutput),
    SpawnError(String),
    /// Raise the flag and report the command as killed by SIGINT
    Interrupt(InterruptFlag),
}

#[derive(Debug)]
struct Rule {
    pattern: Vec<String>,
    reply: Reply,
    once: bool,
}

/// Test double that records every argv and answers from scripted rules.
///
/// A rule matches when the argv, with or without its leading `sudo -n`,
/// starts with the rule's pattern. The first matching rule answers; rules added
/// with `*_once` are consumed when used. Unmatched commands succeed with
/// empty output.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, pattern: &[&str], reply: Reply, once: bool) -> &Self {
        self.rules.lock().expect("rules mutex poisoned").push(Rule {
            pattern: pattern.iter().map(|p| p.to_string()).collect(),
            reply,
            once,
        });
        self
    }

    /// Answer every matching command with `output`.
    pub fn respond(&self, pattern: &[&str], output: CommandOutput) -> &Self {
        self.push(pattern, Reply::Output(output), false)
    }

    /// Answer the next matching command with `output`.
    pub fn respond_once(&self, pattern: &[&str], output: CommandOutput) -> &Self {
        self.push(pattern, Reply::Output(output), true)
    }

    /// Make every matching command fail to start.
    pub fn fail_to_spawn(&self, pattern: &[&str]) -> &Self {
        self.push(pattern, Reply::SpawnError("scripted spawn failure".to_string()), false)
    }

    /// Raise `flag` when a matching command runs, as if the user pressed
    /// Ctrl-C while it was running.
    pub fn interrupt_on(&self, pattern: &[&str], flag: &InterruptFlag) -> &Self {
        self.push(pattern, Reply::Interrupt(flag.clone()), true)
    }

    /// Every argv seen so far, in order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }

    /// Calls matching `pattern`, with any leading `sudo -n` stripped.
    pub fn calls_matching(&self, pattern: &[&str]) -> Vec<Vec<String>> {
        self.calls()
            .into_iter()
            .filter(|argv| matches_pattern(argv, pattern))
            .collect()
    }

    pub fn was_invoked(&self, pattern: &[&str]) -> bool {
        !self.calls_matching(pattern).is_empty()
    }
}

fn unprivileged(argv: &[String]) -> &[String] {
    match argv {
        [sudo, flag, rest @ ..] if sudo == "sudo" && flag == "-n" => rest,
        [sudo, rest @ ..] if sudo == "sudo" => rest,
        _ => argv,
    }
}

fn matches_pattern<P: AsRef<str>>(argv: &[String], pattern: &[P]) -> bool {
    let starts_with = |argv: &[String]| {
        argv.len() >= pattern.len() && argv.iter().zip(pattern).all(|(a, p)| a == p.as_ref())
    };
    starts_with(unprivileged(argv)) || starts_with(argv)
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, argv: &[String]) -> Result<CommandOutput> {
        self.calls
            .lock()
            .expect("calls mutex poisoned")
            .push(argv.to_vec());

        let mut rules = self.rules.lock().expect("rules mutex poisoned");
        let Some(index) = rules.iter().position(|r| matches_pattern(argv, r.pattern.as_slice())) else {
            return Ok(CommandOutput::ok(""));
        };
        let reply = if rules[index].once {
            rules.remove(index).reply
        } else {
            rules[index].reply.clone()
        };

        match reply {
            Reply::Output(output) => Ok(output),
            Reply::SpawnError(msg) => Err(RepoError::command(msg)),
            Reply::Interrupt(flag) => {
                flag.raise(2);
                Ok(CommandOutput {
                    exit_code: None,
                    ..Default::default()
                })
            }
        }
    }
}
