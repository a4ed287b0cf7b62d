//! External process execution with output capture, timeout and cancellation.
//!
//! Every child gets a fully specified environment (`env_clear` + the merged
//! map), a null stdin and piped stdout/stderr drained by helper threads. On
//! Unix the child leads its own process group so a timeout or cancellation
//! can signal everything it spawned. Background children still holding the
//! output pipes after the leader exits are stopped the same way.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Child, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::pipeline::EnvMap;
use crate::utils::command::CapturedOutput;
use crate::utils::shell;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
    pub dir: PathBuf,
    pub env: EnvMap,
    pub timeout: Option<Duration>,
    pub kill_grace: Duration,
}

impl ProcessRequest {
    pub fn new(program: impl Into<String>, args: Vec<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            dir: dir.into(),
            env: EnvMap::new(),
            timeout: None,
            kill_grace: Duration::from_secs(5),
        }
    }

    pub fn display(&self) -> String {
        let mut argv = Vec::with_capacity(self.args.len() + 1);
        argv.push(self.program.clone());
        argv.extend(self.args.iter().cloned());
        shell::quote_args(&argv)
    }
}

/// How the child came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Exited,
    Signaled,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub exit_code: Option<i32>,
    pub output: CapturedOutput,
    pub termination: Termination,
    pub duration: Duration,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.termination == Termination::Exited && self.exit_code == Some(0)
    }
}

/// Run a process to completion.
///
/// Returns `Err` only when the process cannot be started (missing executable,
/// missing working directory, permission denied). Non-zero exits, timeouts and
/// cancellation are reported through `ProcessOutput::termination`.
pub fn run(request: &ProcessRequest, cancel: &CancelToken) -> Result<ProcessOutput> {
    if !request.dir.is_dir() {
        return Err(Error::command_launch_failed(
            request.display(),
            format!(
                "working directory '{}' does not exist",
                request.dir.display()
            ),
        ));
    }

    let mut cmd = std::process::Command::new(&request.program);
    cmd.args(&request.args)
        .current_dir(&request.dir)
        .env_clear()
        .envs(&request.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    let started = Instant::now();
    let mut child = cmd
        .spawn()
        .map_err(|e| Error::command_launch_failed(request.display(), e.to_string()))?;

    tracing::debug!(pid = child.id(), command = %request.display(), "spawned");

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = request.timeout.map(|t| started + t);
    let (status, termination) = loop {
        match child.try_wait() {
            Ok(Some(status)) => break (status, exit_termination(&status)),
            Ok(None) => {}
            Err(e) => {
                return Err(Error::internal_io(
                    e.to_string(),
                    Some(format!("wait for '{}'", request.display())),
                ))
            }
        }

        if cancel.is_cancelled() {
            let status = terminate(&mut child, request.kill_grace)?;
            break (status, Termination::Cancelled);
        }

        if deadline.is_some_and(|d| Instant::now() >= d) {
            let status = terminate(&mut child, request.kill_grace)?;
            break (status, Termination::TimedOut);
        }

        thread::sleep(POLL_INTERVAL);
    };

    if matches!(termination, Termination::Exited | Termination::Signaled) {
        stop_stragglers(&child, request.kill_grace, [&stdout, &stderr]);
    }

    let output = CapturedOutput::from_bytes(&collect(stdout), &collect(stderr));
    let exit_code = match termination {
        Termination::Exited => status.code(),
        _ => None,
    };

    Ok(ProcessOutput {
        exit_code,
        output,
        termination,
        duration: started.elapsed(),
    })
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut reader| {
        thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = reader.read_to_end(&mut buf);
            buf
        })
    })
}

fn collect(handle: Option<JoinHandle<Vec<u8>>>) -> Vec<u8> {
    handle.and_then(|h| h.join().ok()).unwrap_or_default()
}

#[cfg(unix)]
fn exit_termination(status: &ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;
    if status.signal().is_some() {
        Termination::Signaled
    } else {
        Termination::Exited
    }
}

#[cfg(not(unix))]
fn exit_termination(_status: &ExitStatus) -> Termination {
    Termination::Exited
}

/// SIGTERM the child's process group, then SIGKILL it once `grace` elapses.
#[cfg(unix)]
fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    let pgid = child.id() as libc::pid_t;
    signal_group(pgid, libc::SIGTERM);

    let deadline = Instant::now() + grace;
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                // Kill stragglers that outlived the group leader.
                signal_group(pgid, libc::SIGKILL);
                return Ok(status);
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(POLL_INTERVAL),
            Ok(None) => break,
            Err(e) => return Err(Error::internal_io(e.to_string(), Some("wait for child".into()))),
        }
    }

    tracing::debug!(pid = pgid, "grace period elapsed, sending SIGKILL");
    signal_group(pgid, libc::SIGKILL);
    child
        .wait()
        .map_err(|e| Error::internal_io(e.to_string(), Some("wait for child".into())))
}

/// Once the leader has exited, stop anything it left running in its group
/// that still holds the output pipes: SIGTERM, then SIGKILL after `grace`.
#[cfg(unix)]
fn stop_stragglers(child: &Child, grace: Duration, pipes: [&Option<JoinHandle<Vec<u8>>>; 2]) {
    let open = || pipes.iter().any(|p| matches!(p, Some(h) if !h.is_finished()));
    if !open() {
        return;
    }

    let pgid = child.id() as libc::pid_t;
    tracing::debug!(pid = pgid, "leader exited with output still open, stopping its group");
    signal_group(pgid, libc::SIGTERM);

    let deadline = Instant::now() + grace;
    while open() && Instant::now() < deadline {
        thread::sleep(POLL_INTERVAL);
    }
    if open() {
        signal_group(pgid, libc::SIGKILL);
    }
}

#[cfg(not(unix))]
fn stop_stragglers(_child: &Child, _grace: Duration, _pipes: [&Option<JoinHandle<Vec<u8>>>; 2]) {}

#[cfg(unix)]
fn signal_group(pgid: libc::pid_t, signal: libc::c_int) {
    // SAFETY: kill(2) with a negative pid signals the process group we created
    // with `process_group(0)`; it has no memory-safety preconditions.
    unsafe {
        libc::kill(-pgid, signal);
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _grace: Duration) -> Result<ExitStatus> {
    let _ = child.kill();
    child
        .wait()
        .map_err(|e| Error::internal_io(e.to_string(), Some("wait for child".into())))
}
