//! Running a single pipeline command.
//!
//! Resolves a `Command` against the scope it runs in (workspace, shell,
//! merged environment, inherited timeout), starts it through `process`, and
//! turns the outcome into a `StepResult`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::environment;
use crate::error::{CommandFailedDetails, Error, ErrorCode, Result};
use crate::pipeline::{Command, EnvMap, Invocation};
use crate::process::{self, ProcessOutput, ProcessRequest, Termination};
use crate::utils::command::{tail, CapturedOutput};
use crate::utils::shell;

/// Everything a command inherits from the stage or hook it belongs to.
#[derive(Debug, Clone)]
pub struct CommandScope<'a> {
    pub workspace: &'a Path,
    pub shell: &'a [String],
    /// Environment merged up to (and including) the stage layer.
    pub env: EnvMap,
    /// Stage, pipeline or runner default timeout.
    pub timeout: Option<Duration>,
    pub kill_grace: Duration,
    pub stage: Option<&'a str>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureKind {
    Launch,
    Execution,
    Timeout,
    Cancelled,
}

/// Why a step (and therefore its stage) failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepError {
    pub kind: FailureKind,
    pub code: String,
    pub message: String,
}

impl From<&Error> for StepError {
    fn from(err: &Error) -> Self {
        let kind = match err.code {
            ErrorCode::CommandLaunchFailed => FailureKind::Launch,
            ErrorCode::CommandTimeout => FailureKind::Timeout,
            ErrorCode::RunCancelled => FailureKind::Cancelled,
            _ => FailureKind::Execution,
        };
        Self {
            kind,
            code: err.code.as_str().to_string(),
            message: err.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(skip)]
    pub output: CapturedOutput,
}

impl StepResult {
    fn failed(command: String, error: &Error) -> Self {
        Self {
            command,
            exit_code: None,
            duration_ms: 0,
            success: false,
            error: Some(StepError::from(error)),
            output: CapturedOutput::default(),
        }
    }
}

/// Resolve `command` into a process request for `scope`.
pub fn prepare(command: &Command, scope: &CommandScope<'_>) -> Result<ProcessRequest> {
    let env = environment::merge(&scope.env, &[&command.env]);

    let (program, args) = match command.invocation() {
        Some(Invocation::Shell(line)) => shell::shell_invocation(scope.shell, line),
        Some(Invocation::Exec(argv)) => (argv[0].clone(), argv[1..].to_vec()),
        None => {
            return Err(Error::command_launch_failed(
                command.display(),
                "command sets neither a shell line nor an executable",
            ))
        }
    };

    let dir = resolve_dir(command.dir.as_deref(), scope.workspace, &env);
    let timeout = command
        .timeout
        .map(|t| t.as_duration())
        .or(scope.timeout);

    Ok(ProcessRequest {
        program,
        args,
        dir,
        env,
        timeout,
        kill_grace: scope.kill_grace,
    })
}

/// Working directory for a command: `~` and `$VAR` expand, relative paths
/// join the workspace.
pub fn resolve_dir(dir: Option<&str>, workspace: &Path, env: &EnvMap) -> PathBuf {
    let Some(dir) = dir else {
        return workspace.to_path_buf();
    };
    let expanded = environment::expand(dir, env);
    let expanded = shellexpand::tilde(&expanded);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Map a finished process to the error it represents, if any.
pub fn outcome_error(
    command: &str,
    stage: Option<&str>,
    timeout: Option<Duration>,
    output: &ProcessOutput,
) -> Option<Error> {
    match output.termination {
        Termination::Exited if output.exit_code == Some(0) => None,
        Termination::TimedOut => Some(Error::command_timeout(
            command,
            timeout.unwrap_or_default(),
        )),
        Termination::Cancelled => Some(Error::run_cancelled(Some(command.to_string()))),
        Termination::Exited | Termination::Signaled => {
            Some(Error::command_failed(CommandFailedDetails {
                command: command.to_string(),
                stage: stage.map(str::to_string),
                exit_code: output.exit_code,
                output: tail(output.output.error_text(), 20),
            }))
        }
    }
}

/// Run one command to completion. Never returns `Err`: launch problems,
/// failures, timeouts and cancellation are all carried by the result.
pub fn run(command: &Command, scope: &CommandScope<'_>, cancel: &CancelToken) -> StepResult {
    let command_line = command.display();

    let request = match prepare(command, scope) {
        Ok(request) => request,
        Err(err) => return StepResult::failed(command_line, &err),
    };

    tracing::debug!(
        stage = scope.stage.unwrap_or("-"),
        command = %command_line,
        dir = %request.dir.display(),
        "running step"
    );

    let output = match process::run(&request, cancel) {
        Ok(output) => output,
        Err(err) => {
            tracing::warn!(command = %command_line, error = %err, "launch failed");
            return StepResult::failed(command_line, &err);
        }
    };

    let error = outcome_error(&command_line, scope.stage, request.timeout, &output);
    StepResult {
        command: command_line,
        exit_code: output.exit_code,
        duration_ms: output.duration.as_millis() as u64,
        success: error.is_none(),
        error: error.as_ref().map(StepError::from),
        output: output.output,
    }
}
