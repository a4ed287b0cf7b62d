//! Post-run lifecycle hooks.
//!
//! After the stages finish (or the run aborts) the executor runs the `always`
//! hook, then exactly one of `success` / `failure` / `unstable`. Hook commands
//! run sequentially; a failing command is logged and recorded, the remaining
//! commands of the event still run, and the run status never changes.

use serde::Serialize;

use crate::cancel::CancelToken;
use crate::error::Error;
use crate::pipeline::{Command, HookEvent};
use crate::step::{self, CommandScope, StepError};

/// Result of running a single hook command.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookCommandResult {
    pub command: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    /// `hook.failed`, with the kind of the underlying failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
}

/// Result of running all hooks for an event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookRunResult {
    pub event: HookEvent,
    pub commands: Vec<HookCommandResult>,
    pub all_succeeded: bool,
}

/// Stage label visible to hook commands as `PIPEWRIGHT_STAGE`.
pub fn stage_label(event: HookEvent) -> String {
    format!("post:{}", event)
}

/// Run the commands declared for `event`.
pub fn run_commands(
    commands: &[Command],
    event: HookEvent,
    scope: &CommandScope<'_>,
    cancel: &CancelToken,
) -> HookRunResult {
    let mut results = Vec::with_capacity(commands.len());
    let mut all_succeeded = true;

    for command in commands {
        let step = step::run(command, scope, cancel);

        let error = step.error.as_ref().map(|cause| {
            let err = Error::hook_failed(event.as_str(), &step.command, &cause.message);
            tracing::warn!(event = %event, command = %step.command, error = %cause.message, "hook command failed");
            log_status!("hook", "{}", err.message);
            StepError {
                kind: cause.kind,
                ..StepError::from(&err)
            }
        });

        if error.is_some() {
            all_succeeded = false;
        }

        results.push(HookCommandResult {
            command: step.command,
            success: step.success,
            exit_code: step.exit_code,
            stdout: step.output.stdout,
            stderr: step.output.stderr,
            error,
        });
    }

    HookRunResult {
        event,
        commands: results,
        all_succeeded,
    }
}
