//! Sequential pipeline execution.
//!
//! `Executor::run` checks the definition, runs the stages in declared order,
//! archives artifacts when everything succeeded, dispatches the post-run
//! hooks and persists the report.
//!
//! Halting rules:
//! - a failing stage stops the run unless it sets `continueOnError`, in which
//!   case it is recorded as Unstable and the next stage starts;
//! - a launch error or a cancellation stops the run even with `continueOnError`;
//! - stages after the stop are recorded as Skipped.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use chrono::Utc;
use uuid::Uuid;

use crate::archive;
use crate::cancel::CancelToken;
use crate::defaults::Defaults;
use crate::environment;
use crate::error::{Error, Result};
use crate::hooks::{self, HookRunResult};
use crate::paths;
use crate::pipeline::{EnvMap, HookEvent, Pipeline, Stage};
use crate::report::{RunReport, RunResult, RunStatus, StageStatus};
use crate::step::{self, CommandScope, FailureKind};
use crate::utils::command::CapturedOutput;

pub const ENV_RUN_ID: &str = "PIPEWRIGHT_RUN_ID";
pub const ENV_PIPELINE: &str = "PIPEWRIGHT_PIPELINE";
pub const ENV_WORKSPACE: &str = "PIPEWRIGHT_WORKSPACE";
pub const ENV_STAGE: &str = "PIPEWRIGHT_STAGE";
pub const ENV_STATUS: &str = "PIPEWRIGHT_STATUS";

/// Runner settings for one invocation. Relative directories resolve against
/// the workspace.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workspace: PathBuf,
    /// `None` disables report persistence.
    pub report_dir: Option<PathBuf>,
    pub archive_dir: PathBuf,
    pub default_timeout: Option<Duration>,
    pub kill_grace: Duration,
    pub shell: Vec<String>,
}

impl RunOptions {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self::from_defaults(&Defaults::default(), workspace)
    }

    pub fn from_defaults(defaults: &Defaults, workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            report_dir: Some(PathBuf::from(
                shellexpand::tilde(&defaults.report_dir).as_ref(),
            )),
            archive_dir: PathBuf::from(shellexpand::tilde(&defaults.archive_dir).as_ref()),
            default_timeout: defaults.default_timeout.map(|t| t.as_duration()),
            kill_grace: defaults.kill_grace.as_duration(),
            shell: defaults.shell.clone(),
        }
    }
}

/// Immutable state shared by every stage and hook of one run.
struct RunContext<'a> {
    workspace: PathBuf,
    /// Process environment plus the run-wide injected variables.
    base_env: EnvMap,
    pipeline: &'a Pipeline,
    pipeline_timeout: Option<Duration>,
    options: &'a RunOptions,
}

impl RunContext<'_> {
    fn scope<'s>(&'s self, stage: Option<&'s Stage>, label: &str, extra: &EnvMap) -> CommandScope<'s> {
        let mut injected = EnvMap::new();
        injected.insert(ENV_STAGE.to_string(), label.to_string());
        injected.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));

        let empty = EnvMap::new();
        let stage_env = stage.map(|s| &s.environment).unwrap_or(&empty);
        let env = environment::merge(
            &self.base_env,
            &[&injected, &self.pipeline.environment, stage_env],
        );

        CommandScope {
            workspace: &self.workspace,
            shell: &self.options.shell,
            env,
            timeout: stage
                .and_then(|s| s.timeout)
                .map(|t| t.as_duration())
                .or(self.pipeline_timeout),
            kill_grace: self.options.kill_grace,
            stage: stage.map(|s| s.name.as_str()),
        }
    }
}

pub struct Executor {
    options: RunOptions,
    base_env: EnvMap,
    cancel: CancelToken,
}

impl Executor {
    /// Executor whose commands inherit the current process environment.
    pub fn new(options: RunOptions) -> Self {
        Self {
            options,
            base_env: environment::process_snapshot(),
            cancel: CancelToken::new(),
        }
    }

    /// Replace the inherited process environment.
    pub fn with_base_env(mut self, env: EnvMap) -> Self {
        self.base_env = env;
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run `pipeline` to completion and return its report.
    ///
    /// `Err` means the run never started (invalid definition, missing
    /// workspace). Stage failures, hook failures and archive problems are
    /// all carried by the report.
    pub fn run(&self, pipeline: &Pipeline) -> Result<RunReport> {
        pipeline.check()?;

        let workspace = std::fs::canonicalize(&self.options.workspace).map_err(|e| {
            Error::validation_invalid_argument(
                "workspace",
                format!(
                    "Workspace '{}' is not accessible: {}",
                    self.options.workspace.display(),
                    e
                ),
                Some(self.options.workspace.display().to_string()),
                None,
            )
        })?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let clock = Instant::now();

        let mut injected = EnvMap::new();
        injected.insert(ENV_RUN_ID.to_string(), run_id.to_string());
        injected.insert(ENV_PIPELINE.to_string(), pipeline.display_name().to_string());
        injected.insert(ENV_WORKSPACE.to_string(), workspace.display().to_string());

        let ctx = RunContext {
            base_env: environment::merge(&self.base_env, &[&injected]),
            workspace,
            pipeline,
            pipeline_timeout: pipeline
                .timeout
                .map(|t| t.as_duration())
                .or(self.options.default_timeout),
            options: &self.options,
        };

        let _span = tracing::info_span!("run", id = %run_id, pipeline = pipeline.display_name()).entered();
        tracing::info!(stages = pipeline.stages.len(), "run started");
        log_status!("run", "Running '{}' ({} stages)", pipeline.display_name(), pipeline.stages.len());

        let (stages, cancelled) = self.run_stages(&ctx);
        let mut status = RunStatus::aggregate(stages.iter().map(|s| &s.status));
        if cancelled {
            status = RunStatus::Failure;
        }

        let report_dir = self
            .options
            .report_dir
            .as_deref()
            .map(|dir| paths::resolve_in_workspace(&dir.to_string_lossy(), &ctx.workspace));

        let (archive, archive_error) = match (&pipeline.archive, status) {
            (Some(spec), RunStatus::Success) => {
                let dest = paths::resolve_in_workspace(
                    &self.options.archive_dir.to_string_lossy(),
                    &ctx.workspace,
                );
                let mut ignore = vec![dest.clone()];
                ignore.extend(report_dir.clone());

                match archive::collect(spec, &ctx.workspace, &dest, &ignore, &run_id.to_string()) {
                    Ok(result) => {
                        log_status!("archive", "Archived {} file(s) to {}", result.files.len(), result.directory);
                        (Some(result), None)
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "archive failed");
                        log_status!("archive", "{}", err.message);
                        status = RunStatus::Failure;
                        (None, Some(err.message))
                    }
                }
            }
            _ => (None, None),
        };

        let hooks = self.run_hooks(&ctx, status);

        let finished_at = Utc::now();
        let mut report = RunReport {
            run_id,
            pipeline: pipeline.display_name().to_string(),
            workspace: ctx.workspace.display().to_string(),
            started_at,
            finished_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            status,
            cancelled,
            stages,
            hooks,
            archive,
            archive_error,
            report_path: None,
        };

        if let Some(dir) = report_dir {
            if let Err(err) = report.persist(&dir) {
                tracing::warn!(error = %err, "failed to write run report");
                log_status!("report", "Could not write report: {}", err.message);
            }
        }

        tracing::info!(status = %status, duration_ms = report.duration_ms, "run finished");
        log_status!("run", "Finished with status {}", status);

        Ok(report)
    }

    fn run_stages(&self, ctx: &RunContext<'_>) -> (Vec<RunResult>, bool) {
        let mut results = Vec::with_capacity(ctx.pipeline.stages.len());
        let mut halted = false;
        let mut cancelled = false;

        for stage in &ctx.pipeline.stages {
            if !halted && self.cancel.is_cancelled() {
                tracing::warn!(stage = %stage.name, "cancelled before stage started");
                cancelled = true;
                halted = true;
            }

            if halted {
                results.push(RunResult::skipped(&stage.name));
                continue;
            }

            let mut result = self.run_stage(ctx, stage);

            if result.status == StageStatus::Failure {
                let kind = result.error.as_ref().map(|e| e.kind);
                let fatal = matches!(kind, Some(FailureKind::Launch) | Some(FailureKind::Cancelled));

                if kind == Some(FailureKind::Cancelled) {
                    cancelled = true;
                }

                if stage.continue_on_error && !fatal {
                    result.status = StageStatus::Unstable;
                    log_status!("stage", "'{}' failed, continuing (continueOnError)", stage.name);
                } else {
                    halted = true;
                }
            }

            results.push(result);
        }

        (results, cancelled)
    }

    fn run_stage(&self, ctx: &RunContext<'_>, stage: &Stage) -> RunResult {
        let _span = tracing::info_span!("stage", name = %stage.name).entered();
        log_status!("stage", "{}", stage.name);

        let scope = ctx.scope(Some(stage), &stage.name, &EnvMap::new());
        let started = Instant::now();

        let mut steps = Vec::with_capacity(stage.steps.len());
        for command in &stage.steps {
            let result = step::run(command, &scope, &self.cancel);
            let failed = !result.success;
            steps.push(result);
            if failed {
                break;
            }
        }

        let mut output = CapturedOutput::default();
        for step in &steps {
            output.append(&step.output);
        }

        let last = steps.last();
        let error = last.and_then(|s| s.error.clone());
        let status = if error.is_some() {
            StageStatus::Failure
        } else {
            StageStatus::Success
        };

        match &error {
            Some(err) => tracing::warn!(kind = ?err.kind, error = %err.message, "stage failed"),
            None => tracing::info!("stage succeeded"),
        }

        RunResult {
            stage_name: stage.name.clone(),
            status,
            exit_code: last.and_then(|s| s.exit_code),
            stdout: output.stdout,
            stderr: output.stderr,
            duration_ms: started.elapsed().as_millis() as u64,
            steps,
            error,
            log: None,
        }
    }

    /// `always`, then the hook for `status`. Runs with a fresh token so that a
    /// cancelled run still gets its cleanup.
    fn run_hooks(&self, ctx: &RunContext<'_>, status: RunStatus) -> Vec<HookRunResult> {
        let cancel = CancelToken::new();
        let mut extra = EnvMap::new();
        extra.insert(ENV_STATUS.to_string(), status.to_string());

        [HookEvent::Always, status.hook_event()]
            .into_iter()
            .map(|event| {
                let commands = ctx.pipeline.hooks.commands(event);
                if !commands.is_empty() {
                    log_status!("hook", "{} ({} command(s))", event, commands.len());
                }
                let scope = ctx.scope(None, &hooks::stage_label(event), &extra);
                hooks::run_commands(commands, event, &scope, &cancel)
            })
            .collect()
    }
}
