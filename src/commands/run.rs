use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use pipewright::archive::ArchiveResult;
use pipewright::defaults;
use pipewright::duration::HumanDuration;
use pipewright::paths;
use pipewright::pipeline;
use pipewright::step::StepError;
use pipewright::{CancelToken, Executor, HookEvent, RunOptions, RunReport, RunStatus, StageStatus};

use super::CmdResult;

#[derive(Args)]
pub struct RunArgs {
    /// Pipeline file (.yml, .yaml, .json or .toml)
    pub file: PathBuf,

    /// Directory the commands run in (default: current directory)
    #[arg(long, short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Where to write the run report (overrides reportDir)
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Where to copy artifacts (overrides archiveDir)
    #[arg(long)]
    pub archive_dir: Option<PathBuf>,

    /// Timeout for commands that declare none, e.g. 30m (overrides defaultTimeout)
    #[arg(long)]
    pub timeout: Option<HumanDuration>,

    /// Do not write a report
    #[arg(long)]
    pub no_report: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StageSummary {
    name: String,
    status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    exit_code: Option<i32>,
    duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<StepError>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSummary {
    event: HookEvent,
    commands: usize,
    all_succeeded: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutput {
    command: String,
    run_id: String,
    pipeline: String,
    status: RunStatus,
    exit_code: i32,
    cancelled: bool,
    duration_ms: u64,
    stages: Vec<StageSummary>,
    hooks: Vec<HookSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive: Option<ArchiveResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    archive_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    report_path: Option<String>,
}

impl From<RunReport> for RunOutput {
    fn from(report: RunReport) -> Self {
        Self {
            command: "run".to_string(),
            run_id: report.run_id.to_string(),
            exit_code: report.exit_code(),
            pipeline: report.pipeline,
            status: report.status,
            cancelled: report.cancelled,
            duration_ms: report.duration_ms,
            stages: report
                .stages
                .into_iter()
                .map(|s| StageSummary {
                    name: s.stage_name,
                    status: s.status,
                    exit_code: s.exit_code,
                    duration_ms: s.duration_ms,
                    error: s.error,
                })
                .collect(),
            hooks: report
                .hooks
                .into_iter()
                .map(|h| HookSummary {
                    event: h.event,
                    commands: h.commands.len(),
                    all_succeeded: h.all_succeeded,
                })
                .collect(),
            archive: report.archive,
            archive_error: report.archive_error,
            report_path: report.report_path,
        }
    }
}

/// Build runner options: config file first, then command-line overrides.
fn build_options(args: &RunArgs) -> pipewright::Result<RunOptions> {
    let workspace = match &args.workspace {
        Some(dir) => paths::absolute_from_cwd(dir)?,
        None => paths::absolute_from_cwd(&PathBuf::from("."))?,
    };

    let mut options = RunOptions::from_defaults(&defaults::load_defaults(), workspace);

    if let Some(dir) = &args.report_dir {
        options.report_dir = Some(paths::absolute_from_cwd(dir)?);
    }
    if args.no_report {
        options.report_dir = None;
    }
    if let Some(dir) = &args.archive_dir {
        options.archive_dir = paths::absolute_from_cwd(dir)?;
    }
    if let Some(timeout) = args.timeout {
        options.default_timeout = Some(timeout.as_duration());
    }

    Ok(options)
}

pub fn run(args: RunArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<RunOutput> {
    let pipeline = pipeline::load(&args.file)?;
    let options = build_options(&args)?;

    let cancel = CancelToken::new();
    cancel.install_signal_handlers()?;

    crate::tty::status(&format!(
        "pipewright: running {} in {}",
        args.file.display(),
        options.workspace.display()
    ));

    let report = Executor::new(options)
        .with_cancel_token(cancel)
        .run(&pipeline)?;

    let exit_code = report.exit_code();
    Ok((RunOutput::from(report), exit_code))
}
