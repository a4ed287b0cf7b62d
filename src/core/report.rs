//! Run results and report persistence.
//!
//! Every stage of the pipeline produces exactly one `RunResult`, including
//! stages that never started. The finished `RunReport` is written to
//! `<report_dir>/<run_id>/report.json` with one log file per stage.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use heck::ToKebabCase;
use serde::Serialize;
use uuid::Uuid;

use crate::archive::ArchiveResult;
use crate::error::{Error, Result};
use crate::hooks::HookRunResult;
use crate::pipeline::HookEvent;
use crate::step::{StepError, StepResult};
use crate::utils::io;

pub const REPORT_FILE: &str = "report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Success,
    Failure,
    Unstable,
    /// Never started because the run aborted or was cancelled first.
    Skipped,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageStatus::Success => "success",
            StageStatus::Failure => "failure",
            StageStatus::Unstable => "unstable",
            StageStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate status of a run. Ordered so that the worst outcome is the max:
/// Failure dominates Unstable dominates Success.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Unstable,
    Failure,
}

impl RunStatus {
    /// Fold stage statuses into the aggregate. Skipped stages do not count.
    pub fn aggregate<'a, I>(stages: I) -> Self
    where
        I: IntoIterator<Item = &'a StageStatus>,
    {
        stages
            .into_iter()
            .filter_map(|status| match status {
                StageStatus::Success => Some(RunStatus::Success),
                StageStatus::Unstable => Some(RunStatus::Unstable),
                StageStatus::Failure => Some(RunStatus::Failure),
                StageStatus::Skipped => None,
            })
            .max()
            .unwrap_or(RunStatus::Success)
    }

    /// Process exit code for the CLI: 0 success, 1 failure, 2 unstable.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failure => 1,
            RunStatus::Unstable => 2,
        }
    }

    /// The status-specific hook that follows `always`.
    pub fn hook_event(&self) -> HookEvent {
        match self {
            RunStatus::Success => HookEvent::Success,
            RunStatus::Failure => HookEvent::Failure,
            RunStatus::Unstable => HookEvent::Unstable,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Unstable => "unstable",
            RunStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one stage.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub stage_name: String,
    pub status: StageStatus,
    /// Exit code of the last step that ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

impl RunResult {
    pub fn skipped(stage_name: impl Into<String>) -> Self {
        Self {
            stage_name: stage_name.into(),
            status: StageStatus::Skipped,
            exit_code: None,
            stdout: String::new(),
            stderr: String::new(),
            duration_ms: 0,
            steps: Vec::new(),
            error: None,
            log: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: Uuid,
    pub pipeline: String,
    pub workspace: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: RunStatus,
    pub cancelled: bool,
    pub stages: Vec<RunResult>,
    pub hooks: Vec<HookRunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_path: Option<String>,
}

impl RunReport {
    pub fn exit_code(&self) -> i32 {
        self.status.exit_code()
    }

    pub fn stage(&self, name: &str) -> Option<&RunResult> {
        self.stages.iter().find(|s| s.stage_name == name)
    }

    /// Names of the stages that actually started.
    pub fn executed_stages(&self) -> Vec<&str> {
        self.stages
            .iter()
            .filter(|s| s.status != StageStatus::Skipped)
            .map(|s| s.stage_name.as_str())
            .collect()
    }

    /// Write the report and per-stage logs under `report_dir/<run_id>/`.
    /// Returns the path of `report.json`.
    pub fn persist(&mut self, report_dir: &Path) -> Result<PathBuf> {
        let dir = report_dir.join(self.run_id.to_string());
        io::ensure_dir(&dir, "create report directory")?;

        for (idx, stage) in self.stages.iter_mut().enumerate() {
            if stage.status == StageStatus::Skipped {
                continue;
            }
            let path = dir.join(log_file_name(idx, &stage.stage_name));
            io::write_file(&path, &render_log(stage), "write stage log")?;
            stage.log = Some(path.display().to_string());
        }

        let path = dir.join(REPORT_FILE);
        self.report_path = Some(path.display().to_string());

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::internal_json(e.to_string(), Some("serialize run report".into())))?;
        io::write_file_atomic(&path, &content, "write run report")?;

        tracing::info!(path = %path.display(), "report written");
        Ok(path)
    }
}

/// `01-build-and-test.log` for stage index 0 named "Build and test".
pub fn log_file_name(idx: usize, stage_name: &str) -> String {
    let slug = stage_name.to_kebab_case();
    let slug = if slug.is_empty() { "stage".to_string() } else { slug };
    format!("{:02}-{}.log", idx + 1, slug)
}

fn render_log(stage: &RunResult) -> String {
    let mut log = String::new();
    for step in &stage.steps {
        log.push_str(&format!("$ {}\n", step.command));
        log.push_str(&step.output.stdout);
        if !step.output.stderr.is_empty() {
            log.push_str("--- stderr ---\n");
            log.push_str(&step.output.stderr);
        }
        if let Some(error) = &step.error {
            log.push_str(&format!("!! {}\n", error.message));
        }
    }
    log
}
