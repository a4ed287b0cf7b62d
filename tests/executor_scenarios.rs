#![cfg(unix)]

use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use pipewright::duration::HumanDuration;
use pipewright::pipeline::{ArchiveSpec, EnvMap};
use pipewright::step::FailureKind;
use pipewright::{
    CancelToken, Command, Executor, HookEvent, Pipeline, RunOptions, RunStatus, Stage, StageStatus,
};
use tempfile::TempDir;

fn executor(workspace: &Path) -> Executor {
    let mut options = RunOptions::new(workspace);
    options.report_dir = None;
    options.kill_grace = Duration::from_millis(200);

    let mut env = EnvMap::new();
    env.insert("PATH".into(), "/usr/local/bin:/usr/bin:/bin".into());
    Executor::new(options).with_base_env(env)
}

/// Hooks that append their event name to `hooks.log` in the workspace.
fn with_recording_hooks(mut pipeline: Pipeline) -> Pipeline {
    for event in [
        HookEvent::Always,
        HookEvent::Success,
        HookEvent::Failure,
        HookEvent::Unstable,
    ] {
        pipeline
            .hooks
            .commands_mut(event)
            .push(Command::shell(format!("echo {} >> hooks.log", event)));
    }
    pipeline
}

fn hook_log(workspace: &Path) -> Vec<String> {
    fs::read_to_string(workspace.join("hooks.log"))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn failing_test_stage_skips_archive_and_runs_failure_hooks() {
    let ws = TempDir::new().unwrap();
    let pipeline = with_recording_hooks(Pipeline::new(vec![
        Stage::new("build", vec![Command::shell("touch built")]),
        Stage::new("test", vec![Command::shell("exit 1")]),
        Stage::new("archive", vec![Command::shell("touch archived")]),
    ]));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.exit_code(), 1);
    assert_eq!(report.stages.len(), 3);
    assert_eq!(report.stages[0].status, StageStatus::Success);
    assert_eq!(report.stages[1].status, StageStatus::Failure);
    assert_eq!(report.stages[1].exit_code, Some(1));
    assert_eq!(report.stages[2].status, StageStatus::Skipped);
    assert!(ws.path().join("built").exists());
    assert!(!ws.path().join("archived").exists());
    assert_eq!(hook_log(ws.path()), vec!["always", "failure"]);
}

#[test]
fn all_stages_passing_runs_success_hook_once() {
    let ws = TempDir::new().unwrap();
    let pipeline = with_recording_hooks(Pipeline::new(vec![
        Stage::new("build", vec![Command::shell("true")]),
        Stage::new("test", vec![Command::exec(["true"])]),
        Stage::new("package", vec![Command::shell("echo packaged")]),
    ]));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert_eq!(report.exit_code(), 0);
    assert_eq!(report.executed_stages(), vec!["build", "test", "package"]);
    assert_eq!(report.stage("package").unwrap().stdout, "packaged\n");
    assert_eq!(hook_log(ws.path()), vec!["always", "success"]);
}

#[test]
fn continue_on_error_marks_unstable_and_keeps_going() {
    let ws = TempDir::new().unwrap();
    let pipeline = with_recording_hooks(Pipeline::new(vec![
        Stage::new("lint", vec![Command::shell("exit 1")]).continue_on_error(),
        Stage::new("test", vec![Command::shell("touch tested")]),
    ]));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Unstable);
    assert_eq!(report.exit_code(), 2);
    assert_eq!(report.stages[0].status, StageStatus::Unstable);
    assert_eq!(report.stages[1].status, StageStatus::Success);
    assert!(ws.path().join("tested").exists());
    assert_eq!(hook_log(ws.path()), vec!["always", "unstable"]);
}

#[test]
fn later_failure_dominates_earlier_unstable() {
    let ws = TempDir::new().unwrap();
    let pipeline = Pipeline::new(vec![
        Stage::new("lint", vec![Command::shell("false")]).continue_on_error(),
        Stage::new("test", vec![Command::shell("false")]),
        Stage::new("deploy", vec![Command::shell("true")]),
    ]);

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(report.stages[2].status, StageStatus::Skipped);
}

#[test]
fn timeout_kills_the_command_and_fails_the_stage() {
    let ws = TempDir::new().unwrap();
    let mut slow = Stage::new("slow", vec![Command::shell("sleep 30")]);
    slow.timeout = Some(HumanDuration::from_secs(1));
    let pipeline = Pipeline::new(vec![slow, Stage::new("after", vec![Command::shell("true")])]);

    let started = Instant::now();
    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(report.status, RunStatus::Failure);
    let error = report.stages[0].error.as_ref().unwrap();
    assert_eq!(error.kind, FailureKind::Timeout);
    assert_eq!(error.code, "command.timeout");
    assert_eq!(report.stages[1].status, StageStatus::Skipped);
}

#[test]
fn background_job_does_not_hold_the_stage_past_its_timeout() {
    let ws = TempDir::new().unwrap();
    let mut stage = Stage::new("serve", vec![Command::shell("sleep 30 & echo started")]);
    stage.timeout = Some(HumanDuration::from_secs(1));
    let pipeline = Pipeline::new(vec![stage]);

    let started = Instant::now();
    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert!(started.elapsed() < Duration::from_secs(15));
    assert_eq!(report.stages[0].stdout, "started\n");
}

#[test]
fn missing_executable_is_a_launch_failure() {
    let ws = TempDir::new().unwrap();
    let pipeline = with_recording_hooks(Pipeline::new(vec![Stage::new(
        "tool",
        vec![Command::exec(["pipewright-no-such-tool", "--version"])],
    )]));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Failure);
    assert_eq!(
        report.stages[0].error.as_ref().unwrap().kind,
        FailureKind::Launch
    );
    assert_eq!(hook_log(ws.path()), vec!["always", "failure"]);
}

#[test]
fn command_env_shadows_pipeline_env() {
    let ws = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new(vec![Stage::new(
        "env",
        vec![
            Command::shell("printf '%s ' \"$TARGET\""),
            Command::shell("printf '%s' \"$TARGET\"").with_env("TARGET", "command"),
        ],
    )]);
    pipeline.environment.insert("TARGET".into(), "pipeline".into());

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.stages[0].stdout, "pipeline command");
}

#[test]
fn cancellation_before_start_skips_stages_but_runs_always() {
    let ws = TempDir::new().unwrap();
    let pipeline = with_recording_hooks(Pipeline::new(vec![
        Stage::new("build", vec![Command::shell("touch built")]),
        Stage::new("test", vec![Command::shell("true")]),
    ]));

    let cancel = CancelToken::new();
    cancel.cancel();
    let report = executor(ws.path())
        .with_cancel_token(cancel)
        .run(&pipeline)
        .unwrap();

    assert!(report.cancelled);
    assert_eq!(report.status, RunStatus::Failure);
    assert!(report
        .stages
        .iter()
        .all(|s| s.status == StageStatus::Skipped));
    assert!(!ws.path().join("built").exists());
    assert_eq!(hook_log(ws.path()), vec!["always", "failure"]);
}

#[test]
fn cancellation_while_running_stops_the_current_command() {
    let ws = TempDir::new().unwrap();
    let pipeline = Pipeline::new(vec![
        Stage::new("wait", vec![Command::shell("sleep 30")]).continue_on_error(),
        Stage::new("after", vec![Command::shell("touch after")]),
    ]);

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        trigger.cancel();
    });

    let report = executor(ws.path())
        .with_cancel_token(cancel)
        .run(&pipeline)
        .unwrap();
    handle.join().unwrap();

    assert!(report.cancelled);
    assert_eq!(report.stages[0].status, StageStatus::Failure);
    assert_eq!(
        report.stages[0].error.as_ref().unwrap().kind,
        FailureKind::Cancelled
    );
    assert_eq!(report.stages[1].status, StageStatus::Skipped);
    assert!(!ws.path().join("after").exists());
}

#[test]
fn successful_run_archives_matching_files() {
    let ws = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new(vec![Stage::new(
        "build",
        vec![Command::shell(
            "mkdir -p dist && echo bin > dist/app.bin && echo dbg > dist/app.debug",
        )],
    )]);
    let mut spec = ArchiveSpec::new(["dist/*"]);
    spec.exclude = vec!["**/*.debug".to_string()];
    spec.fingerprint = true;
    pipeline.archive = Some(spec);

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Success);
    let archive = report.archive.unwrap();
    assert_eq!(archive.files.len(), 1);
    assert_eq!(archive.files[0].path, "dist/app.bin");
    let dest = Path::new(&archive.directory);
    assert_eq!(fs::read_to_string(dest.join("dist/app.bin")).unwrap(), "bin\n");
    assert!(dest.join("manifest.json").is_file());
    assert!(!dest.join("dist/app.debug").exists());
}

#[test]
fn archive_without_matches_fails_the_run() {
    let ws = TempDir::new().unwrap();
    let mut pipeline = with_recording_hooks(Pipeline::new(vec![Stage::new(
        "build",
        vec![Command::shell("true")],
    )]));
    pipeline.archive = Some(ArchiveSpec::new(["dist/*.tar.gz"]));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Failure);
    assert!(report.archive.is_none());
    assert!(report.archive_error.unwrap().contains("No files matched"));
    assert_eq!(hook_log(ws.path()), vec!["always", "failure"]);
}

#[test]
fn failing_hook_does_not_change_the_status() {
    let ws = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new(vec![Stage::new("build", vec![Command::shell("true")])]);
    pipeline.hooks.always.push(Command::shell("exit 7"));
    pipeline.hooks.success.push(Command::shell("touch notified"));

    let report = executor(ws.path()).run(&pipeline).unwrap();

    assert_eq!(report.status, RunStatus::Success);
    assert!(!report.hooks[0].all_succeeded);
    let error = report.hooks[0].commands[0].error.as_ref().unwrap();
    assert_eq!(error.code, "hook.failed");
    assert_eq!(error.kind, FailureKind::Execution);
    assert!(report.hooks[1].all_succeeded);
    assert!(ws.path().join("notified").exists());
}

#[test]
fn exactly_one_status_hook_runs_per_outcome() {
    for (command, continue_on_error, expected) in [
        ("true", false, "success"),
        ("false", false, "failure"),
        ("false", true, "unstable"),
    ] {
        let ws = TempDir::new().unwrap();
        let mut stage = Stage::new("only", vec![Command::shell(command)]);
        stage.continue_on_error = continue_on_error;
        let pipeline = with_recording_hooks(Pipeline::new(vec![stage]));

        executor(ws.path()).run(&pipeline).unwrap();

        assert_eq!(hook_log(ws.path()), vec!["always", expected]);
    }
}
