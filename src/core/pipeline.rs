//! Pipeline definition model.
//!
//! A pipeline document declares ordered stages of commands, a pipeline-wide
//! environment, lifecycle hooks and an optional artifact archive. Definitions
//! are immutable once loaded: `load` parses and validates, and everything
//! downstream borrows.
//!
//! ```yaml
//! name: crate-ci
//! environment:
//!   CARGO_TERM_COLOR: always
//! stages:
//!   - name: build
//!     steps:
//!       - exec: [cargo, build, --release]
//!   - name: audit
//!     continueOnError: true
//!     steps:
//!       - cargo audit
//! hooks:
//!   always:
//!     - echo done
//! archive:
//!   patterns: ["target/release/*.tar.gz"]
//! ```

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::{self, MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};

use crate::duration::HumanDuration;
use crate::error::{DefinitionIssue, Error, Result};
use crate::format::{self, DefinitionFormat};
use crate::utils::{io, shell};

pub type EnvMap = BTreeMap<String, String>;

static ENV_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid regex pattern"));

fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Command
// ============================================================================

/// One step of a stage or hook.
///
/// Exactly one of `run` (a shell line) or `exec` (an explicit argv whose first
/// element is the executable) must be set. A bare string in a document is
/// shorthand for `{ run: <string> }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<HumanDuration>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: EnvMap,
}

/// How a command is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation<'a> {
    Shell(&'a str),
    Exec(&'a [String]),
}

impl Command {
    pub fn shell(line: impl Into<String>) -> Self {
        Self {
            run: Some(line.into()),
            ..Self::default()
        }
    }

    pub fn exec<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exec: Some(argv.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    pub fn in_dir(mut self, dir: impl Into<String>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: HumanDuration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The invocation, or `None` when the command is ambiguous or empty.
    pub fn invocation(&self) -> Option<Invocation<'_>> {
        match (&self.run, &self.exec) {
            (Some(line), None) if !line.trim().is_empty() => Some(Invocation::Shell(line)),
            (None, Some(argv)) if argv.first().is_some_and(|p| !p.trim().is_empty()) => {
                Some(Invocation::Exec(argv))
            }
            _ => None,
        }
    }

    /// Human-readable form used in logs and reports.
    pub fn display(&self) -> String {
        match (&self.run, &self.exec) {
            (Some(line), _) => line.clone(),
            (None, Some(argv)) => shell::quote_args(argv),
            (None, None) => String::new(),
        }
    }

    fn check(&self, field: &str, issues: &mut Vec<DefinitionIssue>) {
        match (&self.run, &self.exec) {
            (None, None) => issues.push(DefinitionIssue::new(
                field,
                "command must set either 'run' or 'exec'",
            )),
            (Some(_), Some(_)) => issues.push(DefinitionIssue::new(
                field,
                "command must set only one of 'run' or 'exec'",
            )),
            (Some(line), None) if line.trim().is_empty() => {
                issues.push(DefinitionIssue::new(format!("{}.run", field), "shell line is empty"))
            }
            (None, Some(argv)) if argv.first().is_none_or(|p| p.trim().is_empty()) => issues.push(
                DefinitionIssue::new(format!("{}.exec", field), "executable is empty"),
            ),
            _ => {}
        }

        if let Some(dir) = &self.dir {
            if dir.trim().is_empty() {
                issues.push(DefinitionIssue::new(
                    format!("{}.dir", field),
                    "working directory is empty",
                ));
            }
        }

        check_env(&self.env, &format!("{}.env", field), issues);
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct CommandFields {
    #[serde(default)]
    run: Option<String>,
    #[serde(default)]
    exec: Option<Vec<String>>,
    #[serde(default)]
    dir: Option<String>,
    #[serde(default)]
    timeout: Option<HumanDuration>,
    #[serde(default)]
    env: EnvMap,
}

impl From<CommandFields> for Command {
    fn from(fields: CommandFields) -> Self {
        Self {
            run: fields.run,
            exec: fields.exec,
            dir: fields.dir,
            timeout: fields.timeout,
            env: fields.env,
        }
    }
}

struct CommandVisitor;

impl<'de> Visitor<'de> for CommandVisitor {
    type Value = Command;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a shell line or a command table with 'run' or 'exec'")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Command, E> {
        Ok(Command::shell(v))
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> std::result::Result<Command, A::Error> {
        CommandFields::deserialize(de::value::MapAccessDeserializer::new(map)).map(Command::from)
    }
}

impl<'de> Deserialize<'de> for Command {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(CommandVisitor)
    }
}

// ============================================================================
// Stage
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Stage {
    pub name: String,
    #[serde(default, skip_serializing_if = "is_false")]
    pub continue_on_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<HumanDuration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: EnvMap,
    pub steps: Vec<Command>,
}

impl Stage {
    pub fn new(name: impl Into<String>, steps: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            continue_on_error: false,
            timeout: None,
            environment: EnvMap::new(),
            steps,
        }
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }
}

// ============================================================================
// Hooks
// ============================================================================

/// Lifecycle events that can carry hook commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HookEvent {
    Always,
    Success,
    Failure,
    Unstable,
}

impl HookEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Always => "always",
            HookEvent::Success => "success",
            HookEvent::Failure => "failure",
            HookEvent::Unstable => "unstable",
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Hook commands keyed by lifecycle event. Unknown event names are rejected
/// when the document is parsed.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Hooks {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub always: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure: Vec<Command>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unstable: Vec<Command>,
}

impl Hooks {
    pub fn commands(&self, event: HookEvent) -> &[Command] {
        match event {
            HookEvent::Always => &self.always,
            HookEvent::Success => &self.success,
            HookEvent::Failure => &self.failure,
            HookEvent::Unstable => &self.unstable,
        }
    }

    pub fn commands_mut(&mut self, event: HookEvent) -> &mut Vec<Command> {
        match event {
            HookEvent::Always => &mut self.always,
            HookEvent::Success => &mut self.success,
            HookEvent::Failure => &mut self.failure,
            HookEvent::Unstable => &mut self.unstable,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.always.is_empty()
            && self.success.is_empty()
            && self.failure.is_empty()
            && self.unstable.is_empty()
    }
}

// ============================================================================
// Archive
// ============================================================================

/// Files copied to the archive directory after a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ArchiveSpec {
    /// Glob patterns relative to the workspace.
    pub patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub allow_empty: bool,
    /// Record SHA-256 digests in the manifest.
    #[serde(default, skip_serializing_if = "is_false")]
    pub fingerprint: bool,
    /// Also bundle the archived files into `artifacts.zip`.
    #[serde(default, skip_serializing_if = "is_false")]
    pub zip: bool,
}

impl ArchiveSpec {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            exclude: Vec::new(),
            allow_empty: false,
            fingerprint: false,
            zip: false,
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Pipeline {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<HumanDuration>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: EnvMap,
    pub stages: Vec<Stage>,
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archive: Option<ArchiveSpec>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Self {
            name: None,
            timeout: None,
            environment: EnvMap::new(),
            stages,
            hooks: Hooks::default(),
            archive: None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("pipeline")
    }

    /// Every structural problem in the definition, in document order.
    pub fn validate(&self) -> Vec<DefinitionIssue> {
        let mut issues = Vec::new();

        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                issues.push(DefinitionIssue::new("name", "pipeline name is empty"));
            }
        }

        check_env(&self.environment, "environment", &mut issues);

        if self.stages.is_empty() {
            issues.push(DefinitionIssue::new("stages", "pipeline has no stages"));
        }

        let mut seen = HashSet::new();
        for (idx, stage) in self.stages.iter().enumerate() {
            let field = format!("stages[{}]", idx);

            if stage.name.trim().is_empty() {
                issues.push(DefinitionIssue::new(
                    format!("{}.name", field),
                    "stage name is empty",
                ));
            } else if !seen.insert(stage.name.as_str()) {
                issues.push(DefinitionIssue::new(
                    format!("{}.name", field),
                    format!("duplicate stage name '{}'", stage.name),
                ));
            }

            check_env(&stage.environment, &format!("{}.environment", field), &mut issues);

            if stage.steps.is_empty() {
                issues.push(DefinitionIssue::new(
                    format!("{}.steps", field),
                    format!("stage '{}' has no steps", stage.name),
                ));
            }

            for (step_idx, step) in stage.steps.iter().enumerate() {
                step.check(&format!("{}.steps[{}]", field, step_idx), &mut issues);
            }
        }

        for event in [
            HookEvent::Always,
            HookEvent::Success,
            HookEvent::Failure,
            HookEvent::Unstable,
        ] {
            for (idx, command) in self.hooks.commands(event).iter().enumerate() {
                command.check(&format!("hooks.{}[{}]", event, idx), &mut issues);
            }
        }

        if let Some(archive) = &self.archive {
            if archive.patterns.is_empty() {
                issues.push(DefinitionIssue::new(
                    "archive.patterns",
                    "archive needs at least one pattern",
                ));
            }
            check_patterns(&archive.patterns, "archive.patterns", &mut issues);
            check_patterns(&archive.exclude, "archive.exclude", &mut issues);
        }

        issues
    }

    /// Validate, turning any problem into a definition error.
    pub fn check(&self) -> Result<()> {
        let issues = self.validate();
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Error::definition_invalid(issues))
        }
    }
}

fn check_env(env: &EnvMap, field: &str, issues: &mut Vec<DefinitionIssue>) {
    for key in env.keys() {
        if !ENV_NAME_PATTERN.is_match(key) {
            issues.push(DefinitionIssue::new(
                format!("{}.{}", field, key),
                format!("'{}' is not a valid environment variable name", key),
            ));
        }
    }
}

fn check_patterns(patterns: &[String], field: &str, issues: &mut Vec<DefinitionIssue>) {
    for (idx, pattern) in patterns.iter().enumerate() {
        if pattern.trim().is_empty() {
            issues.push(DefinitionIssue::new(format!("{}[{}]", field, idx), "pattern is empty"));
        } else if Path::new(pattern).is_absolute() || pattern.split('/').any(|part| part == "..") {
            issues.push(DefinitionIssue::new(
                format!("{}[{}]", field, idx),
                format!("pattern '{}' must stay inside the workspace", pattern),
            ));
        } else if let Err(e) = glob::Pattern::new(pattern) {
            issues.push(DefinitionIssue::new(
                format!("{}[{}]", field, idx),
                format!("invalid glob '{}': {}", pattern, e.msg),
            ));
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Parse a pipeline document without validating it.
pub fn parse(content: &str, format: DefinitionFormat, origin: &str) -> Result<Pipeline> {
    format::decode(content, format, origin)
}

/// Read and parse a pipeline file without validating it. The format follows
/// the extension.
pub fn read(path: &Path) -> Result<Pipeline> {
    if !path.is_file() {
        return Err(Error::definition_not_found(path.display().to_string()));
    }

    let format = DefinitionFormat::from_path(path)?;
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    parse(&content, format, &path.display().to_string())
}

/// Read, parse and validate a pipeline file.
pub fn load(path: &Path) -> Result<Pipeline> {
    let pipeline = read(path)?;
    pipeline.check()?;

    tracing::debug!(
        path = %path.display(),
        stages = pipeline.stages.len(),
        "loaded pipeline"
    );

    Ok(pipeline)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_stage() -> Pipeline {
        Pipeline::new(vec![
            Stage::new("build", vec![Command::exec(["cargo", "build"])]),
            Stage::new("test", vec![Command::shell("cargo test")]),
        ])
    }

    #[test]
    fn valid_pipeline_has_no_issues() {
        assert!(two_stage().validate().is_empty());
        assert!(two_stage().check().is_ok());
    }

    #[test]
    fn several_problems_are_one_definition_error() {
        let err = Pipeline::new(vec![Stage::new("", vec![])])
            .check()
            .unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DefinitionInvalid);
        assert_eq!(err.code.as_str(), "definition.invalid");
        assert!(err.details["issues"].as_array().map_or(0, Vec::len) >= 2);
    }

    #[test]
    fn duplicate_stage_names_are_reported() {
        let mut pipeline = two_stage();
        pipeline.stages[1].name = "build".to_string();
        let issues = pipeline.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "stages[1].name");
        assert!(issues[0].problem.contains("duplicate"));
    }

    #[test]
    fn empty_stage_name_and_empty_steps_are_both_reported() {
        let pipeline = Pipeline::new(vec![Stage::new("  ", vec![])]);
        let fields: Vec<_> = pipeline.validate().into_iter().map(|i| i.field).collect();
        assert_eq!(fields, vec!["stages[0].name", "stages[0].steps"]);
    }

    #[test]
    fn command_needs_exactly_one_invocation() {
        let mut both = Command::shell("make");
        both.exec = Some(vec!["make".to_string()]);
        let pipeline = Pipeline::new(vec![Stage::new(
            "build",
            vec![Command::default(), both, Command::exec(Vec::<String>::new())],
        )]);

        let issues = pipeline.validate();
        assert_eq!(issues.len(), 3);
        assert_eq!(issues[0].field, "stages[0].steps[0]");
        assert_eq!(issues[1].field, "stages[0].steps[1]");
        assert_eq!(issues[2].field, "stages[0].steps[2].exec");
    }

    #[test]
    fn invalid_env_names_are_reported() {
        let mut pipeline = two_stage();
        pipeline.environment.insert("GOOD_NAME".to_string(), "1".to_string());
        pipeline.environment.insert("1BAD".to_string(), "1".to_string());
        pipeline.stages[0].steps[0] = Command::shell("true").with_env("ALSO-BAD", "x");

        let issues = pipeline.validate();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].field, "environment.1BAD");
        assert_eq!(issues[1].field, "stages[0].steps[0].env.ALSO-BAD");
    }

    #[test]
    fn archive_patterns_are_checked() {
        let mut pipeline = two_stage();
        let mut spec = ArchiveSpec::new(["dist/**/*.tar.gz", "../secrets", "[unclosed"]);
        spec.exclude = vec!["/abs/*".to_string()];
        pipeline.archive = Some(spec);

        let fields: Vec<_> = pipeline.validate().into_iter().map(|i| i.field).collect();
        assert_eq!(
            fields,
            vec!["archive.patterns[1]", "archive.patterns[2]", "archive.exclude[0]"]
        );
    }

    #[test]
    fn hook_commands_are_checked() {
        let mut pipeline = two_stage();
        pipeline.hooks.failure.push(Command::shell(""));
        let issues = pipeline.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field, "hooks.failure[0].run");
    }

    #[test]
    fn invocation_distinguishes_shell_and_exec() {
        assert_eq!(
            Command::shell("echo hi").invocation(),
            Some(Invocation::Shell("echo hi"))
        );
        let exec = Command::exec(["echo", "hi"]);
        assert!(matches!(exec.invocation(), Some(Invocation::Exec(argv)) if argv.len() == 2));
        assert_eq!(Command::default().invocation(), None);
    }

    #[test]
    fn display_quotes_exec_arguments() {
        assert_eq!(Command::exec(["echo", "hello world"]).display(), "echo 'hello world'");
        assert_eq!(Command::shell("make all").display(), "make all");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load(Path::new("/nonexistent/pipeline.yml")).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DefinitionNotFound);
    }

    #[test]
    fn load_rejects_invalid_definition() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ci.yml");
        std::fs::write(&path, "stages: []\n").unwrap();

        let err = load(&path).unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DefinitionInvalid);
    }
}
