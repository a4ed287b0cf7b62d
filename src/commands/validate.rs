use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use pipewright::error::DefinitionIssue;
use pipewright::pipeline;

use super::CmdResult;

#[derive(Args)]
pub struct ValidateArgs {
    /// Pipeline file (.yml, .yaml, .json or .toml)
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateOutput {
    command: String,
    path: String,
    valid: bool,
    pipeline: String,
    stages: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<DefinitionIssue>,
}

/// Lint the document without running it. Exit 0 when valid, 1 otherwise.
/// Documents that do not parse are reported as errors.
pub fn run(args: ValidateArgs, _global: &crate::commands::GlobalArgs) -> CmdResult<ValidateOutput> {
    let pipeline = pipeline::read(&args.file)?;
    let issues = pipeline.validate();
    let valid = issues.is_empty();

    let output = ValidateOutput {
        command: "validate".to_string(),
        path: args.file.display().to_string(),
        valid,
        pipeline: pipeline.display_name().to_string(),
        stages: pipeline.stages.iter().map(|s| s.name.clone()).collect(),
        issues,
    };

    Ok((output, if valid { 0 } else { 1 }))
}
