use std::path::PathBuf;

use clap::Args;

use pipewright::format::{self, DefinitionFormat};
use pipewright::pipeline;

#[derive(Args)]
pub struct ShowArgs {
    /// Pipeline file (.yml, .yaml, .json or .toml)
    pub file: PathBuf,

    /// Output format (yaml, json, toml); defaults to the file's own format
    #[arg(long, short = 'f')]
    pub format: Option<String>,
}

/// Print the normalized document: shorthands expanded, defaults omitted.
pub fn run(args: ShowArgs, _global: &crate::commands::GlobalArgs) -> pipewright::Result<(String, i32)> {
    let pipeline = pipeline::load(&args.file)?;

    let target = match &args.format {
        Some(name) => DefinitionFormat::from_name(name)?,
        None => DefinitionFormat::from_path(&args.file)?,
    };

    Ok((format::encode(&pipeline, target)?, 0))
}
