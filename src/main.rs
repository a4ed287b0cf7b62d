use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

#[derive(Debug, Clone, Copy)]
enum ResponseMode {
    Json,
    Raw,
}

mod commands;
mod logging;
mod output;
mod tty;

use commands::{config, run, show, validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "pipewright")]
#[command(version = VERSION)]
#[command(about = "Sequential CI pipeline runner")]
struct Cli {
    /// Increase diagnostic output (-v info, -vv debug); PIPEWRIGHT_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a pipeline (exit 0 success, 1 failure, 2 unstable)
    Run(run::RunArgs),
    /// Check a pipeline document without running it
    Validate(validate::ValidateArgs),
    /// Print the normalized pipeline document
    Show(show::ShowArgs),
    /// Manage global runner configuration
    Config(config::ConfigArgs),
}

fn response_mode(command: &Commands) -> ResponseMode {
    match command {
        Commands::Show(_) => ResponseMode::Raw,
        _ => ResponseMode::Json,
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => return parse_failure(err),
    };

    let global = GlobalArgs {
        verbose: cli.verbose,
    };
    logging::init(global.verbose);

    if let ResponseMode::Raw = response_mode(&cli.command) {
        return match commands::run_raw(cli.command, &global) {
            Ok((content, exit_code)) => {
                print!("{}", content);
                ExitCode::from(exit_code_to_u8(exit_code))
            }
            Err(err) => {
                let _ = output::print_error(&err);
                ExitCode::from(1)
            }
        };
    }

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if let Err(err) = output::print_json_result(json_result) {
        tracing::error!(error = %err, "failed to print response");
    }

    ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}

/// Help and version print as usual. Usage errors go through the error
/// envelope with exit 1, keeping 2 for unstable runs.
fn parse_failure(err: clap::Error) -> ExitCode {
    if !err.use_stderr() {
        let _ = err.print();
        return ExitCode::SUCCESS;
    }

    if let Err(print_err) = output::print_error(&usage_error(&err)) {
        tracing::error!(error = %print_err, "failed to print response");
    }
    ExitCode::from(1)
}

fn usage_error(err: &clap::Error) -> pipewright::Error {
    let rendered = err.render().to_string();
    pipewright::Error::validation_invalid_argument("arguments", rendered.trim(), None, None)
        .with_hint("Run 'pipewright --help' for usage")
}
