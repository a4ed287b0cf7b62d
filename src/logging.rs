//! Diagnostic logging setup.
//!
//! Diagnostics go to stderr so stdout stays reserved for the JSON envelope.
//!
//! - `PIPEWRIGHT_LOG`: filter directives (`debug`, `pipewright=trace`, ...);
//!   overrides the `-v` flags when set
//! - `PIPEWRIGHT_LOG_FORMAT`: `compact` (default) or `json`

use std::env;
use std::io::IsTerminal;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

pub const LOG_ENV: &str = "PIPEWRIGHT_LOG";
pub const LOG_FORMAT_ENV: &str = "PIPEWRIGHT_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl LogFormat {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Level implied by the number of `-v` flags.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        _ => "debug",
    }
}

pub fn init(verbosity: u8) {
    let filter = match env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(level_for(verbosity)),
    };

    let format = env::var(LOG_FORMAT_ENV)
        .map(|f| LogFormat::parse(&f))
        .unwrap_or(LogFormat::Compact);

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => {
            let layer = fmt::layer().json().with_writer(std::io::stderr);
            subscriber.with(layer).init();
        }
        LogFormat::Compact => {
            let layer = fmt::layer()
                .compact()
                .with_ansi(std::io::stderr().is_terminal())
                .with_target(false)
                .with_writer(std::io::stderr);
            subscriber.with(layer).init();
        }
    }
}
