use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigInvalidJson,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    DefinitionNotFound,
    DefinitionParseFailed,
    DefinitionInvalid,

    CommandLaunchFailed,
    CommandFailed,
    CommandTimeout,
    RunCancelled,

    HookFailed,
    ArchiveFailed,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigInvalidJson => "config.invalid_json",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::DefinitionNotFound => "definition.not_found",
            ErrorCode::DefinitionParseFailed => "definition.parse_failed",
            ErrorCode::DefinitionInvalid => "definition.invalid",

            ErrorCode::CommandLaunchFailed => "command.launch_failed",
            ErrorCode::CommandFailed => "command.failed",
            ErrorCode::CommandTimeout => "command.timeout",
            ErrorCode::RunCancelled => "run.cancelled",

            ErrorCode::HookFailed => "hook.failed",
            ErrorCode::ArchiveFailed => "archive.failed",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// True for problems with the pipeline document itself.
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::DefinitionNotFound
                | ErrorCode::DefinitionParseFailed
                | ErrorCode::DefinitionInvalid
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidJsonDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tried: Option<Vec<String>>,
}

/// A single problem found while checking a pipeline document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionIssue {
    /// Dotted location inside the document, e.g. `stages[1].steps[0]`.
    pub field: String,
    pub problem: String,
}

impl DefinitionIssue {
    pub fn new(field: impl Into<String>, problem: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            problem: problem.into(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionParseDetails {
    pub path: String,
    pub format: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandFailedDetails {
    pub command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Last lines of stderr, or of stdout when stderr is blank.
    #[serde(skip_serializing_if = "String::is_empty")]
    pub output: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
        tried: Option<Vec<String>>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.clone(),
            id,
            tried,
        });

        Self::new(ErrorCode::ValidationInvalidArgument, problem, details)
    }

    pub fn definition_not_found(path: impl Into<String>) -> Self {
        let path = path.into();
        Self::new(
            ErrorCode::DefinitionNotFound,
            format!("Pipeline file not found: {}", path),
            serde_json::json!({ "path": path }),
        )
        .with_hint("Pass the path to a .yml, .yaml, .json or .toml pipeline file")
    }

    pub fn definition_parse_failed(
        path: impl Into<String>,
        format: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let details = DefinitionParseDetails {
            path: path.into(),
            format: format.into(),
            error: error.into(),
        };
        let message = format!(
            "Could not parse {} pipeline {}: {}",
            details.format, details.path, details.error
        );
        Self::new(ErrorCode::DefinitionParseFailed, message, to_details(details))
    }

    /// One or more structural problems in an otherwise parseable document.
    pub fn definition_invalid(issues: Vec<DefinitionIssue>) -> Self {
        let message = match issues.as_slice() {
            [single] => format!("Invalid pipeline: {}: {}", single.field, single.problem),
            _ => format!("Invalid pipeline: {} problems found", issues.len()),
        };
        Self::new(
            ErrorCode::DefinitionInvalid,
            message,
            serde_json::json!({ "issues": issues }),
        )
        .with_hint("Run 'pipewright validate <file>' to list every problem")
    }

    pub fn command_launch_failed(command: impl Into<String>, error: impl Into<String>) -> Self {
        let command = command.into();
        let error = error.into();
        Self::new(
            ErrorCode::CommandLaunchFailed,
            format!("Failed to launch '{}': {}", command, error),
            serde_json::json!({ "command": command, "error": error }),
        )
    }

    pub fn command_failed(details: CommandFailedDetails) -> Self {
        let message = match details.exit_code {
            Some(code) => format!("'{}' exited with code {}", details.command, code),
            None => format!("'{}' was terminated by a signal", details.command),
        };
        Self::new(ErrorCode::CommandFailed, message, to_details(details))
    }

    pub fn command_timeout(command: impl Into<String>, timeout: std::time::Duration) -> Self {
        let command = command.into();
        Self::new(
            ErrorCode::CommandTimeout,
            format!(
                "'{}' did not finish within {}",
                command,
                crate::duration::HumanDuration::from(timeout)
            ),
            serde_json::json!({ "command": command, "timeoutSecs": timeout.as_secs() }),
        )
    }

    pub fn run_cancelled(command: Option<String>) -> Self {
        let message = match &command {
            Some(c) => format!("Run cancelled while '{}' was running", c),
            None => "Run cancelled".to_string(),
        };
        Self::new(
            ErrorCode::RunCancelled,
            message,
            serde_json::json!({ "command": command }),
        )
    }

    pub fn hook_failed(event: impl Into<String>, command: impl Into<String>, error: impl Into<String>) -> Self {
        let event = event.into();
        let command = command.into();
        let error = error.into();
        Self::new(
            ErrorCode::HookFailed,
            format!("Hook '{}' command '{}' failed: {}", event, command, error),
            serde_json::json!({ "event": event, "command": command, "error": error }),
        )
    }

    pub fn archive_failed(problem: impl Into<String>, pattern: Option<String>) -> Self {
        let problem = problem.into();
        Self::new(
            ErrorCode::ArchiveFailed,
            problem.clone(),
            serde_json::json!({ "problem": problem, "pattern": pattern }),
        )
    }

    pub fn config_invalid_json(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let details = to_details(ConfigInvalidJsonDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidJson,
            "Invalid JSON in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let problem = problem.into();
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.clone(),
        });

        Self::new(ErrorCode::ConfigInvalidValue, problem, details)
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let error = error.into();
        let message = match &context {
            Some(ctx) => format!("IO error ({}): {}", ctx, error),
            None => format!("IO error: {}", error),
        };
        let details = to_details(InternalIoErrorDetails { error, context });

        Self::new(ErrorCode::InternalIoError, message, details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_issue_uses_definition_invalid() {
        let err = Error::definition_invalid(vec![DefinitionIssue::new("stages", "empty")]);
        assert_eq!(err.code, ErrorCode::DefinitionInvalid);
        assert!(err.message.contains("stages: empty"));
        assert_eq!(err.details["issues"].as_array().map(Vec::len), Some(1));
    }

    #[test]
    fn multiple_issues_keep_definition_invalid_code() {
        let err = Error::definition_invalid(vec![
            DefinitionIssue::new("stages[0].name", "empty"),
            DefinitionIssue::new("stages[1].name", "duplicate"),
        ]);
        assert_eq!(err.code, ErrorCode::DefinitionInvalid);
        assert_eq!(err.code.as_str(), "definition.invalid");
        assert!(err.code.is_definition_error());
        assert!(err.message.contains("2 problems"));
        assert_eq!(err.details["issues"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn command_failed_message_mentions_exit_code() {
        let err = Error::command_failed(CommandFailedDetails {
            command: "cargo test".to_string(),
            stage: Some("test".to_string()),
            exit_code: Some(101),
            output: String::new(),
        });
        assert_eq!(err.message, "'cargo test' exited with code 101");
        assert_eq!(err.details["exitCode"], 101);
        assert!(err.details.get("output").is_none());
    }

    #[test]
    fn with_hint_appends() {
        let err = Error::internal_unexpected("boom").with_hint("try again");
        assert_eq!(err.hints.len(), 1);
        assert_eq!(err.hints[0].message, "try again");
    }
}
