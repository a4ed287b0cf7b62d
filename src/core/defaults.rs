use serde::{Deserialize, Serialize};
use std::fs;

use crate::duration::{self, HumanDuration};
use crate::error::{Error, Result};
use crate::paths;
use crate::utils::{io, shell};

/// Root configuration structure for pipewright.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct PipewrightConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// Runner defaults that can be overridden via pipewright.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Defaults {
    /// Where artifacts are copied, relative to the workspace unless absolute.
    #[serde(default = "default_archive_dir")]
    pub archive_dir: String,

    /// Where run reports are written, relative to the workspace unless absolute.
    #[serde(default = "default_report_dir")]
    pub report_dir: String,

    /// Timeout for commands that declare none at any level.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_timeout: Option<HumanDuration>,

    /// Time between SIGTERM and SIGKILL when a command is stopped.
    #[serde(default = "default_kill_grace")]
    pub kill_grace: HumanDuration,

    /// Shell prefix for `run` lines; the line is appended as the last argument.
    #[serde(default = "shell::default_shell")]
    pub shell: Vec<String>,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            archive_dir: default_archive_dir(),
            report_dir: default_report_dir(),
            default_timeout: None,
            kill_grace: default_kill_grace(),
            shell: shell::default_shell(),
        }
    }
}

/// Keys accepted by `config set`.
pub const KEYS: [&str; 5] = [
    "archiveDir",
    "reportDir",
    "defaultTimeout",
    "killGrace",
    "shell",
];

impl Defaults {
    /// Set one field from its string form.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let invalid = |problem: String| {
            Error::config_invalid_value(key, Some(value.to_string()), problem)
        };

        match key {
            "archiveDir" | "reportDir" => {
                if value.trim().is_empty() {
                    return Err(invalid(format!("{} cannot be empty", key)));
                }
                if key == "archiveDir" {
                    self.archive_dir = value.to_string();
                } else {
                    self.report_dir = value.to_string();
                }
            }
            "defaultTimeout" => {
                self.default_timeout = match value.trim() {
                    "" | "none" => None,
                    other => Some(duration::parse_duration(other).map_err(|e| invalid(e.message))?),
                };
            }
            "killGrace" => {
                self.kill_grace = duration::parse_duration(value).map_err(|e| invalid(e.message))?;
            }
            "shell" => {
                let parts: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if parts.is_empty() {
                    return Err(invalid("shell cannot be empty".to_string()));
                }
                self.shell = parts;
            }
            _ => {
                return Err(Error::config_invalid_value(
                    key,
                    Some(value.to_string()),
                    format!("Unknown config key '{}'", key),
                )
                .with_hint(format!("Valid keys: {}", KEYS.join(", "))))
            }
        }

        Ok(())
    }
}

// =============================================================================
// Default value functions
// =============================================================================

fn default_archive_dir() -> String {
    ".pipewright/archive".to_string()
}

fn default_report_dir() -> String {
    ".pipewright/reports".to_string()
}

fn default_kill_grace() -> HumanDuration {
    HumanDuration::from_secs(5)
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full pipewright.json config, falling back to built-in defaults
/// when the file is missing or unreadable.
pub fn load_config() -> PipewrightConfig {
    match load_config_from_file() {
        Ok(Some(config)) => config,
        Ok(None) => PipewrightConfig::default(),
        Err(err) => {
            tracing::warn!(error = %err, "ignoring invalid pipewright.json");
            PipewrightConfig::default()
        }
    }
}

/// Load pipewright.json strictly; `None` when the file does not exist.
pub fn load_config_from_file() -> Result<Option<PipewrightConfig>> {
    let path = paths::pipewright_json()?;

    if !path.exists() {
        return Ok(None);
    }

    let content = io::read_file(&path, &format!("read {}", path.display()))?;

    let config: PipewrightConfig = serde_json::from_str(&content)
        .map_err(|e| Error::config_invalid_json(path.display().to_string(), e))?;

    Ok(Some(config))
}

/// Save config to pipewright.json (creates the directory if missing).
pub fn save_config(config: &PipewrightConfig) -> Result<()> {
    let path = paths::pipewright_json()?;

    if let Some(parent) = path.parent() {
        io::ensure_dir(parent, "create config directory")?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize pipewright.json".to_string()))
    })?;

    io::write_file_atomic(&path, &content, &format!("write {}", path.display()))
}

/// Delete pipewright.json (reset to defaults). Returns whether a file existed.
pub fn reset_config() -> Result<bool> {
    let path = paths::pipewright_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Check if pipewright.json exists
pub fn config_exists() -> bool {
    paths::pipewright_json()
        .map(|p| p.exists())
        .unwrap_or(false)
}

/// Get the path to pipewright.json (for display purposes)
pub fn config_path() -> Result<String> {
    Ok(paths::pipewright_json()?.display().to_string())
}

/// Get built-in defaults (ignoring any file config)
pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_builtin_defaults() {
        let config: PipewrightConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.defaults, builtin_defaults());
        assert_eq!(config.defaults.kill_grace, HumanDuration::from_secs(5));
        assert!(config.defaults.default_timeout.is_none());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config: PipewrightConfig =
            serde_json::from_str(r#"{"defaults":{"defaultTimeout":"45m","shell":["bash","-c"]}}"#)
                .unwrap();
        assert_eq!(
            config.defaults.default_timeout,
            Some(HumanDuration::from_secs(2_700))
        );
        assert_eq!(config.defaults.shell, vec!["bash", "-c"]);
        assert_eq!(config.defaults.archive_dir, ".pipewright/archive");
    }

    #[test]
    fn set_parses_each_key() {
        let mut defaults = Defaults::default();
        defaults.set("defaultTimeout", "2h").unwrap();
        defaults.set("killGrace", "10").unwrap();
        defaults.set("shell", "bash -eo pipefail -c").unwrap();
        defaults.set("reportDir", "/var/ci/reports").unwrap();

        assert_eq!(defaults.default_timeout, Some(HumanDuration::from_secs(7_200)));
        assert_eq!(defaults.kill_grace, HumanDuration::from_secs(10));
        assert_eq!(defaults.shell, vec!["bash", "-eo", "pipefail", "-c"]);
        assert_eq!(defaults.report_dir, "/var/ci/reports");

        defaults.set("defaultTimeout", "none").unwrap();
        assert!(defaults.default_timeout.is_none());
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_values() {
        let mut defaults = Defaults::default();
        let err = defaults.set("colour", "red").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
        assert_eq!(err.hints.len(), 1);

        assert!(defaults.set("killGrace", "soon").is_err());
        assert!(defaults.set("shell", "   ").is_err());
    }
}
