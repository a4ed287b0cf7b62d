//! Pipeline document codecs (YAML, JSON, TOML).

use std::fmt;
use std::path::Path;

use crate::error::{Error, Result};
use crate::pipeline::Pipeline;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
    Toml,
}

impl DefinitionFormat {
    pub const ALL: [DefinitionFormat; 3] = [Self::Yaml, Self::Json, Self::Toml];

    pub fn as_str(&self) -> &'static str {
        match self {
            DefinitionFormat::Yaml => "yaml",
            DefinitionFormat::Json => "json",
            DefinitionFormat::Toml => "toml",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_lowercase().as_str() {
            "yaml" | "yml" => Ok(Self::Yaml),
            "json" => Ok(Self::Json),
            "toml" => Ok(Self::Toml),
            other => Err(Error::validation_invalid_argument(
                "format",
                format!("Unknown pipeline format '{}'", other),
                Some(other.to_string()),
                Some(Self::ALL.iter().map(|f| f.as_str().to_string()).collect()),
            )),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();

        Self::from_name(ext).map_err(|_| {
            Error::validation_invalid_argument(
                "pipeline_file",
                format!(
                    "Cannot tell the format of '{}' from its extension",
                    path.display()
                ),
                Some(path.display().to_string()),
                Some(vec![
                    ".yml / .yaml".to_string(),
                    ".json".to_string(),
                    ".toml".to_string(),
                ]),
            )
        })
    }
}

impl fmt::Display for DefinitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn decode(content: &str, format: DefinitionFormat, origin: &str) -> Result<Pipeline> {
    let parsed = match format {
        DefinitionFormat::Yaml => serde_yml::from_str(content).map_err(|e| e.to_string()),
        DefinitionFormat::Json => serde_json::from_str(content).map_err(|e| e.to_string()),
        DefinitionFormat::Toml => toml::from_str(content).map_err(|e| e.to_string()),
    };

    parsed.map_err(|e| Error::definition_parse_failed(origin, format.as_str(), e))
}

pub fn encode(pipeline: &Pipeline, format: DefinitionFormat) -> Result<String> {
    let encoded = match format {
        DefinitionFormat::Yaml => serde_yml::to_string(pipeline).map_err(|e| e.to_string()),
        DefinitionFormat::Json => serde_json::to_string_pretty(pipeline)
            .map(|mut s| {
                s.push('\n');
                s
            })
            .map_err(|e| e.to_string()),
        DefinitionFormat::Toml => toml::to_string_pretty(pipeline).map_err(|e| e.to_string()),
    };

    encoded.map_err(|e| {
        Error::internal_json(e, Some(format!("serialize pipeline as {}", format)))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::HumanDuration;
    use crate::pipeline::{ArchiveSpec, Command, HookEvent, Stage};

    const YAML: &str = r#"
name: crate-ci
timeout: 30m
environment:
  CARGO_TERM_COLOR: always
stages:
  - name: build
    steps:
      - exec: [cargo, build, --release]
  - name: audit
    continueOnError: true
    steps:
      - cargo audit
      - run: cargo deny check
        dir: crates/core
        timeout: 90
        env:
          DENY_LOG: debug
hooks:
  always:
    - echo done
  failure:
    - exec: [notify, failed]
archive:
  patterns: ["target/release/*.tar.gz"]
  fingerprint: true
"#;

    #[test]
    fn decodes_yaml_with_shorthand_steps() {
        let pipeline = decode(YAML, DefinitionFormat::Yaml, "ci.yml").unwrap();

        assert_eq!(pipeline.name.as_deref(), Some("crate-ci"));
        assert_eq!(pipeline.timeout, Some(HumanDuration::from_secs(1_800)));
        assert_eq!(pipeline.stages.len(), 2);
        assert!(pipeline.stages[1].continue_on_error);
        assert_eq!(pipeline.stages[1].steps[0], Command::shell("cargo audit"));

        let deny = &pipeline.stages[1].steps[1];
        assert_eq!(deny.dir.as_deref(), Some("crates/core"));
        assert_eq!(deny.timeout, Some(HumanDuration::from_secs(90)));
        assert_eq!(deny.env.get("DENY_LOG").map(String::as_str), Some("debug"));

        assert_eq!(pipeline.hooks.commands(HookEvent::Always).len(), 1);
        assert_eq!(
            pipeline.hooks.commands(HookEvent::Failure)[0],
            Command::exec(["notify", "failed"])
        );
        assert!(pipeline.archive.as_ref().unwrap().fingerprint);
    }

    #[test]
    fn decodes_toml() {
        let content = r#"
name = "toml-ci"

[[stages]]
name = "build"
steps = ["make", { exec = ["make", "install"], timeout = "5m" }]

[hooks]
success = ["echo ok"]
"#;
        let pipeline = decode(content, DefinitionFormat::Toml, "ci.toml").unwrap();
        assert_eq!(pipeline.stages[0].steps.len(), 2);
        assert_eq!(
            pipeline.stages[0].steps[1].timeout,
            Some(HumanDuration::from_secs(300))
        );
        assert_eq!(pipeline.hooks.success, vec![Command::shell("echo ok")]);
    }

    #[test]
    fn unknown_hook_event_is_a_parse_error() {
        let content = r#"{"stages":[{"name":"a","steps":["true"]}],"hooks":{"aborted":["echo"]}}"#;
        let err = decode(content, DefinitionFormat::Json, "ci.json").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DefinitionParseFailed);
        assert!(err.message.contains("aborted"));
    }

    #[test]
    fn unknown_command_field_is_a_parse_error() {
        let content = "stages:\n  - name: a\n    steps:\n      - script: make\n";
        let err = decode(content, DefinitionFormat::Yaml, "ci.yml").unwrap_err();
        assert_eq!(err.code, crate::error::ErrorCode::DefinitionParseFailed);
    }

    #[test]
    fn round_trips_in_every_format() {
        let mut pipeline = Pipeline::new(vec![
            Stage::new(
                "build",
                vec![Command::exec(["cargo", "build"]).with_env("RUSTFLAGS", "-Dwarnings")],
            ),
            Stage::new(
                "test",
                vec![Command::shell("cargo test").with_timeout(HumanDuration::from_secs(600))],
            )
            .continue_on_error(),
        ]);
        pipeline.name = Some("round-trip".to_string());
        pipeline
            .environment
            .insert("CI".to_string(), "true".to_string());
        pipeline.hooks.always.push(Command::shell("echo always"));
        pipeline.archive = Some(ArchiveSpec::new(["dist/*"]));

        for format in DefinitionFormat::ALL {
            let encoded = encode(&pipeline, format).unwrap();
            let decoded = decode(&encoded, format, "memory").unwrap();
            assert_eq!(decoded, pipeline, "round trip through {}", format);
        }
    }

    #[test]
    fn format_from_path_uses_extension() {
        assert_eq!(
            DefinitionFormat::from_path(Path::new("ci.yaml")).unwrap(),
            DefinitionFormat::Yaml
        );
        assert_eq!(
            DefinitionFormat::from_path(Path::new("ci.TOML")).unwrap(),
            DefinitionFormat::Toml
        );
        assert!(DefinitionFormat::from_path(Path::new("Jenkinsfile")).is_err());
    }
}
