//! Artifact path resolution with glob pattern support.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Expand `pattern` relative to `root` into the matching files.
///
/// Literal paths (no glob characters) resolve to themselves when the file
/// exists. Directories never match. Results are relative to `root` and sorted.
pub fn resolve_artifact_paths(root: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    if !contains_glob_chars(pattern) {
        let path = root.join(pattern);
        return Ok(if path.is_file() {
            vec![PathBuf::from(pattern)]
        } else {
            Vec::new()
        });
    }

    let escaped_root = glob::Pattern::escape(&root.to_string_lossy());
    let full = Path::new(&escaped_root).join(pattern);
    let entries = glob::glob(&full.to_string_lossy()).map_err(|e| {
        Error::archive_failed(
            format!("Invalid glob pattern '{}': {}", pattern, e),
            Some(pattern.to_string()),
        )
    })?;

    let matches: BTreeSet<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .filter_map(|p| p.strip_prefix(root).map(Path::to_path_buf).ok())
        .collect();

    Ok(matches.into_iter().collect())
}

pub fn contains_glob_chars(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[') || s.contains(']')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::{self, File};
    use tempfile::TempDir;

    #[test]
    fn literal_path_resolves_when_present() {
        let dir = TempDir::new().unwrap();
        File::create(dir.path().join("artifact.zip")).unwrap();

        let found = resolve_artifact_paths(dir.path(), "artifact.zip").unwrap();
        assert_eq!(found, vec![PathBuf::from("artifact.zip")]);
        assert!(resolve_artifact_paths(dir.path(), "missing.zip")
            .unwrap()
            .is_empty());
    }

    #[test]
    fn glob_returns_every_match_relative_to_root() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dist/nested")).unwrap();
        File::create(dir.path().join("dist/app-1.0.tar.gz")).unwrap();
        File::create(dir.path().join("dist/nested/lib.tar.gz")).unwrap();
        File::create(dir.path().join("dist/readme.txt")).unwrap();

        let found = resolve_artifact_paths(dir.path(), "dist/**/*.tar.gz").unwrap();
        assert_eq!(
            found,
            vec![
                PathBuf::from("dist/app-1.0.tar.gz"),
                PathBuf::from("dist/nested/lib.tar.gz"),
            ]
        );
    }

    #[test]
    fn glob_ignores_directories() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("build-1.0.0.zip")).unwrap();

        let found = resolve_artifact_paths(dir.path(), "build-*.zip").unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn invalid_glob_is_an_archive_error() {
        let dir = TempDir::new().unwrap();
        let err = resolve_artifact_paths(dir.path(), "dist/[").unwrap_err();
        assert_eq!(err.code.as_str(), "archive.failed");
    }

    #[test]
    fn detects_glob_chars() {
        assert!(contains_glob_chars("dist/*.zip"));
        assert!(contains_glob_chars("build-?.tar.gz"));
        assert!(contains_glob_chars("file[0-9].txt"));
        assert!(!contains_glob_chars("dist/artifact.zip"));
    }
}
