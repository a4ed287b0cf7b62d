//! Artifact capture.
//!
//! After a successful run, files in the workspace matching the archive
//! patterns are copied into the archive directory with their relative paths
//! preserved. Optionally each file is fingerprinted (SHA-256, recorded in
//! `manifest.json`) and the copies are bundled into `artifacts.zip`.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::pipeline::ArchiveSpec;
use crate::utils::{artifact, io as fsio};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const BUNDLE_FILE: &str = "artifacts.zip";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedFile {
    /// Path relative to the workspace (and to the archive directory).
    pub path: String,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveResult {
    pub directory: String,
    pub files: Vec<ArchivedFile>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest<'a> {
    run_id: &'a str,
    files: &'a [ArchivedFile],
}

/// Copy the artifacts described by `spec` from `workspace` into `dest`.
///
/// Files under any of `ignore` (typically the archive and report
/// directories themselves) never match.
pub fn collect(
    spec: &ArchiveSpec,
    workspace: &Path,
    dest: &Path,
    ignore: &[PathBuf],
    run_id: &str,
) -> Result<ArchiveResult> {
    let matches = matching_files(spec, workspace, ignore)?;

    if matches.is_empty() && !spec.allow_empty {
        return Err(Error::archive_failed(
            format!(
                "No files matched archive patterns: {}",
                spec.patterns.join(", ")
            ),
            None,
        )
        .with_hint("Set 'allowEmpty: true' to accept an empty archive"));
    }

    fsio::ensure_dir(dest, "create archive directory")?;

    let mut files = Vec::with_capacity(matches.len());
    for rel in &matches {
        let source = workspace.join(rel);
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fsio::ensure_dir(parent, "create archive directory")?;
        }

        let size = fs::copy(&source, &target).map_err(|e| {
            Error::archive_failed(
                format!("Failed to copy '{}': {}", rel.display(), e),
                None,
            )
        })?;

        let sha256 = if spec.fingerprint {
            Some(fingerprint(&source)?)
        } else {
            None
        };

        files.push(ArchivedFile {
            path: rel.to_string_lossy().replace('\\', "/"),
            size,
            sha256,
        });
    }

    tracing::info!(count = files.len(), dest = %dest.display(), "archived artifacts");

    let manifest = if spec.fingerprint {
        let path = dest.join(MANIFEST_FILE);
        let content = serde_json::to_string_pretty(&Manifest {
            run_id,
            files: &files,
        })
        .map_err(|e| Error::internal_json(e.to_string(), Some("serialize manifest".into())))?;
        fsio::write_file_atomic(&path, &content, "write archive manifest")?;
        Some(path.display().to_string())
    } else {
        None
    };

    let bundle = if spec.zip {
        let path = dest.join(BUNDLE_FILE);
        write_bundle(&path, dest, &files)?;
        Some(path.display().to_string())
    } else {
        None
    };

    Ok(ArchiveResult {
        directory: dest.display().to_string(),
        files,
        manifest,
        bundle,
    })
}

/// Workspace-relative files selected by `spec`, sorted and deduplicated.
pub fn matching_files(
    spec: &ArchiveSpec,
    workspace: &Path,
    ignore: &[PathBuf],
) -> Result<Vec<PathBuf>> {
    let ignored: Vec<PathBuf> = ignore
        .iter()
        .filter_map(|dir| dir.strip_prefix(workspace).ok().map(Path::to_path_buf))
        .collect();

    let mut selected = BTreeSet::new();
    for pattern in &spec.patterns {
        for rel in artifact::resolve_artifact_paths(workspace, pattern)? {
            let rel_str = rel.to_string_lossy().replace('\\', "/");
            if spec
                .exclude
                .iter()
                .any(|ex| glob_match::glob_match(ex, &rel_str))
            {
                continue;
            }
            if ignored.iter().any(|dir| rel.starts_with(dir)) {
                continue;
            }
            selected.insert(rel);
        }
    }

    Ok(selected.into_iter().collect())
}

/// Hex SHA-256 of a file's content.
pub fn fingerprint(path: &Path) -> Result<String> {
    let mut file = File::open(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("open {}", path.display()))))?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("hash {}", path.display()))))?;
    Ok(format!("{:x}", hasher.finalize()))
}

fn write_bundle(path: &Path, dest: &Path, files: &[ArchivedFile]) -> Result<()> {
    let zip_err = |e: zip::result::ZipError| {
        Error::archive_failed(format!("Failed to write {}: {}", BUNDLE_FILE, e), None)
    };
    let io_err = |e: io::Error| {
        Error::archive_failed(format!("Failed to write {}: {}", BUNDLE_FILE, e), None)
    };

    let file = File::create(path).map_err(io_err)?;
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    for entry in files {
        writer.start_file(entry.path.as_str(), options).map_err(zip_err)?;
        let mut source = File::open(dest.join(&entry.path)).map_err(io_err)?;
        io::copy(&mut source, &mut writer).map_err(io_err)?;
    }

    writer.finish().map_err(zip_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("dist/docs")).unwrap();
        fs::write(dir.path().join("dist/app.tar.gz"), "app").unwrap();
        fs::write(dir.path().join("dist/app.debug"), "debug").unwrap();
        fs::write(dir.path().join("dist/docs/index.html"), "<html>").unwrap();
        fs::write(dir.path().join("README.md"), "readme").unwrap();
        dir
    }

    #[test]
    fn copies_matches_preserving_relative_paths() {
        let ws = workspace();
        let dest = ws.path().join(".pipewright/archive");
        let spec = ArchiveSpec::new(["dist/**/*"]);

        let result = collect(&spec, ws.path(), &dest, &[], "run-1").unwrap();

        let paths: Vec<&str> = result.files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["dist/app.debug", "dist/app.tar.gz", "dist/docs/index.html"]
        );
        assert_eq!(
            fs::read_to_string(dest.join("dist/docs/index.html")).unwrap(),
            "<html>"
        );
        assert!(result.manifest.is_none());
        assert!(result.bundle.is_none());
    }

    #[test]
    fn exclude_patterns_drop_matches() {
        let ws = workspace();
        let mut spec = ArchiveSpec::new(["dist/**/*"]);
        spec.exclude = vec!["**/*.debug".to_string(), "dist/docs/**".to_string()];

        let files = matching_files(&spec, ws.path(), &[]).unwrap();
        assert_eq!(files, vec![PathBuf::from("dist/app.tar.gz")]);
    }

    #[test]
    fn overlapping_patterns_are_deduplicated() {
        let ws = workspace();
        let spec = ArchiveSpec::new(["dist/*.tar.gz", "dist/app.tar.gz"]);
        let files = matching_files(&spec, ws.path(), &[]).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn archive_directory_inside_workspace_is_ignored() {
        let ws = workspace();
        let dest = ws.path().join("out");
        fs::create_dir_all(&dest).unwrap();
        fs::write(dest.join("old.txt"), "stale").unwrap();

        let spec = ArchiveSpec::new(["**/*.txt"]);
        let files = matching_files(&spec, ws.path(), &[dest]).unwrap();
        assert!(files.is_empty());
    }

    #[test]
    fn empty_match_fails_unless_allowed() {
        let ws = workspace();
        let dest = ws.path().join("archive");
        let mut spec = ArchiveSpec::new(["target/*.whl"]);

        let err = collect(&spec, ws.path(), &dest, &[], "run-1").unwrap_err();
        assert_eq!(err.code, ErrorCode::ArchiveFailed);

        spec.allow_empty = true;
        let result = collect(&spec, ws.path(), &dest, &[], "run-1").unwrap();
        assert!(result.files.is_empty());
    }

    #[test]
    fn fingerprint_writes_manifest() {
        let ws = workspace();
        let dest = ws.path().join("archive");
        let mut spec = ArchiveSpec::new(["README.md"]);
        spec.fingerprint = true;

        let result = collect(&spec, ws.path(), &dest, &[], "run-42").unwrap();

        let expected = format!("{:x}", Sha256::digest(b"readme"));
        assert_eq!(result.files[0].sha256.as_deref(), Some(expected.as_str()));
        assert_eq!(expected.len(), 64);

        let manifest: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dest.join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest["runId"], "run-42");
        assert_eq!(manifest["files"][0]["path"], "README.md");
    }

    #[test]
    fn fingerprint_is_stable_for_identical_content() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("a"), "same").unwrap();
        fs::write(dir.path().join("b"), "same").unwrap();
        fs::write(dir.path().join("c"), "different").unwrap();

        let a = fingerprint(&dir.path().join("a")).unwrap();
        assert_eq!(a, fingerprint(&dir.path().join("b")).unwrap());
        assert_ne!(a, fingerprint(&dir.path().join("c")).unwrap());
    }

    #[test]
    fn zip_bundles_copied_files() {
        let ws = workspace();
        let dest = ws.path().join("archive");
        let mut spec = ArchiveSpec::new(["dist/*.tar.gz", "README.md"]);
        spec.zip = true;

        let result = collect(&spec, ws.path(), &dest, &[], "run-1").unwrap();
        let bundle = result.bundle.unwrap();

        let archive = zip::ZipArchive::new(File::open(bundle).unwrap()).unwrap();
        let mut names: Vec<&str> = archive.file_names().collect();
        names.sort();
        assert_eq!(names, vec!["README.md", "dist/app.tar.gz"]);
    }
}
