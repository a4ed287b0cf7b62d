use crate::error::{Error, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the config directory.
pub const CONFIG_DIR_ENV: &str = "PIPEWRIGHT_CONFIG_DIR";

/// Base pipewright config directory (`~/.config/pipewright/` on all platforms,
/// `%APPDATA%\pipewright` on Windows), unless `PIPEWRIGHT_CONFIG_DIR` is set.
pub fn pipewright() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(CONFIG_DIR_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("pipewright"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("pipewright"))
    }
}

/// Global pipewright.json config file path
pub fn pipewright_json() -> Result<PathBuf> {
    Ok(pipewright()?.join("pipewright.json"))
}

/// Resolve a configured directory: `~` expands, relative paths join `workspace`.
pub fn resolve_in_workspace(dir: &str, workspace: &Path) -> PathBuf {
    let expanded = shellexpand::tilde(dir);
    let path = Path::new(expanded.as_ref());
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

/// Resolve a path given on the command line against the current directory.
pub fn absolute_from_cwd(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir()
        .map_err(|e| Error::internal_io(e.to_string(), Some("read current directory".into())))?;
    Ok(cwd.join(path))
}
