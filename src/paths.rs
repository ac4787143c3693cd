//! Path resolution for strata projects
//!
//! # Environment Variables
//!
//! - `STRATA_CONFIG` - Settings file to use instead of `<project>/strata.toml`
//! - `STRATA_STATE_DIR` - Directory holding the state file and its lock
//!
//! # Path Resolution Priority
//!
//! For config_file():
//! 1. `STRATA_CONFIG` environment variable
//! 2. `<project>/strata.toml`
//!
//! For state_dir():
//! 1. `STRATA_STATE_DIR` environment variable
//! 2. `state_path` from the settings file, relative to the project
//! 3. The project directory itself

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Environment variable for the settings file override
pub const ENV_CONFIG: &str = "STRATA_CONFIG";

/// Environment variable for the state directory override
pub const ENV_STATE_DIR: &str = "STRATA_STATE_DIR";

/// Settings file name inside a project
pub const CONFIG_FILE: &str = "strata.toml";

/// Simulated cloud inventory file name
pub const CLOUD_FILE: &str = "strata.cloud.json";

/// Get the settings file path
pub fn config_file(project: &Path) -> PathBuf {
    if let Ok(file) = std::env::var(ENV_CONFIG) {
        let path = expand(&file);
        log::debug!("Using settings from {}: {}", ENV_CONFIG, path.display());
        return path;
    }
    project.join(CONFIG_FILE)
}

/// Get the state directory
pub fn state_dir(project: &Path, configured: Option<&str>) -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return path;
    }
    match configured {
        Some(dir) => resolve(project, dir),
        None => project.to_path_buf(),
    }
}

/// Resolve a configured path against the project directory.
pub fn resolve(project: &Path, path: &str) -> PathBuf {
    let expanded = expand(path);
    if expanded.is_absolute() {
        expanded
    } else {
        project.join(expanded)
    }
}

/// Canonical project directory, falling back to the path as given.
pub fn project_dir(dir: &Path) -> Result<PathBuf> {
    if !dir.exists() {
        anyhow::bail!("Project directory {} does not exist", dir.display());
    }
    dir.canonicalize()
        .with_context(|| format!("Could not resolve {}", dir.display()))
}

/// Expand ~ and environment variables in a path string.
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
