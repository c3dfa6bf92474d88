//! Locations of the configuration layers.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::ConfigError;

const PROJECT_FILE: &str = "heritage-access.toml";
const LOCAL_FILE: &str = "heritage-access.local.toml";

/// Per-user defaults, e.g. `~/.config/heritage-access/config.toml` on Linux.
pub(crate) fn user_config_file() -> Result<PathBuf, ConfigError> {
    ProjectDirs::from("org", "Heritage", "heritage-access")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .ok_or_else(|| ConfigError::XdgError("no home directory for user config".to_string()))
}

/// Deployment file, tracked alongside the deployment.
pub(crate) fn project_config_file(project_dir: &Path) -> PathBuf {
    project_dir.join(PROJECT_FILE)
}

/// Untracked per-host overrides of the deployment file.
pub(crate) fn local_config_file(project_dir: &Path) -> PathBuf {
    project_dir.join(LOCAL_FILE)
}
