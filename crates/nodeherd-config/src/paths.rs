//! Where configuration files live.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Git-tracked project file.
pub const PROJECT_FILE: &str = "nodeherd.toml";
/// Untracked per-checkout overrides.
pub const LOCAL_FILE: &str = "nodeherd.local.toml";
const USER_FILE: &str = "config.toml";

/// User and project configuration locations.
pub struct Paths {
    dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            dirs: ProjectDirs::from("com", "Nodeherd", "nodeherd"),
        }
    }

    /// Platform config directory, `~/.config/nodeherd` on Linux.
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.dirs {
            Some(dirs) => Ok(dirs.config_dir().to_path_buf()),
            None => Err(ConfigError::XdgError(
                "no home directory to place user configuration in".to_string(),
            )),
        }
    }

    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.user_config_dir().map(|dir| dir.join(USER_FILE))
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }

    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_FILE)
    }

    /// Whether `project_dir` carries its own `nodeherd.toml`.
    pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
        Self::project_config_file(project_dir).is_file()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        if let Ok(config_file) = paths.user_config_file() {
            assert!(config_file.to_string_lossy().contains("nodeherd"));
            assert!(config_file.ends_with("config.toml"));
        }
    }

    #[test]
    fn test_project_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_file = Paths::project_config_file(project_dir);
        assert_eq!(config_file, project_dir.join("nodeherd.toml"));

        let local_file = Paths::local_config_file(project_dir);
        assert_eq!(local_file, project_dir.join("nodeherd.local.toml"));

        assert!(!Paths::is_initialized(project_dir));
        std::fs::write(&config_file, "[cluster]\ndnodes = 3\n").unwrap();
        assert!(Paths::is_initialized(project_dir));
    }
}
