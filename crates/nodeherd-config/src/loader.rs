//! Merges the configuration sources into one [`HarnessConfig`].

use crate::{HarnessConfig, Paths};
use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::{Path, PathBuf};

/// Builder over the configuration sources of one project directory.
///
/// Later sources win: built-in defaults, user file, `nodeherd.toml`,
/// `nodeherd.local.toml`, then `<PREFIX>_<SECTION>__<KEY>` variables.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    user_config: bool,
}

impl ConfigLoader {
    /// Loader rooted at the current directory.
    pub fn new() -> Self {
        Self {
            project_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "NHERD".to_string(),
            user_config: true,
        }
    }

    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Ignores the per-user config file.
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Merges every source, resolves relative paths against the project
    /// directory and validates the result.
    pub fn load(self) -> Result<HarnessConfig> {
        let mut builder = Config::builder().add_source(Config::try_from(&HarnessConfig::default())?);

        for file in self.files() {
            builder = builder.add_source(File::from(file).required(false).format(FileFormat::Toml));
        }

        let merged = builder
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to merge configuration sources")?;

        let mut config: HarnessConfig = merged
            .try_deserialize()
            .context("Configuration does not match the expected layout")?;
        config.resolve_paths(&self.project_dir);
        config.validate()?;
        Ok(config)
    }

    /// Like [`Self::load`], falling back to built-in defaults on any error.
    pub fn load_or_default(self) -> HarnessConfig {
        self.load().unwrap_or_default()
    }

    /// Existing config files, lowest precedence first.
    fn files(&self) -> Vec<PathBuf> {
        let user = self
            .user_config
            .then(|| Paths::new().user_config_file().ok())
            .flatten();

        user.into_iter()
            .chain([
                Paths::project_config_file(&self.project_dir),
                Paths::local_config_file(&self.project_dir),
            ])
            .filter(|path| path.is_file())
            .collect()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
