//! Configuration loader with multi-source merging

use crate::paths;
use crate::{AccessConfig, ConfigError};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
    include_user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "HERITAGE".to_string(),
            include_user_config: true,
        }
    }

    /// Set the deployment directory holding heritage-access.toml
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "HERITAGE")
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Skip ~/.config/heritage-access/config.toml
    pub fn without_user_config(mut self) -> Self {
        self.include_user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<AccessConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = AccessConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. User config (~/.config/heritage-access/config.toml)
        if self.include_user_config {
            if let Ok(user_config_file) = paths::user_config_file()
                && user_config_file.exists()
            {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        // 3. Deployment config (heritage-access.toml)
        let project_config_file = paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 4. Local config (heritage-access.local.toml, gitignored)
        let local_config_file = paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 5. Environment variables (HERITAGE_*)
        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let access_config: AccessConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        access_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(access_config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default(self) -> AccessConfig {
        self.load().unwrap_or_default()
    }

    /// Parse a single TOML file without merging any other source.
    pub fn load_file(path: impl AsRef<Path>) -> std::result::Result<AccessConfig, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
            path: path.to_path_buf(),
            source,
        })?;

        let parsed: AccessConfig =
            toml::from_str(&raw).map_err(|source| ConfigError::ParseError {
                path: path.to_path_buf(),
                source,
            })?;

        parsed.validate()?;
        Ok(parsed)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EmbargoTieBreak;
    use std::fs;
    use tempfile::tempdir;

    fn loader(dir: &Path) -> ConfigLoader {
        ConfigLoader::new()
            .with_project_dir(dir)
            .with_env_prefix("HERITAGE_TEST_UNSET")
            .without_user_config()
    }

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = loader(temp_dir.path()).load().expect("Failed to load config");

        assert_eq!(config, AccessConfig::default());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[decision]
sensitive_min_trust_level = 4

[requests]
default_validity_days = 30

[embargo]
tie_break = "most_recent"
"#;
        fs::write(project_dir.join("heritage-access.toml"), config_content)
            .expect("Failed to write config");

        let config = loader(project_dir).load().expect("Failed to load config");

        assert_eq!(config.decision.sensitive_min_trust_level, 4);
        assert_eq!(config.requests.default_validity_days, 30);
        assert_eq!(config.embargo.tie_break, EmbargoTieBreak::MostRecent);
        assert_eq!(config.listing.page_size, 25);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("heritage-access.toml"),
            "[listing]\npage_size = 50\n",
        )
        .expect("Failed to write project config");

        fs::write(
            project_dir.join("heritage-access.local.toml"),
            "[listing]\npage_size = 10\n",
        )
        .expect("Failed to write local config");

        let config = loader(project_dir).load().expect("Failed to load config");

        // Local config should override project config
        assert_eq!(config.listing.page_size, 10);
    }

    #[test]
    fn test_invalid_values_fail_loading() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("heritage-access.toml"),
            "[requests]\ndefault_validity_days = 0\n",
        )
        .expect("Failed to write config");

        assert!(loader(project_dir).load().is_err());
    }

    #[test]
    fn test_load_file_reports_parse_errors() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("broken.toml");
        fs::write(&path, "[decision\n").expect("Failed to write config");

        assert!(matches!(
            ConfigLoader::load_file(&path),
            Err(ConfigError::ParseError { .. })
        ));
        assert!(matches!(
            ConfigLoader::load_file(temp_dir.path().join("missing.toml")),
            Err(ConfigError::ReadError { .. })
        ));
    }
}
