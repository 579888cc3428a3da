//! Configuration loader with multi-source merging

use crate::{ConfigError, Paths, SelforgeConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

const ENV_PREFIX: &str = "SELFORGE";

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    project_dir: PathBuf,
    user_config: bool,
}

impl ConfigLoader {
    /// Create a new config loader with default project directory (current dir)
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            user_config: true,
        }
    }

    /// Set the project directory
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Skip ~/.config/selforge/config.toml (hermetic builds and tests)
    pub fn without_user_config(mut self) -> Self {
        self.user_config = false;
        self
    }

    /// Load configuration from all sources with proper precedence
    pub fn load(self) -> Result<SelforgeConfig> {
        let mut builder = config::Config::builder();

        // 1. Start with built-in defaults
        let defaults = SelforgeConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        // 2. File layers (user, then project, then local)
        for (_, file) in Paths::new().layer_files(&self.project_dir, self.user_config) {
            builder = builder.add_source(
                config::File::from(file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        // 3. Environment variables (SELFORGE_MODULE__NAME, SELFORGE_OPTIMIZER__ENABLED, ...)
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let selforge_config: SelforgeConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        selforge_config
            .validate()
            .context("Configuration failed validation")?;

        Ok(selforge_config)
    }

    /// Read a single config file without layering
    pub fn read_file(path: impl AsRef<Path>) -> Result<SelforgeConfig, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&source).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
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
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .without_user_config()
            .load()
            .expect("Failed to load config");

        assert_eq!(config, SelforgeConfig::default());
    }

    #[test]
    fn test_load_project_config() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[module]
name = "httpd"
version = "2.1.0"

[analyzer]
extended_globs = true

[optimizer]
prune_unused_types = false

[actions.serve]
class = "file"
permissions = ["read", "getattr"]
"#;
        fs::write(project_dir.join("selforge.toml"), config_content)
            .expect("Failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .without_user_config()
            .load()
            .expect("Failed to load config");

        assert_eq!(config.module.name, "httpd");
        assert_eq!(config.module.version, "2.1.0");
        assert!(config.analyzer.extended_globs);
        assert!(config.optimizer.enabled);
        assert!(!config.optimizer.prune_unused_types);
        assert_eq!(config.actions["serve"].class, "file");
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("selforge.toml"),
            r#"
[module]
name = "httpd"
"#,
        )
        .expect("Failed to write project config");

        fs::write(
            project_dir.join("selforge.local.toml"),
            r#"
[module]
name = "httpd_dev"
"#,
        )
        .expect("Failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .without_user_config()
            .load()
            .expect("Failed to load config");

        // Local config should override project config
        assert_eq!(config.module.name, "httpd_dev");
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        fs::write(
            temp_dir.path().join("selforge.toml"),
            r#"
[module]
name = "  "
"#,
        )
        .expect("Failed to write config");

        let result = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .without_user_config()
            .load();
        assert!(result.is_err());
    }

    #[test]
    fn test_read_file_reports_path() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let missing = temp_dir.path().join("nope.toml");
        match ConfigLoader::read_file(&missing) {
            Err(ConfigError::ReadError { path, .. }) => assert_eq!(path, missing),
            other => panic!("expected ReadError, got {other:?}"),
        }

        let broken = temp_dir.path().join("broken.toml");
        fs::write(&broken, "[module\nname = 1").expect("Failed to write config");
        assert!(matches!(
            ConfigLoader::read_file(&broken),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
