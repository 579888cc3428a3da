//! Configuration management for selforge
//!
//! Provides hierarchical configuration loading from multiple sources:
//! 1. Environment variables (SELFORGE_* prefix, highest precedence)
//! 2. selforge.local.toml (gitignored, local overrides)
//! 3. selforge.toml (git-tracked, project config)
//! 4. ~/.config/selforge/config.toml (user defaults)
//! 5. Built-in defaults (lowest precedence)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

mod error;
mod loader;
mod paths;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use paths::{ConfigLayer, LOCAL_FILE, PROJECT_FILE, Paths};

/// Main selforge configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelforgeConfig {
    pub module: ModuleConfig,
    pub analyzer: AnalyzerConfig,
    pub generator: GeneratorConfig,
    pub optimizer: OptimizerConfig,
    /// Action mapper overrides, keyed by action name.
    pub actions: BTreeMap<String, ActionOverride>,
    /// File-type overrides, keyed by exact object path.
    pub file_types: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModuleConfig {
    pub name: String,
    pub version: String,
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            name: "local".to_string(),
            version: "1.0.0".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Accept brace groups, character classes and `tcp:`/`udp:` objects.
    pub extended_globs: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub auto_transitions: bool,
    pub file_contexts: bool,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            auto_transitions: true,
            file_contexts: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    pub enabled: bool,
    pub eliminate_redundant: bool,
    pub prune_unused_types: bool,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            eliminate_redundant: true,
            prune_unused_types: true,
        }
    }
}

/// Override for one action: its object class and ordered permissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionOverride {
    pub class: String,
    pub permissions: Vec<String>,
}

impl SelforgeConfig {
    /// Parse a single TOML document, without layering.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::ParseError {
            path: Path::new("<inline>").to_path_buf(),
            source: e,
        })
    }

    /// Create a configuration that leaves generated output unoptimized
    pub fn unoptimized() -> Self {
        Self {
            optimizer: OptimizerConfig {
                enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Check values the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.module.name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "module.name must not be empty".to_string(),
            ));
        }
        for (action, spec) in &self.actions {
            if spec.class.trim().is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "actions.{action}.class must not be empty"
                )));
            }
            if spec.permissions.is_empty() {
                return Err(ConfigError::ValidationError(format!(
                    "actions.{action}.permissions must not be empty"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = SelforgeConfig::default();
        assert_eq!(config.module.name, "local");
        assert_eq!(config.module.version, "1.0.0");
        assert!(!config.analyzer.extended_globs);
        assert!(config.generator.auto_transitions);
        assert!(config.optimizer.enabled);
        assert!(config.actions.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unoptimized_config() {
        let config = SelforgeConfig::unoptimized();
        assert!(!config.optimizer.enabled);
        assert!(config.generator.file_contexts);
    }

    #[test]
    fn test_inline_toml() {
        let config = SelforgeConfig::from_toml_str(
            r#"
[module]
name = "httpd"

[actions.serve]
class = "file"
permissions = ["read", "getattr"]

[file_types]
"/srv/socket" = "socket"
"#,
        )
        .expect("parse inline config");

        assert_eq!(config.module.name, "httpd");
        assert_eq!(config.module.version, "1.0.0");
        assert_eq!(config.actions["serve"].permissions, vec!["read", "getattr"]);
        assert_eq!(config.file_types["/srv/socket"], "socket");
    }

    #[test]
    fn test_validation_rejects_empty_override() {
        let mut config = SelforgeConfig::default();
        config.actions.insert(
            "serve".to_string(),
            ActionOverride {
                class: "file".to_string(),
                permissions: Vec::new(),
            },
        );
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }
}
