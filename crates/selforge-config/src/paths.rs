//! Config file discovery.

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// Project-level config file, tracked alongside the rule tables.
pub const PROJECT_FILE: &str = "selforge.toml";

/// Untracked per-checkout overrides.
pub const LOCAL_FILE: &str = "selforge.local.toml";

const USER_FILE: &str = "config.toml";

/// A file-backed configuration layer, lowest precedence first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConfigLayer {
    User,
    Project,
    Local,
}

/// Locates the files behind each [`ConfigLayer`].
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("org", "selforge", "selforge"),
        }
    }

    /// `~/.config/selforge/config.toml` on Linux.
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|dirs| dirs.config_dir().join(USER_FILE))
            .ok_or_else(|| ConfigError::XdgError("no home directory for user config".to_string()))
    }

    pub fn project_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(PROJECT_FILE)
    }

    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join(LOCAL_FILE)
    }

    /// Existing layer files in precedence order. The user layer is skipped
    /// when `include_user` is false or no home directory is known.
    pub fn layer_files(
        &self,
        project_dir: impl AsRef<Path>,
        include_user: bool,
    ) -> Vec<(ConfigLayer, PathBuf)> {
        let project_dir = project_dir.as_ref();
        let user = include_user
            .then(|| self.user_config_file().ok())
            .flatten()
            .map(|path| (ConfigLayer::User, path));

        user.into_iter()
            .chain([
                (ConfigLayer::Project, Self::project_config_file(project_dir)),
                (ConfigLayer::Local, Self::local_config_file(project_dir)),
            ])
            .filter(|(_, path)| path.is_file())
            .collect()
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
    fn user_config_lives_under_selforge() {
        // Some sandboxes have no home directory.
        if let Ok(file) = Paths::new().user_config_file() {
            assert!(file.to_string_lossy().contains("selforge"));
            assert!(file.ends_with(USER_FILE));
        }
    }

    #[test]
    fn only_existing_layers_are_listed() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();
        let paths = Paths::new();

        assert!(paths.layer_files(project_dir, false).is_empty());

        std::fs::write(project_dir.join(LOCAL_FILE), "").unwrap();
        std::fs::write(project_dir.join(PROJECT_FILE), "").unwrap();

        let layers = paths.layer_files(project_dir, false);
        assert_eq!(
            layers,
            vec![
                (ConfigLayer::Project, project_dir.join(PROJECT_FILE)),
                (ConfigLayer::Local, project_dir.join(LOCAL_FILE)),
            ]
        );
    }
}
