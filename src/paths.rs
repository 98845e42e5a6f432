//! XDG Base Directory compliant path resolution.
//!
//! Every directory is resolved through a three-level fallback:
//! 1. Design IDE specific env var (DESIGN_IDE_CONFIG_DIR, etc.)
//! 2. XDG env var (XDG_CONFIG_HOME, etc.) via `etcetera`
//! 3. Platform default (~/.config, etc.)
//!
//! All paths are absolute. Relative paths from env vars are ignored, as XDG requires.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const APP_DIR: &str = "design-ide";

/// Resolved directory paths for the application.
///
/// Created once at startup, threaded through Config.
#[derive(Debug, Clone)]
pub struct Paths {
    /// Config directory: config.toml lives here
    pub config_dir: PathBuf,

    /// Data directory: the project database
    pub data_dir: PathBuf,

    /// State directory: logs, chat history
    pub state_dir: PathBuf,

    /// Default export directory for generated projects
    pub export_dir: PathBuf,
}

impl Paths {
    /// Resolve all paths using real environment variables.
    pub fn resolve() -> Result<Self> {
        Self::resolve_with_env(|key| std::env::var(key))
    }

    /// Resolve paths with a custom env var lookup (for testing).
    pub fn resolve_with_env<F>(env_fn: F) -> Result<Self>
    where
        F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
    {
        use etcetera::BaseStrategy;

        let strategy = etcetera::choose_base_strategy()
            .map_err(|e| anyhow::anyhow!("Failed to determine base directories: {}", e))?;

        let config_dir = env_or(&env_fn, "DESIGN_IDE_CONFIG_DIR", || {
            strategy.config_dir().join(APP_DIR)
        });

        let data_dir = env_or(&env_fn, "DESIGN_IDE_DATA_DIR", || {
            strategy.data_dir().join(APP_DIR)
        });

        let state_dir = env_or(&env_fn, "DESIGN_IDE_STATE_DIR", || {
            let base_state = strategy.state_dir().unwrap_or_else(|| strategy.data_dir());
            base_state.join(APP_DIR)
        });

        let export_dir = resolve_export_dir(&env_fn, &data_dir);

        Ok(Self {
            config_dir,
            data_dir,
            state_dir,
            export_dir,
        })
    }

    /// Config file: config_dir/config.toml
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// Project database: data_dir/projects.sqlite
    pub fn database(&self) -> PathBuf {
        self.data_dir.join("projects.sqlite")
    }

    /// Terminal chat line history
    pub fn chat_history(&self) -> PathBuf {
        self.state_dir.join("chat_history.txt")
    }

    /// Logs directory
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Create all directories with appropriate permissions.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [&self.config_dir, &self.data_dir, &self.state_dir] {
            create_dir_with_mode(dir)?;
        }
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::resolve().unwrap_or_else(|_| {
            let home = etcetera::home_dir().unwrap_or_else(|_| PathBuf::from("."));
            let data_dir = home.join(".local").join("share").join(APP_DIR);
            Self {
                config_dir: home.join(".config").join(APP_DIR),
                export_dir: data_dir.join("exports"),
                data_dir,
                state_dir: home.join(".local").join("state").join(APP_DIR),
            }
        })
    }
}

/// Resolve an env var with fallback. Ignores empty and relative paths, as XDG requires.
fn env_or<F>(env_fn: &F, var: &str, default: impl FnOnce() -> PathBuf) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    env_fn(var)
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(default)
}

/// Resolve the export directory from DESIGN_IDE_EXPORT_DIR (tilde expanded) or data_dir/exports.
fn resolve_export_dir<F>(env_fn: &F, data_dir: &Path) -> PathBuf
where
    F: Fn(&str) -> std::result::Result<String, std::env::VarError>,
{
    if let Ok(dir) = env_fn("DESIGN_IDE_EXPORT_DIR") {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            let expanded = shellexpand::tilde(trimmed);
            let path = PathBuf::from(expanded.to_string());
            if path.is_absolute() {
                return path;
            }
        }
    }

    data_dir.join("exports")
}

/// Create a directory with mode 0700.
fn create_dir_with_mode(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {}", path.display()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
            .with_context(|| format!("Failed to set permissions on {}", path.display()))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Helper: build an env_fn from a HashMap
    fn make_env(
        map: HashMap<&str, &str>,
    ) -> impl Fn(&str) -> std::result::Result<String, std::env::VarError> {
        move |key: &str| {
            map.get(key)
                .map(|v| v.to_string())
                .ok_or(std::env::VarError::NotPresent)
        }
    }

    #[test]
    fn default_paths_are_xdg_compliant() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_dir.ends_with(APP_DIR), "{:?}", paths.config_dir);
        assert!(paths.data_dir.ends_with(APP_DIR), "{:?}", paths.data_dir);
        assert!(paths.state_dir.ends_with(APP_DIR), "{:?}", paths.state_dir);
        assert!(paths.export_dir.ends_with("exports"));
    }

    #[test]
    fn env_vars_override_xdg() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("DESIGN_IDE_CONFIG_DIR", "/custom/config");
        env.insert("DESIGN_IDE_DATA_DIR", "/custom/data");
        env.insert("DESIGN_IDE_STATE_DIR", "/custom/state");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.config_dir, PathBuf::from("/custom/config"));
        assert_eq!(paths.data_dir, PathBuf::from("/custom/data"));
        assert_eq!(paths.state_dir, PathBuf::from("/custom/state"));
        assert_eq!(paths.export_dir, PathBuf::from("/custom/data/exports"));
    }

    #[test]
    fn relative_and_empty_paths_are_ignored() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("DESIGN_IDE_CONFIG_DIR", "relative/path");
        env.insert("DESIGN_IDE_DATA_DIR", "");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert!(paths.config_dir.is_absolute());
        assert!(paths.data_dir.is_absolute());
        assert!(paths.data_dir.ends_with(APP_DIR));
    }

    #[test]
    fn export_dir_override() {
        let mut env: HashMap<&str, &str> = HashMap::new();
        env.insert("DESIGN_IDE_EXPORT_DIR", "/srv/exports");

        let paths = Paths::resolve_with_env(make_env(env)).unwrap();
        assert_eq!(paths.export_dir, PathBuf::from("/srv/exports"));
    }

    #[test]
    fn convenience_accessors() {
        let paths = Paths::resolve_with_env(make_env(HashMap::new())).unwrap();

        assert!(paths.config_file().ends_with("config.toml"));
        assert!(paths.database().ends_with("projects.sqlite"));
        assert!(paths.chat_history().ends_with("chat_history.txt"));
        assert!(paths.logs_dir().ends_with("logs"));
    }
}
