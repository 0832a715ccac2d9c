//! Configuration loading and root folder resolution
//!
//! The root folder holds the SQLite database and any scratch files. It is
//! resolved with a 4-tier priority order:
//! 1. Command-line argument (highest priority)
//! 2. `LRX_ROOT` environment variable
//! 3. TOML config file (`root_folder` key)
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable consulted when no CLI argument is given
pub const ROOT_ENV_VAR: &str = "LRX_ROOT";

/// Optional TOML config file contents
///
/// Pool sizing lives here rather than in the settings table because the
/// pool must exist before the settings table can be read.
#[derive(Debug, Clone, Deserialize)]
pub struct FileConfig {
    pub root_folder: Option<String>,
    #[serde(default = "default_pool_max")]
    pub pool_max_connections: u32,
    #[serde(default = "default_pool_min")]
    pub pool_min_connections: u32,
}

fn default_pool_max() -> u32 {
    20
}

fn default_pool_min() -> u32 {
    5
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            pool_max_connections: default_pool_max(),
            pool_min_connections: default_pool_min(),
        }
    }
}

impl FileConfig {
    /// Load the config file if one exists, otherwise return defaults
    pub fn load() -> Self {
        match config_file_path() {
            Some(path) if path.exists() => match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => config,
                    Err(e) => {
                        tracing::warn!("Ignoring malformed config file {}: {}", path.display(), e);
                        Self::default()
                    }
                },
                Err(e) => {
                    tracing::warn!("Could not read config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            _ => Self::default(),
        }
    }
}

/// Resolves the root folder following the 4-tier priority order
pub struct RootFolderResolver {
    cli_arg: Option<String>,
    file_config: FileConfig,
}

impl RootFolderResolver {
    pub fn new(cli_arg: Option<String>) -> Self {
        Self {
            cli_arg,
            file_config: FileConfig::load(),
        }
    }

    /// Resolve the root folder path
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Command-line argument
        if let Some(path) = &self.cli_arg {
            return PathBuf::from(path);
        }

        // Priority 2: Environment variable
        if let Ok(path) = std::env::var(ROOT_ENV_VAR) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }

        // Priority 3: TOML config file
        if let Some(path) = &self.file_config.root_folder {
            return PathBuf::from(path);
        }

        // Priority 4: OS-dependent compiled default
        default_root_folder()
    }

    pub fn file_config(&self) -> &FileConfig {
        &self.file_config
    }
}

/// Creates the root folder on first run and locates the database file
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder directory if missing
    pub fn ensure_directory_exists(&self) -> Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!("Created root folder: {}", self.root_folder.display());
        } else if !self.root_folder.is_dir() {
            return Err(Error::Config(format!(
                "Root folder path exists but is not a directory: {}",
                self.root_folder.display()
            )));
        }
        Ok(())
    }

    /// Path of the LRX database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("lrx.db")
    }

    pub fn root_folder(&self) -> &Path {
        &self.root_folder
    }
}

/// Platform config file location (`~/.config/lrx/config.toml` or equivalent)
fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("lrx").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/lrx/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    user_config
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lrx"))
        .unwrap_or_else(|| PathBuf::from("./lrx_data"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arg_takes_priority() {
        let resolver = RootFolderResolver {
            cli_arg: Some("/tmp/lrx-cli".to_string()),
            file_config: FileConfig {
                root_folder: Some("/tmp/lrx-file".to_string()),
                ..FileConfig::default()
            },
        };
        assert_eq!(resolver.resolve(), PathBuf::from("/tmp/lrx-cli"));
    }

    #[test]
    fn file_config_used_when_no_cli_arg() {
        let resolver = RootFolderResolver {
            cli_arg: None,
            file_config: FileConfig {
                root_folder: Some("/tmp/lrx-file".to_string()),
                ..FileConfig::default()
            },
        };
        // Only valid when LRX_ROOT is unset; integration tests cover the env tier.
        if std::env::var(ROOT_ENV_VAR).is_err() {
            assert_eq!(resolver.resolve(), PathBuf::from("/tmp/lrx-file"));
        }
    }

    #[test]
    fn default_pool_sizes() {
        let config = FileConfig::default();
        assert_eq!(config.pool_max_connections, 20);
        assert_eq!(config.pool_min_connections, 5);
    }
}
