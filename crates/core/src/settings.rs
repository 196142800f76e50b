use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONNECT_DELAY_MS: u64 = 500;
pub const DEFAULT_MYSQL_STATE_TABLE: &str = "tabula_state";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub store_dir: Option<PathBuf>,
    pub connect_delay_ms: u64,
    pub mysql_state_table: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: None,
            connect_delay_ms: DEFAULT_CONNECT_DELAY_MS,
            mysql_state_table: DEFAULT_MYSQL_STATE_TABLE.to_string(),
        }
    }
}

impl Settings {
    #[must_use]
    pub fn connect_delay(&self) -> Duration {
        Duration::from_millis(self.connect_delay_ms)
    }

    /// The configured store directory, or `store/` next to the settings file.
    pub fn resolved_store_dir(&self) -> Result<PathBuf, SettingsError> {
        match &self.store_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_dir()?.join("store")),
        }
    }

    pub fn load_default() -> Result<Self, SettingsError> {
        Self::load_from_path(default_settings_path()?)
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }

        toml::from_str(&raw).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn persist(&self, path: impl AsRef<Path>) -> Result<(), SettingsError> {
        let path = path.as_ref();
        if let Some(parent_dir) = path.parent() {
            fs::create_dir_all(parent_dir).map_err(|source| SettingsError::CreateDir {
                path: parent_dir.to_path_buf(),
                source,
            })?;
        }

        let rendered =
            toml::to_string_pretty(self).map_err(|source| SettingsError::Serialize { source })?;
        fs::write(path, rendered).map_err(|source| SettingsError::Write {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("config directory is unavailable for this platform")]
    ConfigDirUnavailable,
    #[error("failed to read settings file at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse settings file at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("failed to create config directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize settings: {source}")]
    Serialize {
        #[source]
        source: toml::ser::Error,
    },
    #[error("failed to write settings file at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn config_dir() -> Result<PathBuf, SettingsError> {
    if let Some(custom) = env::var_os("TABULA_CONFIG_DIR") {
        return Ok(PathBuf::from(custom));
    }

    let base_dir = if cfg!(target_os = "windows") {
        env::var_os("APPDATA")
            .map(PathBuf::from)
            .ok_or(SettingsError::ConfigDirUnavailable)?
    } else if let Some(xdg_config_home) = env::var_os("XDG_CONFIG_HOME") {
        PathBuf::from(xdg_config_home)
    } else {
        let home = env::var_os("HOME").ok_or(SettingsError::ConfigDirUnavailable)?;
        PathBuf::from(home).join(".config")
    };

    Ok(base_dir.join("tabula"))
}

pub fn default_settings_path() -> Result<PathBuf, SettingsError> {
    Ok(config_dir()?.join("settings.toml"))
}
