use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tabula_core::model::Database;
use tabula_core::persistence::{
    BackendError, ConnectionConfig, PersistenceBackend, CONNECTION_KEY, DATABASES_KEY,
};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("failed to read store entry at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse store entry at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to create store directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize store entry `{key}`: {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write store entry at {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to remove store entry at {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl From<FileStoreError> for BackendError {
    fn from(error: FileStoreError) -> Self {
        BackendError::new(error.to_string())
    }
}

/// Flat key-value store: one JSON document per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileKeyValueStore {
    dir: PathBuf,
}

impl FileKeyValueStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).is_file()
    }

    pub fn get(&self, key: &str) -> Result<Option<String>, FileStoreError> {
        let path = self.path_for(key);
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FileStoreError::Read { path, source }),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), FileStoreError> {
        fs::create_dir_all(&self.dir).map_err(|source| FileStoreError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let path = self.path_for(key);
        let staging = staging_path(&path);
        fs::write(&staging, value).map_err(|source| FileStoreError::Write {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| FileStoreError::Write { path, source })
    }

    pub fn remove(&self, key: &str) -> Result<bool, FileStoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(FileStoreError::Remove { path, source }),
        }
    }

    pub async fn get_async(&self, key: &str) -> Result<Option<String>, FileStoreError> {
        let path = self.path_for(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(Some(raw)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(FileStoreError::Read { path, source }),
        }
    }

    pub async fn set_async(&self, key: &str, value: &str) -> Result<(), FileStoreError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| FileStoreError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.path_for(key);
        let staging = staging_path(&path);
        tokio::fs::write(&staging, value)
            .await
            .map_err(|source| FileStoreError::Write {
                path: staging.clone(),
                source,
            })?;
        tokio::fs::rename(&staging, &path)
            .await
            .map_err(|source| FileStoreError::Write { path, source })
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}

pub(crate) fn read_saved_connection(store: &FileKeyValueStore) -> Option<ConnectionConfig> {
    let raw = match store.get(CONNECTION_KEY) {
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(error) => {
            warn!(%error, "failed to read saved connection");
            return None;
        }
    };

    match serde_json::from_str(&raw) {
        Ok(config) => Some(config),
        Err(error) => {
            warn!(%error, "saved connection is not valid JSON");
            None
        }
    }
}

pub(crate) fn write_saved_connection(
    store: &FileKeyValueStore,
    config: &ConnectionConfig,
) -> Result<(), FileStoreError> {
    let rendered =
        serde_json::to_string(config).map_err(|source| FileStoreError::Serialize {
            key: CONNECTION_KEY.to_string(),
            source,
        })?;
    store.set(CONNECTION_KEY, &rendered)
}

/// Simulated connection over a local directory: connecting waits a fixed delay and records
/// the config, and the forest lives under the `databases` key.
#[derive(Debug, Clone)]
pub struct FileBackend {
    store: FileKeyValueStore,
    connect_delay: Duration,
}

impl FileBackend {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, connect_delay: Duration) -> Self {
        Self {
            store: FileKeyValueStore::new(dir),
            connect_delay,
        }
    }

    #[must_use]
    pub fn store(&self) -> &FileKeyValueStore {
        &self.store
    }
}

#[async_trait]
impl PersistenceBackend for FileBackend {
    async fn connect(&self, config: &ConnectionConfig) -> Result<bool, BackendError> {
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        write_saved_connection(&self.store, config)?;
        debug!(dir = %self.store.dir().display(), "file store connected");
        Ok(true)
    }

    fn saved_connection(&self) -> Option<ConnectionConfig> {
        read_saved_connection(&self.store)
    }

    fn has_active_connection(&self) -> bool {
        self.store.contains(CONNECTION_KEY)
    }

    fn forget_connection(&self) -> Result<(), BackendError> {
        self.store.remove(CONNECTION_KEY)?;
        Ok(())
    }

    async fn load_databases(&self) -> Result<Vec<Database>, BackendError> {
        let Some(raw) = self.store.get_async(DATABASES_KEY).await? else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw).map_err(|source| {
            FileStoreError::Parse {
                path: self.store.path_for(DATABASES_KEY),
                source,
            }
            .into()
        })
    }

    async fn save_databases(&self, databases: &[Database]) -> Result<bool, BackendError> {
        let rendered =
            serde_json::to_string(databases).map_err(|source| FileStoreError::Serialize {
                key: DATABASES_KEY.to_string(),
                source,
            })?;
        self.store.set_async(DATABASES_KEY, &rendered).await?;
        Ok(true)
    }
}
