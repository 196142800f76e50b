use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Pool};
use tabula_core::model::Database;
use tabula_core::persistence::{
    BackendError, ConnectionConfig, PersistenceBackend, CONNECTION_KEY, DATABASES_KEY,
};
use tracing::{debug, info};

use crate::file_store::{read_saved_connection, write_saved_connection, FileKeyValueStore};

/// Keeps the forest as a JSON document in a two-column state table on a MySQL server.
/// The connection config itself stays in a local key-value directory so a session can be
/// resumed before any server round trip.
#[derive(Debug)]
pub struct MysqlBackend {
    local: FileKeyValueStore,
    state_table: String,
    pool: Mutex<Option<Pool>>,
}

impl MysqlBackend {
    #[must_use]
    pub fn new(local_dir: impl Into<PathBuf>, state_table: impl Into<String>) -> Self {
        Self {
            local: FileKeyValueStore::new(local_dir),
            state_table: state_table.into(),
            pool: Mutex::new(None),
        }
    }

    fn active_pool(&self) -> Result<Pool, BackendError> {
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or_else(|| BackendError::new("mysql backend is not connected"))
    }

    fn checked_table(&self) -> Result<&str, BackendError> {
        if is_valid_identifier(&self.state_table) {
            Ok(&self.state_table)
        } else {
            Err(BackendError::new(format!(
                "invalid state table name `{}`",
                self.state_table
            )))
        }
    }

    pub async fn disconnect(&self) -> Result<(), BackendError> {
        let pool = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(pool) = pool {
            pool.disconnect().await.map_err(to_backend_error)?;
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceBackend for MysqlBackend {
    async fn connect(&self, config: &ConnectionConfig) -> Result<bool, BackendError> {
        let table = self.checked_table()?;
        let pool = Pool::new(opts_from_config(config));
        let mut conn = pool.get_conn().await.map_err(to_backend_error)?;
        conn.ping().await.map_err(to_backend_error)?;
        conn.query_drop(create_state_table_sql(table))
            .await
            .map_err(to_backend_error)?;
        drop(conn);

        info!(address = %config.address(), table, "mysql state table ready");
        let previous = self
            .pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(pool);
        if let Some(previous) = previous {
            previous.disconnect().await.map_err(to_backend_error)?;
        }

        write_saved_connection(&self.local, config)?;
        Ok(true)
    }

    fn saved_connection(&self) -> Option<ConnectionConfig> {
        read_saved_connection(&self.local)
    }

    fn has_active_connection(&self) -> bool {
        self.local.contains(CONNECTION_KEY)
    }

    fn forget_connection(&self) -> Result<(), BackendError> {
        self.local.remove(CONNECTION_KEY)?;
        // Dropping the pool closes its idle connections in the background.
        self.pool
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        Ok(())
    }

    async fn load_databases(&self) -> Result<Vec<Database>, BackendError> {
        let table = self.checked_table()?;
        let mut conn = self
            .active_pool()?
            .get_conn()
            .await
            .map_err(to_backend_error)?;
        let raw: Option<String> = conn
            .exec_first(select_state_sql(table), (DATABASES_KEY,))
            .await
            .map_err(to_backend_error)?;

        let Some(raw) = raw else {
            return Ok(Vec::new());
        };
        let databases: Vec<Database> = serde_json::from_str(&raw)
            .map_err(|error| BackendError::new(format!("stored databases are invalid: {error}")))?;
        debug!(count = databases.len(), "loaded databases from mysql");
        Ok(databases)
    }

    async fn save_databases(&self, databases: &[Database]) -> Result<bool, BackendError> {
        let table = self.checked_table()?;
        let rendered = serde_json::to_string(databases)
            .map_err(|error| BackendError::new(format!("failed to serialize databases: {error}")))?;
        let mut conn = self
            .active_pool()?
            .get_conn()
            .await
            .map_err(to_backend_error)?;
        conn.exec_drop(upsert_state_sql(table), (DATABASES_KEY, rendered))
            .await
            .map_err(to_backend_error)?;
        Ok(true)
    }
}

fn opts_from_config(config: &ConnectionConfig) -> OptsBuilder {
    let mut builder = OptsBuilder::default()
        .ip_or_hostname(config.host.clone())
        .tcp_port(config.port)
        .user(Some(config.username.clone()));

    if !config.password.is_empty() {
        builder = builder.pass(Some(config.password.clone()));
    }

    if let Some(database) = non_empty(config.database.as_deref()) {
        builder = builder.db_name(Some(database.to_string()));
    }

    builder
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.and_then(|raw| {
        let trimmed = raw.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    })
}

fn is_valid_identifier(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn create_state_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS `{table}` (\
         state_key VARCHAR(64) NOT NULL PRIMARY KEY,\
         state_value LONGTEXT NOT NULL\
         )"
    )
}

fn select_state_sql(table: &str) -> String {
    format!("SELECT state_value FROM `{table}` WHERE state_key = ?")
}

fn upsert_state_sql(table: &str) -> String {
    format!(
        "INSERT INTO `{table}` (state_key, state_value) VALUES (?, ?) \
         ON DUPLICATE KEY UPDATE state_value = VALUES(state_value)"
    )
}

fn to_backend_error(error: mysql_async::Error) -> BackendError {
    BackendError::new(error.to_string())
}
