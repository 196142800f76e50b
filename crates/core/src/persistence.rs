use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Database;

pub const CONNECTION_KEY: &str = "dbConnection";
pub const DATABASES_KEY: &str = "databases";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;

fn default_port() -> u16 {
    DEFAULT_MYSQL_PORT
}

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
}

impl ConnectionConfig {
    #[must_use]
    pub fn new(host: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_MYSQL_PORT,
            username: username.into(),
            password: String::new(),
            database: None,
        }
    }

    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct BackendError {
    message: String,
}

impl BackendError {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Storage the session controller loads from and saves to. `save_databases` always receives
/// the whole forest and must treat repeated calls as overwrites.
#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn connect(&self, config: &ConnectionConfig) -> Result<bool, BackendError>;

    fn saved_connection(&self) -> Option<ConnectionConfig>;

    fn has_active_connection(&self) -> bool;

    fn forget_connection(&self) -> Result<(), BackendError>;

    async fn load_databases(&self) -> Result<Vec<Database>, BackendError>;

    async fn save_databases(&self, databases: &[Database]) -> Result<bool, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::{ConnectionConfig, DEFAULT_MYSQL_PORT};

    #[test]
    fn debug_output_hides_password() {
        let mut config = ConnectionConfig::new("db.local", "admin");
        config.password = "hunter2".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("db.local"));
    }

    #[test]
    fn stored_config_without_port_uses_mysql_default() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"host":"localhost","username":"root","password":"x"}"#)
                .expect("config should parse");
        assert_eq!(config.port, DEFAULT_MYSQL_PORT);
        assert_eq!(config.address(), "localhost:3306");
        assert!(config.database.is_none());
    }
}
