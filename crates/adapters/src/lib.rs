pub mod file_store;
pub mod mysql;

pub use file_store::{FileBackend, FileKeyValueStore, FileStoreError};
pub use mysql::MysqlBackend;
