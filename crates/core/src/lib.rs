pub mod coercion;
pub mod ids;
pub mod model;
pub mod operations;
pub mod persistence;
pub mod session;
pub mod settings;
pub mod workspace;

pub use model::{CellValue, Column, ColumnType, Database, Row, RowValues, Table};
pub use persistence::{BackendError, ConnectionConfig, PersistenceBackend};
pub use session::{SessionController, SessionError, SessionState};
pub use workspace::{ModelAction, Workspace};
