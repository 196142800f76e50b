use tabula_adapters::mysql::MysqlBackend;
use tabula_core::model::{CellValue, ColumnType};
use tabula_core::persistence::{ConnectionConfig, PersistenceBackend};
use tabula_core::session::SessionController;
use tabula_core::workspace::ModelAction;
use tempfile::TempDir;

fn mysql_integration_enabled() -> bool {
    matches!(
        std::env::var("TABULA_RUN_MYSQL_INTEGRATION").ok().as_deref(),
        Some("1")
    )
}

fn integration_config() -> ConnectionConfig {
    let host = std::env::var("TABULA_TEST_DB_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let user = std::env::var("TABULA_TEST_DB_USER").unwrap_or_else(|_| "root".to_string());
    let port = std::env::var("TABULA_TEST_DB_PORT")
        .ok()
        .and_then(|raw| raw.parse::<u16>().ok())
        .unwrap_or(3306);

    let mut config = ConnectionConfig::new(host, user);
    config.port = port;
    config.password = std::env::var("TABULA_TEST_DB_PASSWORD").unwrap_or_default();
    config.database = Some(
        std::env::var("TABULA_TEST_DB_NAME").unwrap_or_else(|_| "tabula_integration".to_string()),
    );
    config
}

#[tokio::test(flavor = "current_thread")]
async fn mysql_backend_round_trips_the_forest() {
    if !mysql_integration_enabled() {
        return;
    }

    let local_dir = TempDir::new().expect("failed to create temp directory");
    let backend = MysqlBackend::new(local_dir.path(), "tabula_integration_state");
    assert!(backend
        .connect(&integration_config())
        .await
        .expect("connect should succeed"));
    assert!(backend.has_active_connection());
    assert!(backend
        .save_databases(&[])
        .await
        .expect("reset should succeed"));

    let mut controller = SessionController::new(backend);
    assert!(controller.resume().await, "saved connection should resume");

    let database_id = controller
        .apply(ModelAction::AddDatabase {
            name: "Integración".to_string(),
        })
        .created_id
        .expect("database id");
    let table_id = controller
        .apply(ModelAction::AddTable {
            database_id,
            name: "Clientes".to_string(),
        })
        .created_id
        .expect("table id");
    let column_id = controller
        .apply(ModelAction::AddColumn {
            table_id: table_id.clone(),
            name: "Edad".to_string(),
            column_type: ColumnType::Number,
        })
        .created_id
        .expect("column id");
    let row_id = controller
        .add_default_row(&table_id)
        .created_id
        .expect("row id");
    controller.edit_cell(&table_id, &row_id, &column_id, "42");
    controller.flush().await;

    let loaded = controller
        .backend()
        .load_databases()
        .await
        .expect("load should succeed");
    assert_eq!(loaded, controller.databases());
    let cell = loaded[0].tables[0].rows[0].get(&column_id).cloned();
    assert_eq!(cell, Some(CellValue::Number(42.0)));

    controller
        .backend()
        .save_databases(&[])
        .await
        .expect("cleanup should succeed");
    controller.disconnect();
    controller
        .backend()
        .disconnect()
        .await
        .expect("pool disconnect should succeed");
}
