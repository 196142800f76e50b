use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use tabula_adapters::{FileBackend, MysqlBackend};
use tabula_core::model::ColumnType;
use tabula_core::persistence::{ConnectionConfig, PersistenceBackend, DEFAULT_MYSQL_PORT};
use tabula_core::session::{Notification, SessionController, SessionError};
use tabula_core::settings::Settings;
use tabula_core::workspace::{ActionOutcome, ModelAction};
use tracing::debug;
use tracing_subscriber::EnvFilter;

type AppResult<T> = Result<T, Box<dyn Error>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    File,
    Mysql,
}

#[derive(Debug, Parser)]
#[command(name = "tabula", version, about = "Edit spreadsheet-style databases")]
struct Cli {
    /// Storage used for the session
    #[arg(long, value_enum, default_value = "file")]
    backend: BackendKind,

    /// Directory for the local key-value store (overrides settings.toml)
    #[arg(long)]
    store: Option<PathBuf>,

    /// Settings file to read instead of the default location
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Show the connection state of the saved session
    Status,
    Connect {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        #[arg(long, default_value_t = DEFAULT_MYSQL_PORT)]
        port: u16,
        #[arg(long, default_value = "root")]
        user: String,
        #[arg(long, default_value = "")]
        password: String,
        #[arg(long)]
        database: Option<String>,
    },
    Disconnect,
    /// Print every database of the saved session as JSON
    Dump,
    AddDatabase {
        name: String,
    },
    AddTable {
        database_id: String,
        name: String,
    },
    AddColumn {
        table_id: String,
        name: String,
        column_type: ColumnType,
    },
    AddRow {
        table_id: String,
    },
    /// Write raw text into a cell, coerced by the column type
    SetCell {
        table_id: String,
        row_id: String,
        column_id: String,
        raw: String,
    },
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_settings(cli: &Cli) -> AppResult<Settings> {
    let settings = match &cli.config {
        Some(path) => Settings::load_from_path(path)?,
        None => Settings::load_default()?,
    };
    Ok(settings)
}

fn print_notifications(notifications: &[Notification]) {
    for notification in notifications {
        eprintln!("{}: {}", notification.title, notification.message);
    }
}

async fn require_session<B: PersistenceBackend + 'static>(
    controller: &mut SessionController<B>,
) -> AppResult<()> {
    if controller.resume().await {
        Ok(())
    } else {
        Err(Box::new(SessionError::NotConnected))
    }
}

fn write_outcome(out: &mut impl Write, outcome: &ActionOutcome) -> AppResult<()> {
    if let Some(id) = &outcome.created_id {
        writeln!(out, "{id}")?;
    } else if !outcome.snapshot_changed {
        writeln!(out, "nothing changed")?;
    }
    Ok(())
}

async fn run_command<B: PersistenceBackend + 'static>(
    controller: &mut SessionController<B>,
    command: Command,
    out: &mut impl Write,
) -> AppResult<()> {
    match command {
        Command::Status => {
            controller.resume().await;
            let status = controller.status();
            let rendered = json!({
                "state": format!("{:?}", status.state),
                "address": status.address,
                "databases": status.database_count,
            });
            writeln!(out, "{}", serde_json::to_string_pretty(&rendered)?)?;
        }
        Command::Connect {
            host,
            port,
            user,
            password,
            database,
        } => {
            let mut config = ConnectionConfig::new(host, user);
            config.port = port;
            config.password = password;
            config.database = database;
            controller.connect(config).await?;
            writeln!(out, "databases: {}", controller.databases().len())?;
        }
        Command::Disconnect => controller.disconnect(),
        Command::Dump => {
            require_session(controller).await?;
            writeln!(
                out,
                "{}",
                serde_json::to_string_pretty(controller.databases())?
            )?;
        }
        Command::AddDatabase { name } => {
            require_session(controller).await?;
            let outcome = controller.apply(ModelAction::AddDatabase { name });
            write_outcome(out, &outcome)?;
        }
        Command::AddTable { database_id, name } => {
            require_session(controller).await?;
            let outcome = controller.apply(ModelAction::AddTable { database_id, name });
            write_outcome(out, &outcome)?;
        }
        Command::AddColumn {
            table_id,
            name,
            column_type,
        } => {
            require_session(controller).await?;
            let outcome = controller.apply(ModelAction::AddColumn {
                table_id,
                name,
                column_type,
            });
            write_outcome(out, &outcome)?;
        }
        Command::AddRow { table_id } => {
            require_session(controller).await?;
            let outcome = controller.add_default_row(&table_id);
            write_outcome(out, &outcome)?;
        }
        Command::SetCell {
            table_id,
            row_id,
            column_id,
            raw,
        } => {
            require_session(controller).await?;
            let outcome = controller.edit_cell(&table_id, &row_id, &column_id, &raw);
            write_outcome(out, &outcome)?;
        }
    }

    controller.flush().await;
    print_notifications(&controller.take_notifications());
    Ok(())
}

async fn run_app(cli: Cli, out: &mut impl Write) -> AppResult<()> {
    let settings = load_settings(&cli)?;
    let store_dir = match cli.store {
        Some(dir) => dir,
        None => settings.resolved_store_dir()?,
    };
    debug!(backend = ?cli.backend, store = %store_dir.display(), "opening session");

    match cli.backend {
        BackendKind::File => {
            let backend = FileBackend::new(store_dir, settings.connect_delay());
            let mut controller = SessionController::new(backend);
            run_command(&mut controller, cli.command, out).await
        }
        BackendKind::Mysql => {
            let backend = MysqlBackend::new(store_dir, settings.mysql_state_table.clone());
            let mut controller = SessionController::new(backend);
            let result = run_command(&mut controller, cli.command, out).await;
            controller.backend().disconnect().await?;
            result
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let mut stdout = std::io::stdout().lock();
    run_app(cli, &mut stdout).await
}
