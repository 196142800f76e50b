use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coercion::{coerce_edit, default_row};
use crate::ids::{IdGenerator, RandomIds};
use crate::model::{Database, RowValues};
use crate::persistence::{BackendError, ConnectionConfig, PersistenceBackend};
use crate::workspace::{ActionOutcome, ModelAction, Workspace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Success,
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
}

impl Notification {
    fn new(level: NotificationLevel, title: &str, message: impl Into<String>) -> Self {
        Self {
            level,
            title: title.to_string(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct NotificationQueue {
    pending: Arc<Mutex<Vec<Notification>>>,
}

impl NotificationQueue {
    fn push(&self, notification: Notification) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
    }

    fn drain(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Counts loads and saves in flight. Clones share the counter, so a view can hold one and
/// disable editing while the controller is busy.
#[derive(Debug, Clone, Default)]
pub struct LoadingIndicator {
    in_flight: Arc<AtomicUsize>,
}

impl LoadingIndicator {
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.in_flight() > 0
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn begin(&self) -> LoadingGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        LoadingGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

#[derive(Debug)]
struct LoadingGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for LoadingGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds the session in `Connecting` for one backend attempt. Dropping it puts the state
/// back to `Disconnected`, so an attempt abandoned mid-await does not wedge the controller.
struct ConnectAttempt<'a> {
    state: &'a mut SessionState,
}

impl<'a> ConnectAttempt<'a> {
    fn begin(state: &'a mut SessionState) -> Self {
        *state = SessionState::Connecting;
        Self { state }
    }
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        *self.state = SessionState::Disconnected;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveReport {
    Saved { revision: u64 },
    Superseded { revision: u64 },
    Rejected { revision: u64 },
    Failed { revision: u64, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub address: Option<String>,
    pub is_loading: bool,
    pub database_count: usize,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("already connected to `{address}`")]
    AlreadyConnected { address: String },
    #[error("a connection attempt is already in progress")]
    ConnectInFlight,
    #[error("session is not connected")]
    NotConnected,
    #[error("backend refused the connection to `{address}`")]
    Rejected { address: String },
    #[error("persistence backend failed: {0}")]
    Backend(#[source] BackendError),
}

pub struct SessionController<B: PersistenceBackend + 'static> {
    backend: Arc<B>,
    ids: Box<dyn IdGenerator>,
    workspace: Workspace,
    state: SessionState,
    connection: Option<ConnectionConfig>,
    loading: LoadingIndicator,
    notifications: NotificationQueue,
    revision: u64,
    written_revision: Arc<tokio::sync::Mutex<u64>>,
    pending_saves: Vec<JoinHandle<SaveReport>>,
    deferred_save: bool,
}

impl<B: PersistenceBackend + 'static> SessionController<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self::with_id_generator(Arc::new(backend), Box::new(RandomIds::new()))
    }

    #[must_use]
    pub fn with_id_generator(backend: Arc<B>, ids: Box<dyn IdGenerator>) -> Self {
        Self {
            backend,
            ids,
            workspace: Workspace::default(),
            state: SessionState::Disconnected,
            connection: None,
            loading: LoadingIndicator::default(),
            notifications: NotificationQueue::default(),
            revision: 0,
            written_revision: Arc::new(tokio::sync::Mutex::new(0)),
            pending_saves: Vec::new(),
            deferred_save: false,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[must_use]
    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    #[must_use]
    pub fn databases(&self) -> &[Database] {
        self.workspace.databases()
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loading.is_loading()
    }

    #[must_use]
    pub fn loading_indicator(&self) -> LoadingIndicator {
        self.loading.clone()
    }

    #[must_use]
    pub fn connection(&self) -> Option<&ConnectionConfig> {
        self.connection.as_ref()
    }

    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            state: self.state,
            address: self.connection.as_ref().map(ConnectionConfig::address),
            is_loading: self.is_loading(),
            database_count: self.workspace.databases().len(),
        }
    }

    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain()
    }

    fn notify(&self, level: NotificationLevel, title: &str, message: impl Into<String>) {
        self.notifications
            .push(Notification::new(level, title, message));
    }

    /// Picks the saved connection back up without asking for credentials, then loads.
    /// Returns whether the session ended up connected.
    pub async fn resume(&mut self) -> bool {
        match self.state {
            SessionState::Connected => return true,
            SessionState::Connecting => return false,
            SessionState::Disconnected => {}
        }

        if !self.backend.has_active_connection() {
            return false;
        }
        let Some(config) = self.backend.saved_connection() else {
            return false;
        };

        info!(address = %config.address(), "resuming saved session");
        let attempt = ConnectAttempt::begin(&mut self.state);
        let connected = self.backend.connect(&config).await;
        drop(attempt);

        match connected {
            Ok(true) => {
                self.state = SessionState::Connected;
                self.connection = Some(config);
                self.load_snapshot().await;
                true
            }
            Ok(false) => {
                warn!(address = %config.address(), "saved session was refused");
                self.notify(
                    NotificationLevel::Error,
                    "Connection error",
                    format!("Could not resume the session on {}", config.address()),
                );
                false
            }
            Err(error) => {
                warn!(address = %config.address(), %error, "failed to resume saved session");
                self.notify(NotificationLevel::Error, "Connection error", error.to_string());
                false
            }
        }
    }

    pub async fn connect(&mut self, config: ConnectionConfig) -> Result<(), SessionError> {
        match self.state {
            SessionState::Connecting => return Err(SessionError::ConnectInFlight),
            SessionState::Connected => {
                return Err(SessionError::AlreadyConnected {
                    address: self
                        .connection
                        .as_ref()
                        .map(ConnectionConfig::address)
                        .unwrap_or_default(),
                })
            }
            SessionState::Disconnected => {}
        }

        let address = config.address();
        info!(%address, user = %config.username, "connecting");
        let attempt = ConnectAttempt::begin(&mut self.state);
        let connected = self.backend.connect(&config).await;
        drop(attempt);

        match connected {
            Ok(true) => {}
            Ok(false) => {
                warn!(%address, "connection refused by backend");
                self.notify(
                    NotificationLevel::Error,
                    "Connection error",
                    "Could not connect to the database",
                );
                return Err(SessionError::Rejected { address });
            }
            Err(error) => {
                warn!(%address, %error, "connection failed");
                self.notify(
                    NotificationLevel::Error,
                    "Connection error",
                    "Could not connect to the database",
                );
                return Err(SessionError::Backend(error));
            }
        }

        self.state = SessionState::Connected;
        self.connection = Some(config);
        self.load_snapshot().await;
        self.notify(
            NotificationLevel::Success,
            "Connected",
            format!("Connected to {address}"),
        );
        Ok(())
    }

    /// Tears the session down: saved credentials, the forest and both selections go.
    pub fn disconnect(&mut self) {
        if let Err(error) = self.backend.forget_connection() {
            warn!(%error, "failed to forget saved connection");
            self.notify(NotificationLevel::Error, "Disconnect error", error.to_string());
        }
        if let Some(config) = self.connection.take() {
            info!(address = %config.address(), "disconnected");
        }

        self.state = SessionState::Disconnected;
        self.workspace.clear();
        self.deferred_save = false;
        self.notify(
            NotificationLevel::Info,
            "Disconnected",
            "The database connection was closed",
        );
    }

    pub async fn reload(&mut self) -> Result<usize, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }

        let _guard = self.loading.begin();
        let databases = self
            .backend
            .load_databases()
            .await
            .map_err(SessionError::Backend)?;
        let count = databases.len();
        self.workspace.replace(databases);
        Ok(count)
    }

    async fn load_snapshot(&mut self) {
        let guard = self.loading.begin();
        let loaded = self.backend.load_databases().await;
        drop(guard);

        match loaded {
            Ok(databases) if !databases.is_empty() => {
                debug!(count = databases.len(), "loaded databases");
                self.workspace.replace(databases);
            }
            Ok(_) => {
                debug!("store holds no databases");
                if !self.workspace.databases().is_empty() {
                    self.schedule_save();
                }
            }
            Err(error) => {
                warn!(%error, "failed to load databases");
                self.notify(NotificationLevel::Error, "Load error", error.to_string());
            }
        }
    }

    pub fn apply(&mut self, action: ModelAction) -> ActionOutcome {
        let outcome = self.workspace.apply(action, self.ids.as_mut());
        if outcome.snapshot_changed && self.state == SessionState::Connected {
            self.schedule_save();
        }
        outcome
    }

    /// Writes raw cell input through the column's coercion rule. Unknown table, row or
    /// column ids leave everything as it was.
    pub fn edit_cell(
        &mut self,
        table_id: &str,
        row_id: &str,
        column_id: &str,
        raw: &str,
    ) -> ActionOutcome {
        let Some(table) = self.workspace.find_table(table_id) else {
            return ActionOutcome::default();
        };
        let (Some(column), Some(row)) = (table.column(column_id), table.row(row_id)) else {
            return ActionOutcome::default();
        };

        let value = coerce_edit(column.column_type, raw, row.get(column_id));
        let data: RowValues = [(column_id.to_string(), value)].into_iter().collect();
        self.apply(ModelAction::UpdateRow {
            table_id: table_id.to_string(),
            row_id: row_id.to_string(),
            data,
        })
    }

    pub fn add_default_row(&mut self, table_id: &str) -> ActionOutcome {
        let Some(table) = self.workspace.find_table(table_id) else {
            return ActionOutcome::default();
        };
        let data = default_row(&table.columns, Utc::now());
        self.apply(ModelAction::AddRow {
            table_id: table_id.to_string(),
            data,
        })
    }

    fn schedule_save(&mut self) {
        self.revision += 1;
        let revision = self.revision;
        self.pending_saves.retain(|handle| !handle.is_finished());

        let Ok(runtime) = Handle::try_current() else {
            debug!(revision, "no async runtime, deferring save to flush");
            self.deferred_save = true;
            return;
        };

        let task = save_task(
            Arc::clone(&self.backend),
            self.workspace.snapshot(),
            revision,
            Arc::clone(&self.written_revision),
            self.loading.begin(),
            self.notifications.clone(),
        );
        self.pending_saves.push(runtime.spawn(task));
    }

    /// Waits for every save issued so far; failures have already been queued as
    /// notifications by the time this returns.
    pub async fn flush(&mut self) -> Vec<SaveReport> {
        let mut reports = Vec::with_capacity(self.pending_saves.len());
        for handle in std::mem::take(&mut self.pending_saves) {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(error) => warn!(%error, "save task did not complete"),
            }
        }

        if self.deferred_save && self.state == SessionState::Connected {
            self.deferred_save = false;
            let report = save_task(
                Arc::clone(&self.backend),
                self.workspace.snapshot(),
                self.revision,
                Arc::clone(&self.written_revision),
                self.loading.begin(),
                self.notifications.clone(),
            )
            .await;
            reports.push(report);
        }
        reports
    }
}

async fn save_task<B: PersistenceBackend + 'static>(
    backend: Arc<B>,
    snapshot: Arc<Vec<Database>>,
    revision: u64,
    written_revision: Arc<tokio::sync::Mutex<u64>>,
    _guard: LoadingGuard,
    notifications: NotificationQueue,
) -> SaveReport {
    let mut written = written_revision.lock().await;
    if *written >= revision {
        debug!(revision, written = *written, "skipping superseded save");
        return SaveReport::Superseded { revision };
    }

    match backend.save_databases(&snapshot).await {
        Ok(true) => {
            *written = revision;
            debug!(revision, databases = snapshot.len(), "saved databases");
            SaveReport::Saved { revision }
        }
        Ok(false) => {
            warn!(revision, "backend declined to save databases");
            notifications.push(Notification::new(
                NotificationLevel::Error,
                "Save error",
                "The databases could not be saved",
            ));
            SaveReport::Rejected { revision }
        }
        Err(error) => {
            warn!(revision, %error, "failed to save databases");
            notifications.push(Notification::new(
                NotificationLevel::Error,
                "Save error",
                error.to_string(),
            ));
            SaveReport::Failed {
                revision,
                error: error.to_string(),
            }
        }
    }
}
