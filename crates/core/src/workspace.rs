use std::sync::Arc;

use crate::ids::IdGenerator;
use crate::model::{ColumnType, Database, RowValues, Table};
use crate::operations::{self, ColumnUpdate};

#[derive(Debug, Clone, PartialEq)]
pub enum ModelAction {
    AddDatabase {
        name: String,
    },
    DeleteDatabase {
        database_id: String,
    },
    DuplicateDatabase {
        database_id: String,
    },
    SelectDatabase {
        database_id: String,
    },
    AddTable {
        database_id: String,
        name: String,
    },
    DeleteTable {
        database_id: String,
        table_id: String,
    },
    DuplicateTable {
        database_id: String,
        table_id: String,
    },
    SelectTable {
        table_id: String,
    },
    AddColumn {
        table_id: String,
        name: String,
        column_type: ColumnType,
    },
    DeleteColumn {
        table_id: String,
        column_id: String,
    },
    DuplicateColumn {
        table_id: String,
        column_id: String,
    },
    UpdateColumn {
        table_id: String,
        column_id: String,
        update: ColumnUpdate,
    },
    AddRow {
        table_id: String,
        data: RowValues,
    },
    UpdateRow {
        table_id: String,
        row_id: String,
        data: RowValues,
    },
    DeleteRow {
        table_id: String,
        row_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ActionOutcome {
    pub snapshot_changed: bool,
    pub created_id: Option<String>,
}

/// The editor state: the current forest snapshot plus the selection pointers.
#[derive(Debug, Clone, Default)]
pub struct Workspace {
    databases: Arc<Vec<Database>>,
    current_database_id: Option<String>,
    current_table_id: Option<String>,
}

impl Workspace {
    #[must_use]
    pub fn new(databases: Vec<Database>) -> Self {
        Self {
            databases: Arc::new(databases),
            current_database_id: None,
            current_table_id: None,
        }
    }

    #[must_use]
    pub fn databases(&self) -> &[Database] {
        &self.databases
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<Vec<Database>> {
        Arc::clone(&self.databases)
    }

    #[must_use]
    pub fn current_database_id(&self) -> Option<&str> {
        self.current_database_id.as_deref()
    }

    #[must_use]
    pub fn current_table_id(&self) -> Option<&str> {
        self.current_table_id.as_deref()
    }

    #[must_use]
    pub fn current_database(&self) -> Option<&Database> {
        let id = self.current_database_id.as_deref()?;
        self.databases.iter().find(|database| database.id == id)
    }

    #[must_use]
    pub fn current_table(&self) -> Option<&Table> {
        let id = self.current_table_id.as_deref()?;
        self.current_database()?.table(id)
    }

    #[must_use]
    pub fn find_table(&self, table_id: &str) -> Option<&Table> {
        self.databases
            .iter()
            .find_map(|database| database.table(table_id))
    }

    /// Swaps in a forest read from storage, dropping selections that no longer resolve.
    pub fn replace(&mut self, databases: Vec<Database>) {
        self.databases = Arc::new(databases);
        if self.current_database().is_none() {
            self.current_database_id = None;
        }
        if self.current_table().is_none() {
            self.current_table_id = None;
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn apply(&mut self, action: ModelAction, ids: &mut dyn IdGenerator) -> ActionOutcome {
        let mut created_id = None;
        let next = match action {
            ModelAction::AddDatabase { name } => {
                let (next, id) = operations::add_database(&self.databases, &name, ids);
                self.current_database_id = Some(id.clone());
                self.current_table_id = None;
                created_id = Some(id);
                Some(next)
            }
            ModelAction::DeleteDatabase { database_id } => {
                if self.current_database_id.as_deref() == Some(database_id.as_str()) {
                    self.current_database_id = None;
                    self.current_table_id = None;
                }
                Some(operations::delete_database(&self.databases, &database_id))
            }
            ModelAction::DuplicateDatabase { database_id } => Some(
                operations::duplicate_database(&self.databases, &database_id, ids),
            ),
            ModelAction::SelectDatabase { database_id } => {
                let exists = self
                    .databases
                    .iter()
                    .any(|database| database.id == database_id);
                self.current_database_id = exists.then_some(database_id);
                self.current_table_id = None;
                None
            }
            ModelAction::AddTable { database_id, name } => {
                let (next, id) =
                    operations::add_table(&self.databases, &database_id, &name, ids);
                if let Some(id) = &id {
                    self.current_database_id = Some(database_id);
                    self.current_table_id = Some(id.clone());
                }
                created_id = id;
                Some(next)
            }
            ModelAction::DeleteTable {
                database_id,
                table_id,
            } => {
                if self.current_table_id.as_deref() == Some(table_id.as_str()) {
                    self.current_table_id = None;
                }
                Some(operations::delete_table(
                    &self.databases,
                    &database_id,
                    &table_id,
                ))
            }
            ModelAction::DuplicateTable {
                database_id,
                table_id,
            } => Some(operations::duplicate_table(
                &self.databases,
                &database_id,
                &table_id,
                ids,
            )),
            ModelAction::SelectTable { table_id } => {
                if self
                    .current_database()
                    .is_some_and(|database| database.table(&table_id).is_some())
                {
                    self.current_table_id = Some(table_id);
                }
                None
            }
            ModelAction::AddColumn {
                table_id,
                name,
                column_type,
            } => {
                let (next, id) =
                    operations::add_column(&self.databases, &table_id, &name, column_type, ids);
                created_id = id;
                Some(next)
            }
            ModelAction::DeleteColumn {
                table_id,
                column_id,
            } => Some(operations::delete_column(
                &self.databases,
                &table_id,
                &column_id,
            )),
            ModelAction::DuplicateColumn {
                table_id,
                column_id,
            } => Some(operations::duplicate_column(
                &self.databases,
                &table_id,
                &column_id,
                ids,
            )),
            ModelAction::UpdateColumn {
                table_id,
                column_id,
                update,
            } => Some(operations::update_column(
                &self.databases,
                &table_id,
                &column_id,
                &update,
            )),
            ModelAction::AddRow { table_id, data } => {
                let (next, id) = operations::add_row(&self.databases, &table_id, &data, ids);
                created_id = id;
                Some(next)
            }
            ModelAction::UpdateRow {
                table_id,
                row_id,
                data,
            } => Some(operations::update_row(
                &self.databases,
                &table_id,
                &row_id,
                &data,
            )),
            ModelAction::DeleteRow { table_id, row_id } => Some(operations::delete_row(
                &self.databases,
                &table_id,
                &row_id,
            )),
        };

        let snapshot_changed = match next {
            Some(next) if next != *self.databases => {
                self.databases = Arc::new(next);
                true
            }
            _ => false,
        };

        ActionOutcome {
            snapshot_changed,
            created_id,
        }
    }
}
