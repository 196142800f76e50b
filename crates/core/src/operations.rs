use std::collections::{HashMap, HashSet};

use crate::ids::IdGenerator;
use crate::model::{CellValue, Column, ColumnType, Database, Row, RowValues, Table};

pub const COPY_SUFFIX: &str = " (copia)";

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ColumnUpdate {
    pub name: Option<String>,
    pub column_type: Option<ColumnType>,
    pub options: Option<serde_json::Value>,
}

impl ColumnUpdate {
    #[must_use]
    pub fn rename(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn retype(column_type: ColumnType) -> Self {
        Self {
            column_type: Some(column_type),
            ..Self::default()
        }
    }

    fn apply_to(&self, column: &mut Column) {
        if let Some(name) = &self.name {
            column.name.clone_from(name);
        }
        if let Some(column_type) = self.column_type {
            column.column_type = column_type;
        }
        // A null payload clears the options; stored columns never carry `"options": null`.
        if let Some(options) = &self.options {
            column.options = (!options.is_null()).then(|| options.clone());
        }
    }
}

fn copy_name(name: &str) -> String {
    format!("{name}{COPY_SUFFIX}")
}

fn with_table(
    databases: &[Database],
    table_id: &str,
    mut edit: impl FnMut(&mut Table, &mut dyn IdGenerator),
    ids: &mut dyn IdGenerator,
) -> Vec<Database> {
    let mut next = databases.to_vec();
    for database in &mut next {
        for table in &mut database.tables {
            if table.id == table_id {
                edit(table, &mut *ids);
            }
        }
    }
    next
}

fn with_table_no_ids(
    databases: &[Database],
    table_id: &str,
    mut edit: impl FnMut(&mut Table),
) -> Vec<Database> {
    let mut next = databases.to_vec();
    for database in &mut next {
        for table in &mut database.tables {
            if table.id == table_id {
                edit(table);
            }
        }
    }
    next
}

/// Deep copy of a table with fresh ids for the table, its columns and its rows. Row keys
/// are rewritten through the same column remap; keys naming no column are not carried over.
fn copy_table(table: &Table, ids: &mut dyn IdGenerator) -> Table {
    let remap: HashMap<&str, String> = table
        .columns
        .iter()
        .map(|column| (column.id.as_str(), ids.next_id()))
        .collect();

    let columns = table
        .columns
        .iter()
        .map(|column| Column {
            id: remap[column.id.as_str()].clone(),
            ..column.clone()
        })
        .collect();

    let rows = table
        .rows
        .iter()
        .map(|row| Row {
            id: ids.next_id(),
            values: row
                .values
                .iter()
                .filter_map(|(key, value)| {
                    remap
                        .get(key.as_str())
                        .map(|new_key| (new_key.clone(), value.clone()))
                })
                .collect(),
        })
        .collect();

    Table {
        id: ids.next_id(),
        name: table.name.clone(),
        columns,
        rows,
    }
}

pub fn add_database(
    databases: &[Database],
    name: &str,
    ids: &mut dyn IdGenerator,
) -> (Vec<Database>, String) {
    let database = Database {
        id: ids.next_id(),
        name: name.to_string(),
        tables: Vec::new(),
    };
    let id = database.id.clone();
    let mut next = databases.to_vec();
    next.push(database);
    (next, id)
}

#[must_use]
pub fn delete_database(databases: &[Database], database_id: &str) -> Vec<Database> {
    databases
        .iter()
        .filter(|database| database.id != database_id)
        .cloned()
        .collect()
}

pub fn duplicate_database(
    databases: &[Database],
    database_id: &str,
    ids: &mut dyn IdGenerator,
) -> Vec<Database> {
    let mut next = databases.to_vec();
    let Some(source) = databases
        .iter()
        .find(|database| database.id == database_id)
    else {
        return next;
    };

    let copy = Database {
        id: ids.next_id(),
        name: copy_name(&source.name),
        tables: source
            .tables
            .iter()
            .map(|table| copy_table(table, ids))
            .collect(),
    };
    next.push(copy);
    next
}

/// Returns the new table id, or `None` when the database does not exist.
pub fn add_table(
    databases: &[Database],
    database_id: &str,
    name: &str,
    ids: &mut dyn IdGenerator,
) -> (Vec<Database>, Option<String>) {
    let mut next = databases.to_vec();
    let Some(database) = next.iter_mut().find(|database| database.id == database_id) else {
        return (next, None);
    };

    let table = Table {
        id: ids.next_id(),
        name: name.to_string(),
        columns: Vec::new(),
        rows: Vec::new(),
    };
    let id = table.id.clone();
    database.tables.push(table);
    (next, Some(id))
}

#[must_use]
pub fn delete_table(databases: &[Database], database_id: &str, table_id: &str) -> Vec<Database> {
    let mut next = databases.to_vec();
    if let Some(database) = next.iter_mut().find(|database| database.id == database_id) {
        database.tables.retain(|table| table.id != table_id);
    }
    next
}

pub fn duplicate_table(
    databases: &[Database],
    database_id: &str,
    table_id: &str,
    ids: &mut dyn IdGenerator,
) -> Vec<Database> {
    let mut next = databases.to_vec();
    let Some(database) = next.iter_mut().find(|database| database.id == database_id) else {
        return next;
    };
    let Some(source) = database.table(table_id) else {
        return next;
    };

    let mut copy = copy_table(source, ids);
    copy.name = copy_name(&source.name);
    database.tables.push(copy);
    next
}

/// Returns the new column id, or `None` when the table does not exist.
pub fn add_column(
    databases: &[Database],
    table_id: &str,
    name: &str,
    column_type: ColumnType,
    ids: &mut dyn IdGenerator,
) -> (Vec<Database>, Option<String>) {
    let mut created = None;
    let next = with_table(
        databases,
        table_id,
        |table, ids| {
            let column = Column {
                id: ids.next_id(),
                name: name.to_string(),
                column_type,
                options: None,
            };
            for row in &mut table.rows {
                row.set(column.id.clone(), CellValue::Null);
            }
            created = Some(column.id.clone());
            table.columns.push(column);
        },
        ids,
    );
    (next, created)
}

#[must_use]
pub fn delete_column(databases: &[Database], table_id: &str, column_id: &str) -> Vec<Database> {
    with_table_no_ids(databases, table_id, |table| {
        table.columns.retain(|column| column.id != column_id);
        for row in &mut table.rows {
            row.remove(column_id);
        }
    })
}

pub fn duplicate_column(
    databases: &[Database],
    table_id: &str,
    column_id: &str,
    ids: &mut dyn IdGenerator,
) -> Vec<Database> {
    with_table(
        databases,
        table_id,
        |table, ids| {
            let Some(source) = table.column(column_id) else {
                return;
            };
            let copy = Column {
                id: ids.next_id(),
                name: copy_name(&source.name),
                ..source.clone()
            };
            for row in &mut table.rows {
                let value = row.get(column_id).cloned().unwrap_or_default();
                row.set(copy.id.clone(), value);
            }
            table.columns.push(copy);
        },
        ids,
    )
}

#[must_use]
pub fn update_column(
    databases: &[Database],
    table_id: &str,
    column_id: &str,
    update: &ColumnUpdate,
) -> Vec<Database> {
    with_table_no_ids(databases, table_id, |table| {
        for column in &mut table.columns {
            if column.id == column_id {
                update.apply_to(column);
            }
        }
    })
}

/// Returns the new row id, or `None` when the table does not exist.
pub fn add_row(
    databases: &[Database],
    table_id: &str,
    data: &RowValues,
    ids: &mut dyn IdGenerator,
) -> (Vec<Database>, Option<String>) {
    let mut created = None;
    let next = with_table(
        databases,
        table_id,
        |table, ids| {
            let mut row = Row {
                id: ids.next_id(),
                values: RowValues::new(),
            };
            row.merge(data);
            created = Some(row.id.clone());
            table.rows.push(row);
        },
        ids,
    );
    (next, created)
}

#[must_use]
pub fn update_row(
    databases: &[Database],
    table_id: &str,
    row_id: &str,
    data: &RowValues,
) -> Vec<Database> {
    with_table_no_ids(databases, table_id, |table| {
        if let Some(row) = table.row_mut(row_id) {
            row.merge(data);
        }
    })
}

#[must_use]
pub fn delete_row(databases: &[Database], table_id: &str, row_id: &str) -> Vec<Database> {
    with_table_no_ids(databases, table_id, |table| {
        table.rows.retain(|row| row.id != row_id);
    })
}

/// Every id (database, table, column, row) in a subtree; used to check duplication freshness.
#[must_use]
pub fn collect_ids(database: &Database) -> HashSet<String> {
    let mut ids = HashSet::new();
    ids.insert(database.id.clone());
    for table in &database.tables {
        ids.insert(table.id.clone());
        ids.extend(table.columns.iter().map(|column| column.id.clone()));
        ids.extend(table.rows.iter().map(|row| row.id.clone()));
    }
    ids
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        add_column, add_database, add_row, add_table, collect_ids, delete_column,
        delete_database, delete_row, delete_table, duplicate_column, duplicate_database,
        duplicate_table, update_column, update_row, ColumnUpdate,
    };
    use crate::ids::{RandomIds, SequentialIds};
    use crate::model::{CellValue, Column, ColumnType, Database, Row, RowValues, Table};

    fn values(pairs: &[(&str, CellValue)]) -> RowValues {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), value.clone()))
            .collect()
    }

    fn single_table_forest() -> Vec<Database> {
        vec![Database {
            id: "d1".to_string(),
            name: "D1".to_string(),
            tables: vec![Table {
                id: "t1".to_string(),
                name: "T1".to_string(),
                columns: vec![Column {
                    id: "c1".to_string(),
                    name: "C1".to_string(),
                    column_type: ColumnType::Number,
                    options: None,
                }],
                rows: vec![Row {
                    id: "r1".to_string(),
                    values: values(&[("c1", CellValue::Number(5.0))]),
                }],
            }],
        }]
    }

    fn assert_rows_match_columns(table: &Table) {
        for row in &table.rows {
            for key in row.values.keys() {
                assert!(
                    table.column(key).is_some(),
                    "row {} references missing column {key}",
                    row.id
                );
            }
        }
    }

    #[test]
    fn duplicate_table_remaps_row_keys_to_new_columns() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");

        let next = duplicate_table(&forest, "d1", "t1", &mut ids);
        assert_eq!(forest[0].tables.len(), 1, "input must stay untouched");

        let copy = &next[0].tables[1];
        assert_eq!(copy.name, "T1 (copia)");
        assert_ne!(copy.id, "t1");
        let new_column = &copy.columns[0].id;
        assert_ne!(new_column, "c1");
        let row = &copy.rows[0];
        assert_ne!(row.id, "r1");
        assert_eq!(row.get(new_column), Some(&CellValue::Number(5.0)));
        assert!(row.get("c1").is_none());
        assert_rows_match_columns(copy);
    }

    #[test]
    fn duplicate_database_copies_every_level_with_fresh_ids() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");

        let next = duplicate_database(&forest, "d1", &mut ids);
        assert_eq!(next.len(), 2);
        let copy = &next[1];
        assert_eq!(copy.name, "D1 (copia)");
        assert_eq!(copy.tables[0].name, "T1");
        assert!(collect_ids(copy).is_disjoint(&collect_ids(&next[0])));
        assert_rows_match_columns(&copy.tables[0]);
        assert_eq!(
            copy.tables[0].rows[0].values.values().next(),
            Some(&CellValue::Number(5.0))
        );
    }

    #[test]
    fn duplicate_of_missing_entities_is_a_no_op() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");
        assert_eq!(duplicate_database(&forest, "nope", &mut ids), forest);
        assert_eq!(duplicate_table(&forest, "d1", "nope", &mut ids), forest);
        assert_eq!(duplicate_table(&forest, "nope", "t1", &mut ids), forest);
        assert_eq!(duplicate_column(&forest, "t1", "nope", &mut ids), forest);
    }

    #[test]
    fn add_column_backfills_null_and_delete_strips_key() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");

        let (next, column_id) = add_column(&forest, "t1", "Notas", ColumnType::Text, &mut ids);
        let column_id = column_id.expect("table exists");
        let table = &next[0].tables[0];
        assert_eq!(table.columns.len(), 2);
        assert_eq!(table.rows[0].get(&column_id), Some(&CellValue::Null));

        let next = delete_column(&next, "t1", &column_id);
        let table = &next[0].tables[0];
        assert_eq!(table.columns.len(), 1);
        assert!(table.rows[0].get(&column_id).is_none());
        assert_eq!(table.rows[0].get("c1"), Some(&CellValue::Number(5.0)));
    }

    #[test]
    fn add_column_to_missing_table_creates_nothing() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");
        let (next, column_id) = add_column(&forest, "nope", "X", ColumnType::Text, &mut ids);
        assert!(column_id.is_none());
        assert_eq!(next, forest);
    }

    #[test]
    fn duplicate_column_copies_values_under_new_id() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");

        let next = duplicate_column(&forest, "t1", "c1", &mut ids);
        let table = &next[0].tables[0];
        assert_eq!(table.columns.len(), 2);
        let copy = &table.columns[1];
        assert_eq!(copy.name, "C1 (copia)");
        assert_eq!(copy.column_type, ColumnType::Number);
        assert_eq!(table.rows[0].get(&copy.id), Some(&CellValue::Number(5.0)));
        assert_eq!(table.rows[0].get("c1"), Some(&CellValue::Number(5.0)));

        let next = update_row(
            &next,
            "t1",
            "r1",
            &values(&[(copy.id.as_str(), CellValue::Number(9.0))]),
        );
        let row = &next[0].tables[0].rows[0];
        assert_eq!(row.get("c1"), Some(&CellValue::Number(5.0)));
    }

    #[test]
    fn update_column_merges_fields_without_touching_rows() {
        let forest = single_table_forest();
        let next = update_column(&forest, "t1", "c1", &ColumnUpdate::retype(ColumnType::Text));
        let table = &next[0].tables[0];
        assert_eq!(table.columns[0].column_type, ColumnType::Text);
        assert_eq!(table.columns[0].name, "C1");
        assert_eq!(table.rows[0].get("c1"), Some(&CellValue::Number(5.0)));

        let next = update_column(&next, "t1", "c1", &ColumnUpdate::rename("Edad"));
        assert_eq!(next[0].tables[0].columns[0].name, "Edad");
        assert_eq!(next[0].tables[0].columns[0].column_type, ColumnType::Text);
    }

    #[test]
    fn null_options_clear_the_column_options() {
        let forest = single_table_forest();
        let with_options = ColumnUpdate {
            options: Some(serde_json::json!({"choices": ["a", "b"]})),
            ..ColumnUpdate::default()
        };
        let next = update_column(&forest, "t1", "c1", &with_options);
        assert!(next[0].tables[0].columns[0].options.is_some());

        let cleared = ColumnUpdate {
            options: Some(serde_json::Value::Null),
            ..ColumnUpdate::default()
        };
        let next = update_column(&next, "t1", "c1", &cleared);
        assert_eq!(next[0].tables[0].columns[0].options, None);

        let rendered = serde_json::to_string(&next).expect("forest should serialize");
        assert!(!rendered.contains("options"));
        let reloaded: Vec<Database> =
            serde_json::from_str(&rendered).expect("forest should parse");
        assert_eq!(reloaded, next);
    }

    #[test]
    fn row_operations_append_merge_and_remove() {
        let forest = single_table_forest();
        let mut ids = SequentialIds::new("n");

        let (next, row_id) = add_row(
            &forest,
            "t1",
            &values(&[("c1", CellValue::Number(1.0)), ("id", CellValue::from("x"))]),
            &mut ids,
        );
        let row_id = row_id.expect("table exists");
        let table = &next[0].tables[0];
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[1].id, row_id);
        assert!(table.rows[1].get("id").is_none());

        let next = update_row(&next, "t1", &row_id, &values(&[("c1", CellValue::Number(2.0))]));
        assert_eq!(
            next[0].tables[0].rows[1].get("c1"),
            Some(&CellValue::Number(2.0))
        );

        let next = delete_row(&next, "t1", &row_id);
        assert_eq!(next[0].tables[0].rows.len(), 1);
        assert_eq!(delete_row(&next, "t1", "ghost"), next);
    }

    #[test]
    fn database_and_table_lifecycle() {
        let mut ids = SequentialIds::new("n");
        let (forest, database_id) = add_database(&[], "Ventas", &mut ids);
        let (forest, table_id) = add_table(&forest, &database_id, "Pedidos", &mut ids);
        let table_id = table_id.expect("database exists");
        assert!(forest[0].tables[0].columns.is_empty());
        assert!(forest[0].tables[0].rows.is_empty());

        let (same, missing) = add_table(&forest, "ghost", "X", &mut ids);
        assert!(missing.is_none());
        assert_eq!(same, forest);

        let forest = delete_table(&forest, &database_id, &table_id);
        assert!(forest[0].tables.is_empty());
        let forest = delete_database(&forest, &database_id);
        assert!(forest.is_empty());
    }

    #[test]
    fn age_column_scenario() {
        let mut ids = SequentialIds::new("n");
        let (forest, database_id) = add_database(&[], "D1", &mut ids);
        let (forest, table_id) = add_table(&forest, &database_id, "T1", &mut ids);
        let table_id = table_id.expect("database exists");
        let (forest, age) = add_column(&forest, &table_id, "Age", ColumnType::Number, &mut ids);
        let age = age.expect("table exists");

        let defaults = crate::coercion::default_row(&forest[0].tables[0].columns, chrono::Utc::now());
        let (forest, _) = add_row(&forest, &table_id, &defaults, &mut ids);
        assert_eq!(
            forest[0].tables[0].rows[0].get(&age),
            Some(&CellValue::Number(0.0))
        );

        let forest = duplicate_column(&forest, &table_id, &age, &mut ids);
        let table = &forest[0].tables[0];
        assert_eq!(table.columns.len(), 2);
        let row = &table.rows[0];
        assert_eq!(row.values.len(), 2);
        let mut cells = row.values.values();
        assert_eq!(cells.next(), cells.next());
    }

    #[derive(Debug, Clone)]
    enum ColumnOp {
        Add(ColumnType),
        Delete(usize),
        Duplicate(usize),
        AddRow,
    }

    fn column_op_strategy() -> impl Strategy<Value = ColumnOp> {
        prop_oneof![
            prop::sample::select(ColumnType::ALL.to_vec()).prop_map(ColumnOp::Add),
            (0usize..8).prop_map(ColumnOp::Delete),
            (0usize..8).prop_map(ColumnOp::Duplicate),
            Just(ColumnOp::AddRow),
        ]
    }

    proptest! {
        #[test]
        fn row_keys_stay_within_columns(ops in prop::collection::vec(column_op_strategy(), 1..40)) {
            let mut ids = RandomIds::new();
            let (forest, database_id) = add_database(&[], "D", &mut ids);
            let (mut forest, table_id) = add_table(&forest, &database_id, "T", &mut ids);
            let table_id = table_id.expect("database exists");

            for op in ops {
                let columns: Vec<String> = forest[0].tables[0]
                    .columns
                    .iter()
                    .map(|column| column.id.clone())
                    .collect();
                forest = match op {
                    ColumnOp::Add(column_type) => {
                        add_column(&forest, &table_id, "c", column_type, &mut ids).0
                    }
                    ColumnOp::Delete(index) if !columns.is_empty() => {
                        delete_column(&forest, &table_id, &columns[index % columns.len()])
                    }
                    ColumnOp::Duplicate(index) if !columns.is_empty() => {
                        duplicate_column(&forest, &table_id, &columns[index % columns.len()], &mut ids)
                    }
                    ColumnOp::AddRow => {
                        let data = columns
                            .iter()
                            .map(|id| (id.clone(), CellValue::Number(1.0)))
                            .collect();
                        add_row(&forest, &table_id, &data, &mut ids).0
                    }
                    _ => forest,
                };

                let table = &forest[0].tables[0];
                for row in &table.rows {
                    let keys: Vec<&String> = row.values.keys().collect();
                    prop_assert_eq!(keys.len(), table.columns.len());
                    for key in keys {
                        prop_assert!(table.column(key).is_some());
                    }
                }
            }
        }

        #[test]
        fn duplicated_databases_share_no_ids(
            column_count in 0usize..5,
            row_count in 0usize..6,
            table_count in 1usize..4,
        ) {
            let mut ids = RandomIds::new();
            let (mut forest, database_id) = add_database(&[], "D", &mut ids);
            for table_index in 0..table_count {
                let (next, table_id) =
                    add_table(&forest, &database_id, &format!("T{table_index}"), &mut ids);
                forest = next;
                let table_id = table_id.expect("database exists");
                for _ in 0..column_count {
                    forest = add_column(&forest, &table_id, "c", ColumnType::Number, &mut ids).0;
                }
                let columns: Vec<String> = forest[0].tables[table_index]
                    .columns
                    .iter()
                    .map(|column| column.id.clone())
                    .collect();
                for row_index in 0..row_count {
                    let data = columns
                        .iter()
                        .map(|id| (id.clone(), CellValue::Number(row_index as f64)))
                        .collect();
                    forest = add_row(&forest, &table_id, &data, &mut ids).0;
                }
            }

            let next = duplicate_database(&forest, &database_id, &mut ids);
            prop_assert!(collect_ids(&next[0]).is_disjoint(&collect_ids(&next[1])));
            for (source, copy) in next[0].tables.iter().zip(&next[1].tables) {
                prop_assert_eq!(source.rows.len(), copy.rows.len());
                for row in &copy.rows {
                    for key in row.values.keys() {
                        prop_assert!(copy.column(key).is_some());
                    }
                }
                for (source_row, copy_row) in source.rows.iter().zip(&copy.rows) {
                    let source_cells: Vec<&CellValue> = source_row.values.values().collect();
                    let mut copy_cells: Vec<&CellValue> = Vec::new();
                    for (column, copy_column) in source.columns.iter().zip(&copy.columns) {
                        prop_assert_eq!(source_row.get(&column.id), copy_row.get(&copy_column.id));
                        copy_cells.extend(copy_row.get(&copy_column.id));
                    }
                    prop_assert_eq!(source_cells.len(), copy_cells.len());
                }
            }
        }
    }
}
