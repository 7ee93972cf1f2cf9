//! In-memory engine: tables held behind a single `RwLock`, grouped by
//! database name.
//!
//! Reads run concurrently; writes are serialized. Databases come into
//! existence on their first write; reading an unknown database sees an empty
//! catalogue.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use super::{Connector, DataAccess, Engine, TableCatalogue, aggregate, num_stats};
use crate::error::{EngineError, ObjectError};
use crate::filter::Filter;
use crate::object::ConnectParams;
use crate::types::{
    AggrData, Aggregation, Cells, ColumnDef, DEFAULT_MAX_TEMP_TABLES, DEFAULT_PAGE_SIZE, NumStats,
    Page, PushOutcome, Row, RowSelector, SubtableSpec, TableData, TableDescriptor, TempTableInfo,
};

#[derive(Debug, Clone)]
struct Table {
    columns: Vec<ColumnDef>,
    /// Ordered by `Row::id`.
    rows: Vec<Row>,
    next_row_id: u64,
    temp: bool,
    /// Table this one was derived from by `create_subtable`.
    source: Option<String>,
}

impl Table {
    fn new(columns: Vec<ColumnDef>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
            next_row_id: 1,
            temp: false,
            source: None,
        }
    }

    fn descriptor(&self, name: &str) -> TableDescriptor {
        TableDescriptor {
            name: name.to_string(),
            columns: self.columns.clone(),
            rows: self.rows.len() as u64,
        }
    }

    fn column_index(&self, table: &str, column: &str) -> Result<usize, EngineError> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| EngineError::ColumnNotFound {
                table: table.to_string(),
                column: column.to_string(),
            })
    }

    fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    fn append(&mut self, cells: Vec<Value>) {
        let id = self.next_row_id;
        self.next_row_id += 1;
        self.rows.push(Row { id, cells });
    }

    fn matches(&self, row: &Row, filter: &Filter) -> Result<bool, EngineError> {
        let lookup = |name: &str| {
            self.columns
                .iter()
                .position(|c| c.name == name)
                .and_then(|i| row.cells.get(i))
        };
        Ok(filter.matches(&lookup)?)
    }

    fn check_filter(&self, table: &str, filter: &Filter) -> Result<(), EngineError> {
        for column in filter.columns() {
            self.column_index(table, column)?;
        }
        Ok(())
    }

    /// Build a full row from a map of named values. Errors describe why the
    /// row is malformed.
    fn row_from_map(&self, values: &Map<String, Value>) -> Result<Vec<Value>, String> {
        for name in values.keys() {
            if !self.columns.iter().any(|c| &c.name == name) {
                return Err(format!("unknown column '{name}'"));
            }
        }
        self.columns
            .iter()
            .map(|c| {
                let value = values.get(&c.name).cloned().unwrap_or(Value::Null);
                if c.col_type.accepts(&value) {
                    Ok(value)
                } else {
                    Err(format!("value {value} does not fit column '{}'", c.name))
                }
            })
            .collect()
    }
}

#[derive(Debug, Default)]
struct EngineState {
    databases: HashMap<String, BTreeMap<String, Table>>,
    temp_tables: usize,
    name_counter: u64,
}

impl EngineState {
    fn catalogue(&self, database: &str) -> Option<&BTreeMap<String, Table>> {
        self.databases.get(database)
    }

    fn table(&self, database: &str, table: &str) -> Result<&Table, EngineError> {
        self.catalogue(database)
            .and_then(|c| c.get(table))
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    fn table_mut(&mut self, database: &str, table: &str) -> Result<&mut Table, EngineError> {
        self.databases
            .get_mut(database)
            .and_then(|c| c.get_mut(table))
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))
    }

    /// Next unused `<prefix><n>` name within a database.
    fn fresh_name(&mut self, database: &str, prefix: &str) -> String {
        loop {
            self.name_counter += 1;
            let name = format!("{prefix}{}", self.name_counter);
            if self.table(database, &name).is_err() {
                return name;
            }
        }
    }

    fn insert(&mut self, database: &str, name: String, table: Table) -> Result<(), EngineError> {
        let catalogue = self.databases.entry(database.to_string()).or_default();
        if catalogue.contains_key(&name) {
            return Err(EngineError::TableAlreadyExists(name));
        }
        catalogue.insert(name, table);
        Ok(())
    }
}

fn validate_columns(columns: &[ColumnDef]) -> Result<(), EngineError> {
    if columns.is_empty() {
        return Err(EngineError::InvalidSpec(
            "a table needs at least one column".to_string(),
        ));
    }
    for (i, c) in columns.iter().enumerate() {
        if c.name.is_empty() {
            return Err(EngineError::InvalidSpec("empty column name".to_string()));
        }
        if columns[..i].iter().any(|prev| prev.name == c.name) {
            return Err(EngineError::InvalidSpec(format!(
                "duplicate column '{}'",
                c.name
            )));
        }
    }
    Ok(())
}

/// An engine that keeps every table in memory.
#[derive(Debug)]
pub struct MemoryEngine {
    state: RwLock<EngineState>,
    page_size: usize,
    max_temp_tables: usize,
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PAGE_SIZE, DEFAULT_MAX_TEMP_TABLES)
    }

    pub fn with_limits(page_size: usize, max_temp_tables: usize) -> Self {
        Self {
            state: RwLock::new(EngineState::default()),
            page_size: page_size.max(1),
            max_temp_tables,
        }
    }
}

impl TableCatalogue for MemoryEngine {
    fn load_table_list(&self, database: &str) -> Result<Vec<TableDescriptor>, EngineError> {
        let state = self.state.read();
        Ok(state
            .catalogue(database)
            .map(|c| c.iter().map(|(name, t)| t.descriptor(name)).collect())
            .unwrap_or_default())
    }

    fn load_table_info(&self, database: &str, table: &str) -> Result<Vec<ColumnDef>, EngineError> {
        let state = self.state.read();
        Ok(state.table(database, table)?.columns.clone())
    }

    fn load_rows_count(&self, database: &str, table: &str) -> Result<u64, EngineError> {
        let state = self.state.read();
        Ok(state.table(database, table)?.rows.len() as u64)
    }

    fn create_table(
        &self,
        database: &str,
        table: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TableDescriptor, EngineError> {
        if table.is_empty() {
            return Err(EngineError::InvalidSpec("empty table name".to_string()));
        }
        validate_columns(&columns)?;
        let created = Table::new(columns);
        let descriptor = created.descriptor(table);
        self.state
            .write()
            .insert(database, table.to_string(), created)?;
        debug!(database, table, "table created");
        Ok(descriptor)
    }

    fn create_temp_table(
        &self,
        database: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TempTableInfo, EngineError> {
        validate_columns(&columns)?;
        let mut state = self.state.write();
        if state.temp_tables >= self.max_temp_tables {
            return Err(EngineError::TempTableLimit {
                max: self.max_temp_tables,
            });
        }
        let name = state.fresh_name(database, "tmp_");
        let mut created = Table::new(columns);
        created.temp = true;
        state.insert(database, name.clone(), created)?;
        state.temp_tables += 1;
        debug!(database, table = %name, "temp table created");
        Ok(TempTableInfo { name, rows: 0 })
    }

    fn delete_table(&self, database: &str, table: &str) -> Result<(), EngineError> {
        let mut state = self.state.write();
        state.table(database, table)?;
        let catalogue = state
            .databases
            .get_mut(database)
            .ok_or_else(|| EngineError::TableNotFound(table.to_string()))?;

        let dependents = catalogue
            .values()
            .filter(|t| t.source.as_deref() == Some(table))
            .count();
        if dependents > 0 {
            return Err(EngineError::TableInUse {
                table: table.to_string(),
                dependents,
            });
        }

        let removed = catalogue.remove(table);
        if removed.is_some_and(|t| t.temp) {
            state.temp_tables -= 1;
        }
        debug!(database, table, "table deleted");
        Ok(())
    }

    fn create_subtable(
        &self,
        database: &str,
        source: &str,
        spec: SubtableSpec,
    ) -> Result<TableDescriptor, EngineError> {
        let mut state = self.state.write();
        let src = state.table(database, source)?;

        let picked: Vec<usize> = match &spec.columns {
            Some(names) if names.is_empty() => {
                return Err(EngineError::InvalidSpec(
                    "column selection is empty".to_string(),
                ));
            }
            Some(names) => names
                .iter()
                .map(|n| {
                    src.column_index(source, n)
                        .map_err(|_| EngineError::InvalidSpec(format!("unknown column '{n}'")))
                })
                .collect::<Result<_, _>>()?,
            None => (0..src.columns.len()).collect(),
        };
        if let Some(filter) = &spec.filter {
            src.check_filter(source, filter)
                .map_err(|e| EngineError::InvalidSpec(e.to_string()))?;
        }

        let mut derived = Table::new(picked.iter().map(|&i| src.columns[i].clone()).collect());
        validate_columns(&derived.columns)?;
        derived.source = Some(source.to_string());
        for row in &src.rows {
            if let Some(filter) = &spec.filter {
                if !src.matches(row, filter)? {
                    continue;
                }
            }
            derived.append(picked.iter().map(|&i| row.cells[i].clone()).collect());
        }

        let name = match spec.name {
            Some(name) if name.is_empty() => {
                return Err(EngineError::InvalidSpec("empty table name".to_string()));
            }
            Some(name) => name,
            None => state.fresh_name(database, "sub_"),
        };
        let descriptor = derived.descriptor(&name);
        state.insert(database, name, derived)?;
        debug!(database, source, table = %descriptor.name, rows = descriptor.rows, "subtable created");
        Ok(descriptor)
    }
}

impl DataAccess for MemoryEngine {
    fn load_table_data(
        &self,
        database: &str,
        table: &str,
        page: Page,
    ) -> Result<TableData, EngineError> {
        let state = self.state.read();
        let t = state.table(database, table)?;
        let limit = page.effective_limit(self.page_size);
        Ok(TableData {
            columns: t.column_names(),
            offset: page.offset,
            rows: t.rows.iter().skip(page.offset).take(limit).cloned().collect(),
        })
    }

    fn load_aggr_data(
        &self,
        database: &str,
        table: &str,
        aggregation: &Aggregation,
        page: Page,
    ) -> Result<AggrData, EngineError> {
        let state = self.state.read();
        let t = state.table(database, table)?;
        let mut data = aggregate(table, &t.columns, &t.rows, aggregation)?;
        let limit = page.effective_limit(self.page_size);
        data.rows = data.rows.into_iter().skip(page.offset).take(limit).collect();
        Ok(data)
    }

    fn load_cells(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        page: Page,
    ) -> Result<Cells, EngineError> {
        let state = self.state.read();
        let t = state.table(database, table)?;
        let picked = columns
            .iter()
            .map(|c| t.column_index(table, c))
            .collect::<Result<Vec<_>, _>>()?;
        let limit = page.effective_limit(self.page_size);
        Ok(Cells {
            columns: columns.to_vec(),
            values: t
                .rows
                .iter()
                .skip(page.offset)
                .take(limit)
                .map(|row| picked.iter().map(|&i| row.cells[i].clone()).collect())
                .collect(),
        })
    }

    fn get_num_stats(
        &self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<NumStats, EngineError> {
        let state = self.state.read();
        let t = state.table(database, table)?;
        num_stats(table, &t.columns, &t.rows, column)
    }

    fn push_cells(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<PushOutcome, EngineError> {
        let mut state = self.state.write();
        let t = state.table_mut(database, table)?;
        let picked = columns
            .iter()
            .map(|c| t.column_index(table, c))
            .collect::<Result<Vec<_>, _>>()?;

        let mut accepted = 0;
        for (n, row) in rows.into_iter().enumerate() {
            if row.len() != picked.len() {
                return Ok(PushOutcome {
                    accepted,
                    error: Some(format!(
                        "row {n}: expected {} values, got {}",
                        picked.len(),
                        row.len()
                    )),
                });
            }
            let mut cells = vec![Value::Null; t.columns.len()];
            for (&i, value) in picked.iter().zip(row) {
                if !t.columns[i].col_type.accepts(&value) {
                    return Ok(PushOutcome {
                        accepted,
                        error: Some(format!(
                            "row {n}: value {value} does not fit column '{}'",
                            t.columns[i].name
                        )),
                    });
                }
                cells[i] = value;
            }
            t.append(cells);
            accepted += 1;
        }
        Ok(PushOutcome {
            accepted,
            error: None,
        })
    }

    fn push_data(
        &self,
        database: &str,
        table: &str,
        rows: Vec<Map<String, Value>>,
    ) -> Result<PushOutcome, EngineError> {
        let mut state = self.state.write();
        let t = state.table_mut(database, table)?;

        let mut accepted = 0;
        for (n, row) in rows.iter().enumerate() {
            match t.row_from_map(row) {
                Ok(cells) => {
                    t.append(cells);
                    accepted += 1;
                }
                Err(reason) => {
                    return Ok(PushOutcome {
                        accepted,
                        error: Some(format!("row {n}: {reason}")),
                    });
                }
            }
        }
        Ok(PushOutcome {
            accepted,
            error: None,
        })
    }

    fn update_data(
        &self,
        database: &str,
        table: &str,
        row_id: u64,
        values: Map<String, Value>,
    ) -> Result<(), EngineError> {
        let mut state = self.state.write();
        let t = state.table_mut(database, table)?;

        let mut updates = Vec::with_capacity(values.len());
        for (name, value) in values {
            let i = t.column_index(table, &name)?;
            if !t.columns[i].col_type.accepts(&value) {
                return Err(EngineError::InvalidSpec(format!(
                    "value {value} does not fit column '{name}'"
                )));
            }
            updates.push((i, value));
        }

        let pos = t
            .rows
            .binary_search_by_key(&row_id, |r| r.id)
            .map_err(|_| EngineError::RowNotFound {
                table: table.to_string(),
                row_id,
            })?;
        for (i, value) in updates {
            t.rows[pos].cells[i] = value;
        }
        Ok(())
    }

    fn delete_data(
        &self,
        database: &str,
        table: &str,
        selector: &RowSelector,
    ) -> Result<usize, EngineError> {
        let mut state = self.state.write();
        let t = state.table_mut(database, table)?;
        let before = t.rows.len();

        match selector {
            RowSelector::Id(id) => {
                if let Ok(pos) = t.rows.binary_search_by_key(id, |r| r.id) {
                    t.rows.remove(pos);
                }
            }
            RowSelector::Filter(filter) => {
                t.check_filter(table, filter)?;
                let mut keep = Vec::with_capacity(t.rows.len());
                for row in &t.rows {
                    keep.push(!t.matches(row, filter)?);
                }
                let mut flags = keep.into_iter();
                t.rows.retain(|_| flags.next().unwrap_or(true));
            }
        }
        Ok(before - t.rows.len())
    }
}

impl Engine for MemoryEngine {
    fn page_size(&self) -> usize {
        self.page_size
    }
}

/// Connector that hands out one shared [`MemoryEngine`], optionally checking
/// a password.
#[derive(Debug, Clone)]
pub struct MemoryConnector {
    engine: Arc<MemoryEngine>,
    password: Option<String>,
}

impl MemoryConnector {
    pub fn new(engine: Arc<MemoryEngine>) -> Self {
        Self {
            engine,
            password: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn engine(&self) -> &Arc<MemoryEngine> {
        &self.engine
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Engine>, ObjectError> {
        if params.host.is_empty() {
            return Err(ObjectError::NotConnected("host is empty".to_string()));
        }
        if let Some(expected) = &self.password {
            if &params.password != expected {
                return Err(ObjectError::NotConnected(format!(
                    "access denied for user '{}'@'{}'",
                    params.user, params.host
                )));
            }
        }
        Ok(self.engine.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AggFunc, Aggregate, ColumnType};
    use serde_json::json;

    const DB: &str = "main";

    fn people() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine
            .create_table(
                DB,
                "people",
                vec![
                    ColumnDef::new("name", ColumnType::Text),
                    ColumnDef::new("age", ColumnType::Integer),
                    ColumnDef::new("score", ColumnType::Real),
                ],
            )
            .unwrap();
        engine
    }

    fn fill(engine: &MemoryEngine, n: usize) {
        let rows = (0..n)
            .map(|i| vec![json!(format!("p{i}")), json!(i as i64 % 90), json!(i as f64 / 2.0)])
            .collect();
        let columns = ["name", "age", "score"].map(String::from);
        let outcome = engine.push_cells(DB, "people", &columns, rows).unwrap();
        assert_eq!(outcome.accepted, n);
        assert!(outcome.is_complete());
    }

    #[test]
    fn test_table_lifecycle() {
        let engine = people();
        engine
            .create_table(DB, "alpha", vec![ColumnDef::new("x", ColumnType::Boolean)])
            .unwrap();

        let list = engine.load_table_list(DB).unwrap();
        let names: Vec<&str> = list.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "people"]);
        assert_eq!(engine.load_table_info(DB, "people").unwrap().len(), 3);
        assert_eq!(engine.load_rows_count(DB, "people").unwrap(), 0);

        assert!(matches!(
            engine.create_table(DB, "alpha", vec![ColumnDef::new("y", ColumnType::Text)]),
            Err(EngineError::TableAlreadyExists(_))
        ));

        engine.delete_table(DB, "alpha").unwrap();
        assert!(matches!(
            engine.delete_table(DB, "alpha"),
            Err(EngineError::TableNotFound(_))
        ));
        assert!(matches!(
            engine.load_rows_count(DB, "alpha"),
            Err(EngineError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_unknown_database_is_empty() {
        let engine = people();
        assert!(engine.load_table_list("other").unwrap().is_empty());
        assert!(matches!(
            engine.load_table_info("other", "people"),
            Err(EngineError::TableNotFound(_))
        ));
    }

    #[test]
    fn test_invalid_column_definitions() {
        let engine = MemoryEngine::new();
        assert!(matches!(
            engine.create_table(DB, "t", vec![]),
            Err(EngineError::InvalidSpec(_))
        ));
        assert!(matches!(
            engine.create_table(
                DB,
                "t",
                vec![
                    ColumnDef::new("a", ColumnType::Text),
                    ColumnDef::new("a", ColumnType::Integer)
                ]
            ),
            Err(EngineError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_paging_is_capped_at_page_size() {
        let engine = people();
        fill(&engine, 1200);

        let mut offset = 0;
        let mut calls = 0;
        let mut sizes = Vec::new();
        loop {
            let page = engine
                .load_table_data(DB, "people", Page::new(offset, 500))
                .unwrap();
            calls += 1;
            sizes.push(page.rows.len());
            offset += page.rows.len();
            if page.rows.len() < 500 {
                break;
            }
        }
        assert_eq!(calls, 3);
        assert_eq!(sizes, vec![500, 500, 200]);

        let big = engine
            .load_table_data(DB, "people", Page::new(0, 10_000))
            .unwrap();
        assert_eq!(big.rows.len(), 500);

        let small = engine
            .load_table_data(DB, "people", Page::new(10, 7))
            .unwrap();
        assert_eq!(small.rows.len(), 7);
        assert_eq!(small.rows[0].cells[0], json!("p10"));

        let past_end = engine
            .load_table_data(DB, "people", Page::new(5000, 10))
            .unwrap();
        assert!(past_end.rows.is_empty());
    }

    #[test]
    fn test_custom_page_size() {
        let engine = MemoryEngine::with_limits(100, 4);
        engine
            .create_table(DB, "people", vec![ColumnDef::new("name", ColumnType::Text)])
            .unwrap();
        let rows = (0..150).map(|i| vec![json!(i.to_string())]).collect();
        engine
            .push_cells(DB, "people", &["name".to_string()], rows)
            .unwrap();
        let page = engine
            .load_table_data(DB, "people", Page::default())
            .unwrap();
        assert_eq!(page.rows.len(), 100);
    }

    #[test]
    fn test_load_cells_projection() {
        let engine = people();
        fill(&engine, 10);
        let cells = engine
            .load_cells(
                DB,
                "people",
                &["score".to_string(), "name".to_string()],
                Page::new(2, 3),
            )
            .unwrap();
        assert_eq!(cells.columns, vec!["score", "name"]);
        assert_eq!(
            cells.values,
            vec![
                vec![json!(1.0), json!("p2")],
                vec![json!(1.5), json!("p3")],
                vec![json!(2.0), json!("p4")],
            ]
        );

        assert!(matches!(
            engine.load_cells(DB, "people", &["nope".to_string()], Page::default()),
            Err(EngineError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_push_cells_partial_batch() {
        let engine = people();
        let columns = ["name", "age"].map(String::from);
        let mut rows: Vec<Vec<Value>> = (1..=10)
            .map(|i| vec![json!(format!("r{i}")), json!(i)])
            .collect();
        rows[6] = vec![json!("r7"), json!("seven")];

        let outcome = engine
            .push_cells(DB, "people", &columns, rows.clone())
            .unwrap();
        assert_eq!(outcome.accepted, 6);
        assert!(outcome.error.unwrap().starts_with("row 6"));
        assert_eq!(engine.load_rows_count(DB, "people").unwrap(), 6);

        rows[6] = vec![json!("r7"), json!(7)];
        let retry = engine
            .push_cells(DB, "people", &columns, rows[6..].to_vec())
            .unwrap();
        assert_eq!(retry.accepted, 4);
        assert!(retry.is_complete());
        assert_eq!(engine.load_rows_count(DB, "people").unwrap(), 10);

        let page = engine
            .load_table_data(DB, "people", Page::default())
            .unwrap();
        assert_eq!(page.rows[9].cells, vec![json!("r10"), json!(10), Value::Null]);
    }

    #[test]
    fn test_push_cells_arity_mismatch() {
        let engine = people();
        let outcome = engine
            .push_cells(
                DB,
                "people",
                &["name".to_string()],
                vec![vec![json!("a")], vec![json!("b"), json!(1)]],
            )
            .unwrap();
        assert_eq!(outcome.accepted, 1);
        assert!(!outcome.is_complete());
    }

    #[test]
    fn test_push_data_named_rows() {
        let engine = people();
        let rows = vec![
            json!({"name": "a", "age": 1}),
            json!({"name": "b", "score": 2.5}),
            json!({"name": "c", "height": 180}),
            json!({"name": "d"}),
        ]
        .into_iter()
        .map(|v| match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        })
        .collect();
        let outcome = engine.push_data(DB, "people", rows).unwrap();
        assert_eq!(outcome.accepted, 2);
        assert!(outcome.error.unwrap().contains("height"));
    }

    #[test]
    fn test_update_data() {
        let engine = people();
        fill(&engine, 3);
        let mut values = Map::new();
        values.insert("age".to_string(), json!(41));
        engine.update_data(DB, "people", 2, values.clone()).unwrap();

        let page = engine
            .load_table_data(DB, "people", Page::default())
            .unwrap();
        assert_eq!(page.rows[1].id, 2);
        assert_eq!(page.rows[1].cells[1], json!(41));

        assert!(matches!(
            engine.update_data(DB, "people", 99, values),
            Err(EngineError::RowNotFound { row_id: 99, .. })
        ));

        let mut bad = Map::new();
        bad.insert("age".to_string(), json!("old"));
        assert!(matches!(
            engine.update_data(DB, "people", 1, bad),
            Err(EngineError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_delete_data() {
        let engine = people();
        fill(&engine, 10);

        let none = engine
            .delete_data(DB, "people", &RowSelector::Filter(Filter::gt("age", 1000)))
            .unwrap();
        assert_eq!(none, 0);
        assert_eq!(engine.load_rows_count(DB, "people").unwrap(), 10);

        let removed = engine
            .delete_data(DB, "people", &RowSelector::Filter(Filter::lt("age", 4)))
            .unwrap();
        assert_eq!(removed, 4);

        assert_eq!(engine.delete_data(DB, "people", &RowSelector::Id(5)).unwrap(), 1);
        assert_eq!(engine.delete_data(DB, "people", &RowSelector::Id(5)).unwrap(), 0);
        assert_eq!(engine.load_rows_count(DB, "people").unwrap(), 5);

        assert!(matches!(
            engine.delete_data(DB, "people", &RowSelector::Filter(Filter::is_null("zzz"))),
            Err(EngineError::ColumnNotFound { .. })
        ));
    }

    #[test]
    fn test_temp_tables_and_limit() {
        let engine = MemoryEngine::with_limits(DEFAULT_PAGE_SIZE, 2);
        let cols = || vec![ColumnDef::new("v", ColumnType::Real)];
        let a = engine.create_temp_table(DB, cols()).unwrap();
        let b = engine.create_temp_table(DB, cols()).unwrap();
        assert_ne!(a.name, b.name);
        assert!(a.name.starts_with("tmp_"));
        assert_eq!(a.rows, 0);
        assert!(matches!(
            engine.create_temp_table(DB, cols()),
            Err(EngineError::TempTableLimit { max: 2 })
        ));

        engine.delete_table(DB, &a.name).unwrap();
        engine.create_temp_table(DB, cols()).unwrap();
    }

    #[test]
    fn test_create_subtable_and_in_use() {
        let engine = people();
        fill(&engine, 20);

        let sub = engine
            .create_subtable(
                DB,
                "people",
                SubtableSpec {
                    name: Some("young".to_string()),
                    columns: Some(vec!["name".to_string(), "age".to_string()]),
                    filter: Some(Filter::lt("age", 5)),
                },
            )
            .unwrap();
        assert_eq!(sub.name, "young");
        assert_eq!(sub.rows, 5);
        assert_eq!(sub.columns.len(), 2);

        let unnamed = engine
            .create_subtable(DB, "people", SubtableSpec::default())
            .unwrap();
        assert!(unnamed.name.starts_with("sub_"));
        assert_eq!(unnamed.rows, 20);

        assert!(matches!(
            engine.delete_table(DB, "people"),
            Err(EngineError::TableInUse { dependents: 2, .. })
        ));
        engine.delete_table(DB, "young").unwrap();
        engine.delete_table(DB, &unnamed.name).unwrap();
        engine.delete_table(DB, "people").unwrap();
    }

    #[test]
    fn test_create_subtable_invalid_spec() {
        let engine = people();
        let bad_column = SubtableSpec {
            columns: Some(vec!["nope".to_string()]),
            ..Default::default()
        };
        assert!(matches!(
            engine.create_subtable(DB, "people", bad_column),
            Err(EngineError::InvalidSpec(_))
        ));
        let bad_filter = SubtableSpec {
            filter: Some(Filter::eq("nope", 1)),
            ..Default::default()
        };
        assert!(matches!(
            engine.create_subtable(DB, "people", bad_filter),
            Err(EngineError::InvalidSpec(_))
        ));
    }

    #[test]
    fn test_aggr_data_paging_and_stats() {
        let engine = people();
        fill(&engine, 100);
        let spec = Aggregation {
            group_by: vec!["age".to_string()],
            aggregates: vec![Aggregate::new(AggFunc::Count, "name")],
        };
        let first = engine
            .load_aggr_data(DB, "people", &spec, Page::new(0, 60))
            .unwrap();
        assert_eq!(first.rows.len(), 60);
        let rest = engine
            .load_aggr_data(DB, "people", &spec, Page::new(60, 60))
            .unwrap();
        assert_eq!(rest.rows.len(), 30);

        let stats = engine.get_num_stats(DB, "people", "score").unwrap();
        assert_eq!(stats.count, 100);
        assert_eq!(stats.min, Some(0.0));
        assert_eq!(stats.max, Some(49.5));
    }

    #[test]
    fn test_connector_checks_password() {
        let connector = MemoryConnector::new(Arc::new(MemoryEngine::new())).with_password("pw");
        let mut params = ConnectParams {
            host: "localhost".to_string(),
            port: 3306,
            user: "root".to_string(),
            password: "wrong".to_string(),
        };
        assert!(connector.connect(&params).is_err());
        params.password = "pw".to_string();
        assert!(connector.connect(&params).is_ok());
        params.host.clear();
        assert!(connector.connect(&params).is_err());
    }
}
