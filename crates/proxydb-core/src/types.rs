//! Core types: object identities, column definitions, and the value objects
//! returned by table operations.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::Filter;

/// Maximum number of rows returned by a single paged read.
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Maximum number of live temp tables per engine.
pub const DEFAULT_MAX_TEMP_TABLES: usize = 64;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_USER: &str = "root";

/// Identity of a synchronized object, unique within one server.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ObjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ObjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Declared type of a table column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Integer,
    Real,
    Boolean,
}

impl ColumnType {
    /// Whether a cell value may be stored in a column of this type.
    ///
    /// `null` fits every column; integers are accepted by `real` columns.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Text, Value::String(_)) => true,
            (ColumnType::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (ColumnType::Real, Value::Number(_)) => true,
            (ColumnType::Boolean, Value::Bool(_)) => true,
            _ => false,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::Real)
    }
}

/// A column definition (name + declared type).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    #[serde(rename = "type")]
    pub col_type: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, col_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            col_type,
        }
    }
}

/// Catalogue entry for a table: name, columns, and a row-count snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDescriptor {
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub rows: u64,
}

/// Short descriptor returned when a temp table is created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempTableInfo {
    pub name: String,
    pub rows: u64,
}

/// Paging window for reads. The effective limit never exceeds the engine's
/// page size; an absent limit means "one full page".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    #[serde(default)]
    pub offset: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Page {
    pub fn new(offset: usize, limit: usize) -> Self {
        Self {
            offset,
            limit: Some(limit),
        }
    }

    pub fn effective_limit(&self, page_size: usize) -> usize {
        match self.limit {
            Some(n) => n.min(page_size),
            None => page_size,
        }
    }
}

/// A stored row with its server-assigned identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub id: u64,
    pub cells: Vec<Value>,
}

/// One page of rows from `load_table_data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    pub columns: Vec<String>,
    pub offset: usize,
    pub rows: Vec<Row>,
}

/// A cell matrix from `load_cells`, one inner vector per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cells {
    pub columns: Vec<String>,
    pub values: Vec<Vec<Value>>,
}

/// Numeric statistics over the non-null values of one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumStats {
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

/// One aggregate output column. `count` without a column counts rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub func: AggFunc,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
}

impl Aggregate {
    pub fn new(func: AggFunc, column: impl Into<String>) -> Self {
        Self {
            func,
            column: Some(column.into()),
        }
    }

    pub fn count_rows() -> Self {
        Self {
            func: AggFunc::Count,
            column: None,
        }
    }

    /// Output column label, e.g. `sum(amount)` or `count(*)`.
    pub fn label(&self) -> String {
        let func = match self.func {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
            AggFunc::Avg => "avg",
        };
        format!("{func}({})", self.column.as_deref().unwrap_or("*"))
    }
}

/// Group-by columns plus aggregate functions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    #[serde(default)]
    pub group_by: Vec<String>,
    #[serde(default)]
    pub aggregates: Vec<Aggregate>,
}

/// Aggregated rows: group-by values followed by aggregate values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggrData {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Result of a bulk push. `accepted` rows were stored; when `error` is set
/// the row at index `accepted` was rejected and nothing after it was tried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushOutcome {
    pub accepted: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PushOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Which rows a `delete_data` call targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowSelector {
    Id(u64),
    Filter(Filter),
}

/// Source selection for `create_subtable`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubtableSpec {
    /// Name of the new table; the server assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Columns to copy, in order. All columns when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Filter>,
}
