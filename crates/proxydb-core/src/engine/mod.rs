//! Engine boundary: the capability traits a concrete data engine implements.
//!
//! Operations are grouped by capability. [`TableCatalogue`] covers table
//! lifecycle, [`DataAccess`] covers paged reads and bulk mutation, and
//! [`Connector`] turns connection parameters into a live [`Engine`]. Every
//! operation is scoped to a database name so one engine can serve many
//! `RemoteDatabase` objects through one connection.

mod aggregate;
mod memory;

pub use aggregate::{aggregate, num_stats};
pub use memory::{MemoryConnector, MemoryEngine};

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::error::{EngineError, ObjectError};
use crate::object::ConnectParams;
use crate::types::{
    AggrData, Aggregation, Cells, ColumnDef, DEFAULT_PAGE_SIZE, NumStats, Page, PushOutcome,
    RowSelector, SubtableSpec, TableData, TableDescriptor, TempTableInfo,
};

/// Table lifecycle operations.
pub trait TableCatalogue {
    /// All tables of a database, ordered by name.
    fn load_table_list(&self, database: &str) -> Result<Vec<TableDescriptor>, EngineError>;

    fn load_table_info(&self, database: &str, table: &str) -> Result<Vec<ColumnDef>, EngineError>;

    fn load_rows_count(&self, database: &str, table: &str) -> Result<u64, EngineError>;

    fn create_table(
        &self,
        database: &str,
        table: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TableDescriptor, EngineError>;

    /// Create a table with a server-assigned name.
    fn create_temp_table(
        &self,
        database: &str,
        columns: Vec<ColumnDef>,
    ) -> Result<TempTableInfo, EngineError>;

    fn delete_table(&self, database: &str, table: &str) -> Result<(), EngineError>;

    /// Copy a column selection of the rows matching a filter into a new table.
    fn create_subtable(
        &self,
        database: &str,
        source: &str,
        spec: SubtableSpec,
    ) -> Result<TableDescriptor, EngineError>;
}

/// Paged reads, statistics and bulk mutation.
pub trait DataAccess {
    fn load_table_data(
        &self,
        database: &str,
        table: &str,
        page: Page,
    ) -> Result<TableData, EngineError>;

    fn load_aggr_data(
        &self,
        database: &str,
        table: &str,
        aggregation: &Aggregation,
        page: Page,
    ) -> Result<AggrData, EngineError>;

    fn load_cells(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        page: Page,
    ) -> Result<Cells, EngineError>;

    fn get_num_stats(
        &self,
        database: &str,
        table: &str,
        column: &str,
    ) -> Result<NumStats, EngineError>;

    /// Append positional rows for the given columns; other columns get `null`.
    fn push_cells(
        &self,
        database: &str,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<PushOutcome, EngineError>;

    /// Append rows given as column-name → value maps.
    fn push_data(
        &self,
        database: &str,
        table: &str,
        rows: Vec<Map<String, Value>>,
    ) -> Result<PushOutcome, EngineError>;

    fn update_data(
        &self,
        database: &str,
        table: &str,
        row_id: u64,
        values: Map<String, Value>,
    ) -> Result<(), EngineError>;

    /// Delete matching rows and return how many were removed.
    fn delete_data(
        &self,
        database: &str,
        table: &str,
        selector: &RowSelector,
    ) -> Result<usize, EngineError>;
}

/// A concrete engine implements every capability.
pub trait Engine: TableCatalogue + DataAccess + Send + Sync {
    /// Maximum rows returned by one paged read.
    fn page_size(&self) -> usize {
        DEFAULT_PAGE_SIZE
    }
}

/// Opens engine sessions for a connection.
pub trait Connector: Send + Sync {
    fn connect(&self, params: &ConnectParams) -> Result<Arc<dyn Engine>, ObjectError>;
}
