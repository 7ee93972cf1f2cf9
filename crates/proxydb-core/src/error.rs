//! Error types for all ProxyDB core operations.

use std::io;
use thiserror::Error;

/// Top-level error type for ProxyDB core operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Object(#[from] ObjectError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures raised by a table engine while executing a data operation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table not found: {0}")]
    TableNotFound(String),

    #[error("table already exists: {0}")]
    TableAlreadyExists(String),

    #[error("table '{table}' is in use by {dependents} derived table(s)")]
    TableInUse { table: String, dependents: usize },

    #[error("column not found: {table}.{column}")]
    ColumnNotFound { table: String, column: String },

    #[error("column is not numeric: {table}.{column}")]
    ColumnNotNumeric { table: String, column: String },

    #[error("row not found: {table}#{row_id}")]
    RowNotFound { table: String, row_id: u64 },

    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    #[error("temp table limit of {max} reached")]
    TempTableLimit { max: usize },

    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// Schema registration and lookup failures.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("unknown object type: {0}")]
    UnknownType(String),

    #[error("object type already registered: {0}")]
    DuplicateType(String),

    #[error("field '{field}' of '{type_name}' would weaken inherited const marking")]
    ConstWeakened { type_name: String, field: String },

    #[error("field '{field}' of '{type_name}' redeclared with a different kind")]
    KindChanged { type_name: String, field: String },
}

/// Failures resolving or operating on synchronized objects.
#[derive(Debug, Error)]
pub enum ObjectError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(String),

    #[error("object '{id}' is a {actual}, expected {expected}")]
    WrongType {
        id: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("not connected: {0}")]
    NotConnected(String),

    #[error("invalid field value for '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid filter expression: {0}")]
    InvalidExpression(String),
}

/// Failures loading or saving persisted object state.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("corrupted state file: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_error_nests_under_engine() {
        let err: Error = EngineError::from(FilterError::InvalidExpression("x".into())).into();
        assert!(matches!(err, Error::Engine(EngineError::Filter(_))));
        assert_eq!(err.to_string(), "invalid filter expression: x");
    }
}
