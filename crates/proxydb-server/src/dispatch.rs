//! Request dispatch: routes a decoded request to the object registry and the
//! engine behind a `RemoteDatabase`, and maps failures to wire error kinds.

use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use proxydb_core::engine::{DataAccess, Engine, TableCatalogue};
use proxydb_core::error::{EngineError, Error, ObjectError};
use proxydb_core::registry::ObjectRegistry;
use proxydb_core::schema::{CONNECTION, REMOTE_DATABASE};
use proxydb_core::types::{ObjectId, Page, SubtableSpec};

use crate::protocol::{
    CONNECTION_METHODS, DATABASE_METHODS, MethodCall, Request, Response, WriteOutcome,
};

pub fn dispatch(registry: &ObjectRegistry, req: Request) -> Response {
    match req {
        Request::Invoke {
            object_id,
            method,
            args,
        } => handle_invoke(registry, &object_id, &method, args),

        Request::Fetch { object_id } => to_response(registry.snapshot(&object_id)),

        Request::ListObjects {} => to_response(registry.list()),

        Request::Write {
            object_id,
            field,
            value,
        } => handle_write(registry, &object_id, &field, &value),

        Request::CreateObject {
            type_name,
            id,
            fields,
        } => to_response(registry.create(&type_name, id, fields)),

        Request::DeleteObject { object_id } => match registry.remove(&object_id) {
            Ok(()) => Response::ok_empty(),
            Err(e) => error_to_response(e),
        },
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

fn handle_write(registry: &ObjectRegistry, id: &ObjectId, field: &str, value: &Value) -> Response {
    let mutation = match registry.write_field(id, field, value) {
        Ok(m) => m,
        Err(e) => return error_to_response(e),
    };
    let mut fields = Map::new();
    let mut version = 0;
    if mutation.is_changed() {
        if let Ok(snap) = registry.snapshot(id) {
            for name in mutation.fields() {
                if let Some(v) = snap.fields.get(*name) {
                    fields.insert(name.to_string(), v.clone());
                }
            }
            version = snap.version;
        }
    }
    Response::ok_value(&WriteOutcome {
        accepted: mutation.is_accepted(),
        changed: mutation.fields().iter().map(|f| f.to_string()).collect(),
        fields,
        version,
    })
}

fn handle_invoke(
    registry: &ObjectRegistry,
    id: &ObjectId,
    method: &str,
    args: Map<String, Value>,
) -> Response {
    let type_name = match registry.type_of(id) {
        Ok(t) => t,
        Err(e) => return error_to_response(e),
    };
    let known: &[&str] = match type_name {
        CONNECTION => CONNECTION_METHODS,
        REMOTE_DATABASE => DATABASE_METHODS,
        _ => &[],
    };
    if !known.contains(&method) {
        return Response::error(
            "UnknownMethod",
            format!("{type_name} '{id}' has no method '{method}'"),
        );
    }
    let call = match MethodCall::decode(method, args) {
        Ok(call) => call,
        Err(e) => return Response::error("InvalidArguments", format!("{method}: {e}")),
    };
    debug!(object = %id, method, "invoke");

    match call {
        MethodCall::Reconnect {} => to_response(registry.reconnect(id)),
        MethodCall::Disconnect {} => to_response(registry.disconnect(id)),
        call => match registry.database_session(id) {
            Ok(session) => invoke_database(session.engine.as_ref(), &session.database, call),
            Err(e) => error_to_response(e),
        },
    }
}

fn invoke_database(engine: &dyn Engine, db: &str, call: MethodCall) -> Response {
    match call {
        MethodCall::LoadTableList {} => engine_response(engine.load_table_list(db)),

        MethodCall::LoadTableInfo { table } => engine_response(engine.load_table_info(db, &table)),

        MethodCall::LoadRowsCount { table } => engine_response(engine.load_rows_count(db, &table)),

        MethodCall::CreateTable { table, columns } => {
            engine_response(engine.create_table(db, &table, columns))
        }

        MethodCall::CreateTempTable { columns } => {
            engine_response(engine.create_temp_table(db, columns))
        }

        MethodCall::DeleteTable { table } => match engine.delete_table(db, &table) {
            Ok(()) => Response::ok_empty(),
            Err(e) => engine_error_to_response(e),
        },

        MethodCall::CreateSubtable {
            source,
            name,
            columns,
            filter,
        } => engine_response(engine.create_subtable(
            db,
            &source,
            SubtableSpec {
                name,
                columns,
                filter,
            },
        )),

        MethodCall::LoadTableData {
            table,
            offset,
            limit,
        } => engine_response(engine.load_table_data(db, &table, Page { offset, limit })),

        MethodCall::LoadAggrData {
            table,
            aggregation,
            offset,
            limit,
        } => engine_response(engine.load_aggr_data(
            db,
            &table,
            &aggregation,
            Page { offset, limit },
        )),

        MethodCall::LoadCells {
            table,
            columns,
            offset,
            limit,
        } => engine_response(engine.load_cells(db, &table, &columns, Page { offset, limit })),

        MethodCall::GetNumStats { table, column } => {
            engine_response(engine.get_num_stats(db, &table, &column))
        }

        MethodCall::PushCells {
            table,
            columns,
            rows,
        } => engine_response(engine.push_cells(db, &table, &columns, rows)),

        MethodCall::PushData { table, rows } => engine_response(engine.push_data(db, &table, rows)),

        MethodCall::UpdateData {
            table,
            row_id,
            values,
        } => match engine.update_data(db, &table, row_id, values) {
            Ok(()) => Response::ok_empty(),
            Err(e) => engine_error_to_response(e),
        },

        MethodCall::DeleteData { table, selector } => {
            engine_response(engine.delete_data(db, &table, &selector))
        }

        MethodCall::Reconnect {} | MethodCall::Disconnect {} => Response::error(
            "UnknownMethod",
            "connection methods cannot be invoked on a database",
        ),
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn to_response<T: Serialize>(result: Result<T, Error>) -> Response {
    match result {
        Ok(value) => Response::ok_value(&value),
        Err(e) => error_to_response(e),
    }
}

fn engine_response<T: Serialize>(result: Result<T, EngineError>) -> Response {
    match result {
        Ok(value) => Response::ok_value(&value),
        Err(e) => engine_error_to_response(e),
    }
}

fn engine_error_to_response(err: EngineError) -> Response {
    let kind = match &err {
        EngineError::TableNotFound(_) => "TableNotFound",
        EngineError::TableAlreadyExists(_) => "TableAlreadyExists",
        EngineError::TableInUse { .. } => "TableInUse",
        EngineError::ColumnNotFound { .. } => "ColumnNotFound",
        EngineError::ColumnNotNumeric { .. } => "ColumnNotNumeric",
        EngineError::RowNotFound { .. } => "RowNotFound",
        EngineError::InvalidSpec(_) | EngineError::Filter(_) => "InvalidSpec",
        EngineError::TempTableLimit { .. } => "TempTableLimit",
    };
    Response::error(kind, err.to_string())
}

pub fn error_to_response(err: Error) -> Response {
    match err {
        Error::Engine(e) => engine_error_to_response(e),
        Error::Object(ObjectError::NotFound(ref id)) => {
            Response::error("ObjectNotFound", format!("object not found: {id}"))
        }
        Error::Object(ObjectError::NotConnected(_)) => {
            Response::error("NotConnected", err.to_string())
        }
        Error::Object(_) | Error::Schema(_) => Response::error("InvalidArguments", err.to_string()),
        Error::Store(_) => Response::error("InternalError", err.to_string()),
    }
}
