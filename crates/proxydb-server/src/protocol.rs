//! Wire protocol: JSON-over-newlines requests, replies and events.
//!
//! Every request line carries a client-chosen `call_id` next to its `op`;
//! the reply line echoes it. Field updates are pushed as `event` lines that
//! carry no `call_id`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use proxydb_core::filter::Filter;
use proxydb_core::object::FieldUpdate;
use proxydb_core::types::{Aggregation, ColumnDef, ObjectId, RowSelector};

/// A request from a client. The `call_id` travels beside the tag in the same
/// JSON object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Invoke {
        object_id: ObjectId,
        method: String,
        #[serde(default)]
        args: Map<String, Value>,
    },
    Fetch {
        object_id: ObjectId,
    },
    ListObjects {},
    Write {
        object_id: ObjectId,
        field: String,
        value: Value,
    },
    CreateObject {
        type_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<ObjectId>,
        #[serde(default)]
        fields: Map<String, Value>,
    },
    DeleteObject {
        object_id: ObjectId,
    },
}

impl Request {
    /// Encode as one JSON object with `call_id` merged in.
    pub fn to_line(&self, call_id: u64) -> Result<Vec<u8>, serde_json::Error> {
        let mut value = serde_json::to_value(self)?;
        if let Value::Object(obj) = &mut value {
            obj.insert("call_id".to_string(), Value::from(call_id));
        }
        let mut data = serde_json::to_vec(&value)?;
        data.push(b'\n');
        Ok(data)
    }
}

/// Behavior invoked on a synchronized object, decoded from an `invoke`
/// request's `method` and `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "args", rename_all = "snake_case")]
pub enum MethodCall {
    // -- Connection --
    Reconnect {},
    Disconnect {},

    // -- RemoteDatabase: catalogue --
    LoadTableList {},
    LoadTableInfo {
        table: String,
    },
    LoadRowsCount {
        table: String,
    },
    CreateTable {
        table: String,
        columns: Vec<ColumnDef>,
    },
    CreateTempTable {
        columns: Vec<ColumnDef>,
    },
    DeleteTable {
        table: String,
    },
    CreateSubtable {
        source: String,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        columns: Option<Vec<String>>,
        #[serde(default)]
        filter: Option<Filter>,
    },

    // -- RemoteDatabase: data access --
    LoadTableData {
        table: String,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
    },
    LoadAggrData {
        table: String,
        aggregation: Aggregation,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
    },
    LoadCells {
        table: String,
        columns: Vec<String>,
        #[serde(default)]
        offset: usize,
        #[serde(default)]
        limit: Option<usize>,
    },
    GetNumStats {
        table: String,
        column: String,
    },
    PushCells {
        table: String,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    },
    PushData {
        table: String,
        rows: Vec<Map<String, Value>>,
    },
    UpdateData {
        table: String,
        row_id: u64,
        values: Map<String, Value>,
    },
    DeleteData {
        table: String,
        selector: RowSelector,
    },
}

/// Methods a `Connection` answers to.
pub const CONNECTION_METHODS: &[&str] = &["reconnect", "disconnect"];

/// Methods a `RemoteDatabase` answers to.
pub const DATABASE_METHODS: &[&str] = &[
    "load_table_list",
    "load_table_info",
    "load_rows_count",
    "create_table",
    "create_temp_table",
    "delete_table",
    "create_subtable",
    "load_table_data",
    "load_aggr_data",
    "load_cells",
    "get_num_stats",
    "push_cells",
    "push_data",
    "update_data",
    "delete_data",
];

impl MethodCall {
    /// Decode `args` for the named method.
    pub fn decode(method: &str, args: Map<String, Value>) -> Result<Self, serde_json::Error> {
        let mut call = Map::new();
        call.insert("method".to_string(), Value::from(method));
        call.insert("args".to_string(), Value::Object(args));
        serde_json::from_value(Value::Object(call))
    }

    /// Split into the `(method, args)` pair carried by an `invoke` request.
    pub fn encode(&self) -> Result<(String, Map<String, Value>), serde_json::Error> {
        let value = serde_json::to_value(self)?;
        let method = value
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let args = match value.get("args") {
            Some(Value::Object(args)) => args.clone(),
            _ => Map::new(),
        };
        Ok((method, args))
    }
}

/// One reply line.
#[derive(Debug, Serialize)]
pub struct Reply {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_id: Option<u64>,
    #[serde(flatten)]
    pub response: Response,
}

/// A response sent back to the client.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    Ok(OkResponse),
    Error(ErrorResponse),
}

/// Successful response.
#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub ok: bool,
    pub result: Value,
}

/// Error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl Response {
    pub fn ok(result: Value) -> Self {
        Response::Ok(OkResponse { ok: true, result })
    }

    pub fn ok_empty() -> Self {
        Self::ok(Value::Null)
    }

    /// Serialize a typed result. A value that cannot be represented as JSON
    /// becomes an `InternalError` response.
    pub fn ok_value<T: Serialize>(result: &T) -> Self {
        match serde_json::to_value(result) {
            Ok(value) => Self::ok(value),
            Err(e) => Self::error("InternalError", e.to_string()),
        }
    }

    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Response::Error(ErrorResponse {
            error: error.into(),
            message: message.into(),
        })
    }
}

/// Result of a `write` request: whether the value was accepted, which fields
/// changed, and their replicated values as of update `version`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteOutcome {
    pub accepted: bool,
    #[serde(default)]
    pub changed: Vec<String>,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub version: u64,
}

/// Server-pushed event line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    Update {
        object_id: ObjectId,
        #[serde(default)]
        version: u64,
        fields: Map<String, Value>,
    },
}

impl From<FieldUpdate> for Event {
    fn from(update: FieldUpdate) -> Self {
        Event::Update {
            object_id: update.object_id,
            version: update.version,
            fields: update.fields,
        }
    }
}

impl From<Event> for FieldUpdate {
    fn from(event: Event) -> Self {
        match event {
            Event::Update {
                object_id,
                version,
                fields,
            } => FieldUpdate {
                object_id,
                version,
                fields,
            },
        }
    }
}

/// Encode a message as one JSON line.
pub fn encode_line<T: Serialize>(msg: &T) -> Vec<u8> {
    let mut bytes = serde_json::to_vec(msg).unwrap_or_else(|e| {
        let fallback = Response::error("InternalError", e.to_string());
        serde_json::to_vec(&fallback).unwrap()
    });
    bytes.push(b'\n');
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_line_carries_call_id() {
        let req = Request::Fetch {
            object_id: "conn".into(),
        };
        let line = req.to_line(7).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value, json!({"op": "fetch", "object_id": "conn", "call_id": 7}));

        // The extra call_id field is ignored when decoding the request.
        let decoded: Request = serde_json::from_value(value).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_list_objects_has_no_fields() {
        let decoded: Request =
            serde_json::from_value(json!({"op": "list_objects", "call_id": 1})).unwrap();
        assert_eq!(decoded, Request::ListObjects {});
    }

    #[test]
    fn test_method_call_decode() {
        let args = json!({"table": "t", "offset": 500})
            .as_object()
            .cloned()
            .unwrap();
        let call = MethodCall::decode("load_table_data", args).unwrap();
        assert_eq!(
            call,
            MethodCall::LoadTableData {
                table: "t".to_string(),
                offset: 500,
                limit: None,
            }
        );

        let call = MethodCall::decode("reconnect", Map::new()).unwrap();
        assert_eq!(call, MethodCall::Reconnect {});

        assert!(MethodCall::decode("load_table_info", Map::new()).is_err());
        assert!(MethodCall::decode("drop_everything", Map::new()).is_err());
    }

    #[test]
    fn test_method_call_encode_matches_decode() {
        let call = MethodCall::DeleteData {
            table: "t".to_string(),
            selector: RowSelector::Id(3),
        };
        let (method, args) = call.encode().unwrap();
        assert_eq!(method, "delete_data");
        assert_eq!(args["selector"], json!({"id": 3}));
        assert_eq!(MethodCall::decode(&method, args).unwrap(), call);
    }

    #[test]
    fn test_reply_shapes() {
        let ok = Reply {
            call_id: Some(3),
            response: Response::ok(json!(42)),
        };
        assert_eq!(
            serde_json::to_value(&ok).unwrap(),
            json!({"call_id": 3, "ok": true, "result": 42})
        );

        let err = Reply {
            call_id: None,
            response: Response::error("ParseError", "bad json"),
        };
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            json!({"error": "ParseError", "message": "bad json"})
        );
    }

    #[test]
    fn test_update_event_shape() {
        let event = Event::from(FieldUpdate {
            object_id: "conn".into(),
            version: 4,
            fields: json!({"host": "db1"}).as_object().cloned().unwrap(),
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "update", "object_id": "conn", "version": 4, "fields": {"host": "db1"}})
        );
    }
}
