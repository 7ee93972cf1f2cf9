//! Client-side proxies for synchronized objects.
//!
//! A [`ProxyClient`] keeps a [`Mirror`] of the replicated fields of every
//! object it has fetched and applies `update` events as they arrive. Proxies
//! read their getters from the mirror and send every behavior through the
//! channel, so a proxy method looks like a local call but runs on the server.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use proxydb_core::filter::Filter;
use proxydb_core::object::{FieldUpdate, Snapshot};
use proxydb_core::schema::{CONNECTION, REMOTE_DATABASE};
use proxydb_core::types::{
    AggrData, Aggregation, Cells, ColumnDef, DEFAULT_HOST, DEFAULT_PORT, DEFAULT_USER, NumStats,
    ObjectId, Page, PushOutcome, RowSelector, SubtableSpec, TableData, TableDescriptor,
    TempTableInfo,
};

use crate::channel::{Channel, Result};
use crate::error::ClientError;
use crate::protocol::{Request, WriteOutcome};

// ---------------------------------------------------------------------------
// Mirror
// ---------------------------------------------------------------------------

/// Last synchronized field values of every object a client has seen.
///
/// Write replies and update events reach the mirror on different paths, so
/// each field remembers the version it was last set at and older values are
/// dropped.
#[derive(Debug, Default)]
pub struct Mirror {
    objects: RwLock<HashMap<ObjectId, Mirrored>>,
}

#[derive(Debug)]
struct Mirrored {
    snapshot: Snapshot,
    versions: HashMap<String, u64>,
}

impl Mirrored {
    fn merge(&mut self, fields: &Map<String, Value>, version: u64) {
        for (name, value) in fields {
            if self.versions.get(name).is_some_and(|&seen| seen > version) {
                continue;
            }
            self.snapshot.fields.insert(name.clone(), value.clone());
            self.versions.insert(name.clone(), version);
        }
        self.snapshot.version = self.snapshot.version.max(version);
    }
}

impl Mirror {
    pub fn insert(&self, snapshot: Snapshot) {
        let mut objects = self.objects.write();
        match objects.get_mut(&snapshot.id) {
            Some(known) => {
                known.snapshot.type_name = snapshot.type_name;
                known.merge(&snapshot.fields, snapshot.version);
            }
            None => {
                let versions = snapshot
                    .fields
                    .keys()
                    .map(|name| (name.clone(), snapshot.version))
                    .collect();
                objects.insert(snapshot.id.clone(), Mirrored { snapshot, versions });
            }
        }
    }

    /// Merge pushed fields into a known object. Updates for objects this
    /// client never fetched are ignored.
    pub fn apply(&self, update: &FieldUpdate) {
        if let Some(known) = self.objects.write().get_mut(&update.object_id) {
            known.merge(&update.fields, update.version);
        }
    }

    pub fn remove(&self, id: &ObjectId) {
        self.objects.write().remove(id);
    }

    pub fn field(&self, id: &ObjectId, name: &str) -> Option<Value> {
        self.objects
            .read()
            .get(id)
            .and_then(|known| known.snapshot.fields.get(name).cloned())
    }

    pub fn snapshot(&self, id: &ObjectId) -> Option<Snapshot> {
        self.objects.read().get(id).map(|known| known.snapshot.clone())
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Entry point for a client: fetches objects and hands out proxies.
pub struct ProxyClient {
    channel: Arc<dyn Channel>,
    mirror: Arc<Mirror>,
    updater: JoinHandle<()>,
}

impl ProxyClient {
    /// Must be called inside a tokio runtime; a background task applies
    /// server updates to the mirror.
    pub fn new(channel: Arc<dyn Channel>) -> Self {
        let mirror = Arc::new(Mirror::default());
        let updater = tokio::spawn(apply_updates(channel.subscribe(), Arc::downgrade(&mirror)));
        Self {
            channel,
            mirror,
            updater,
        }
    }

    pub fn channel(&self) -> &Arc<dyn Channel> {
        &self.channel
    }

    pub fn mirror(&self) -> &Arc<Mirror> {
        &self.mirror
    }

    /// Fetch the current replicated state of an object.
    pub async fn fetch(&self, id: &ObjectId) -> Result<Snapshot> {
        let snap: Snapshot = decode(
            self.channel
                .request(Request::Fetch {
                    object_id: id.clone(),
                })
                .await?,
        )?;
        self.mirror.insert(snap.clone());
        Ok(snap)
    }

    pub async fn list_objects(&self) -> Result<Vec<Snapshot>> {
        let snaps: Vec<Snapshot> = decode(self.channel.request(Request::ListObjects {}).await?)?;
        for snap in &snaps {
            self.mirror.insert(snap.clone());
        }
        Ok(snaps)
    }

    pub async fn create_object(
        &self,
        type_name: &str,
        id: Option<ObjectId>,
        fields: Map<String, Value>,
    ) -> Result<Snapshot> {
        let snap: Snapshot = decode(
            self.channel
                .request(Request::CreateObject {
                    type_name: type_name.to_string(),
                    id,
                    fields,
                })
                .await?,
        )?;
        self.mirror.insert(snap.clone());
        Ok(snap)
    }

    pub async fn delete_object(&self, id: &ObjectId) -> Result<()> {
        self.channel
            .request(Request::DeleteObject {
                object_id: id.clone(),
            })
            .await?;
        self.mirror.remove(id);
        Ok(())
    }

    /// Proxy for a `Connection`.
    pub async fn connection(&self, id: &ObjectId) -> Result<ConnectionProxy> {
        let snap = self.fetch(id).await?;
        if snap.type_name != CONNECTION {
            return Err(wrong_type(id, CONNECTION, &snap.type_name));
        }
        Ok(ConnectionProxy {
            target: self.target(id),
        })
    }

    /// Handle for any database object. Only a `RemoteDatabase` has a concrete
    /// engine behind it; other database types resolve to
    /// [`DatabaseHandle::Unresolved`].
    pub async fn database(&self, id: &ObjectId) -> Result<DatabaseHandle> {
        let snap = self.fetch(id).await?;
        if snap.type_name == CONNECTION {
            return Err(wrong_type(id, "database", &snap.type_name));
        }
        if snap.type_name == REMOTE_DATABASE {
            Ok(DatabaseHandle::Remote(RemoteDatabaseProxy {
                target: self.target(id),
            }))
        } else {
            debug!(object = %id, type_name = %snap.type_name, "database has no concrete engine");
            Ok(DatabaseHandle::Unresolved(UnresolvedDatabase { id: id.clone() }))
        }
    }

    fn target(&self, id: &ObjectId) -> Target {
        Target {
            id: id.clone(),
            channel: self.channel.clone(),
            mirror: self.mirror.clone(),
        }
    }
}

impl Drop for ProxyClient {
    fn drop(&mut self) {
        self.updater.abort();
    }
}

async fn apply_updates(mut updates: broadcast::Receiver<FieldUpdate>, mirror: Weak<Mirror>) {
    loop {
        match updates.recv().await {
            Ok(update) => match mirror.upgrade() {
                Some(mirror) => mirror.apply(&update),
                None => break,
            },
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "proxy updates dropped");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Proxies
// ---------------------------------------------------------------------------

/// What every proxy shares: the object it stands for and how to reach it.
#[derive(Clone)]
struct Target {
    id: ObjectId,
    channel: Arc<dyn Channel>,
    mirror: Arc<Mirror>,
}

impl Target {
    fn field(&self, name: &str) -> Option<Value> {
        self.mirror.field(&self.id, name)
    }

    async fn write(&self, field: &str, value: Value) -> Result<bool> {
        let outcome: WriteOutcome = decode(
            self.channel
                .request(Request::Write {
                    object_id: self.id.clone(),
                    field: field.to_string(),
                    value,
                })
                .await?,
        )?;
        if !outcome.fields.is_empty() {
            self.mirror.apply(&FieldUpdate {
                object_id: self.id.clone(),
                version: outcome.version,
                fields: outcome.fields,
            });
        }
        Ok(outcome.accepted)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, args: Value) -> Result<T> {
        let args = match args {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        decode(self.channel.invoke(&self.id, method, args).await?)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(ClientError::Serialization)
}

fn wrong_type(id: &ObjectId, expected: &str, actual: &str) -> ClientError {
    ClientError::Protocol(format!("object '{id}' is a {actual}, expected {expected}"))
}

/// Client mirror of a `Connection`.
#[derive(Clone)]
pub struct ConnectionProxy {
    target: Target,
}

impl ConnectionProxy {
    pub fn id(&self) -> &ObjectId {
        &self.target.id
    }

    pub fn host(&self) -> String {
        self.target
            .field("host")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_HOST.to_string())
    }

    pub fn port(&self) -> u16 {
        self.target
            .field("port")
            .and_then(|v| v.as_u64())
            .and_then(|p| u16::try_from(p).ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn user(&self) -> String {
        self.target
            .field("user")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_USER.to_string())
    }

    pub fn connected(&self) -> bool {
        self.target
            .field("connected")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Returns whether the server accepted the value.
    pub async fn set_host(&self, host: &str) -> Result<bool> {
        self.target.write("host", json!(host)).await
    }

    /// Non-finite values cannot be represented on the wire and are always
    /// rejected by the server.
    pub async fn set_port(&self, port: f64) -> Result<bool> {
        self.target.write("port", json!(port)).await
    }

    pub async fn set_user(&self, user: &str) -> Result<bool> {
        self.target.write("user", json!(user)).await
    }

    /// Write-only: the password is never mirrored back.
    pub async fn set_password(&self, password: &str) -> Result<bool> {
        self.target.write("password", json!(password)).await
    }
}

/// Behaviors of a connection.
#[async_trait]
pub trait Connectable {
    /// Connect with the connection's current parameters.
    async fn reconnect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;
}

#[async_trait]
impl Connectable for ConnectionProxy {
    async fn reconnect(&self) -> Result<()> {
        let snap: Snapshot = self.target.call("reconnect", json!({})).await?;
        self.target.mirror.insert(snap);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let snap: Snapshot = self.target.call("disconnect", json!({})).await?;
        self.target.mirror.insert(snap);
        Ok(())
    }
}

/// Table lifecycle operations of a database, as seen by a client.
#[async_trait]
pub trait RemoteCatalogue {
    async fn load_table_list(&self) -> Result<Vec<TableDescriptor>>;

    async fn load_table_info(&self, table: &str) -> Result<Vec<ColumnDef>>;

    async fn load_rows_count(&self, table: &str) -> Result<u64>;

    async fn create_table(&self, table: &str, columns: Vec<ColumnDef>) -> Result<TableDescriptor>;

    async fn create_temp_table(&self, columns: Vec<ColumnDef>) -> Result<TempTableInfo>;

    async fn delete_table(&self, table: &str) -> Result<()>;

    async fn create_subtable(&self, source: &str, spec: SubtableSpec) -> Result<TableDescriptor>;
}

/// Paged reads, statistics and bulk mutation of a database, as seen by a
/// client.
#[async_trait]
pub trait RemoteDataAccess {
    async fn load_table_data(&self, table: &str, page: Page) -> Result<TableData>;

    async fn load_aggr_data(
        &self,
        table: &str,
        aggregation: &Aggregation,
        page: Page,
    ) -> Result<AggrData>;

    async fn load_cells(&self, table: &str, columns: &[String], page: Page) -> Result<Cells>;

    async fn get_num_stats(&self, table: &str, column: &str) -> Result<NumStats>;

    async fn push_cells(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<PushOutcome>;

    async fn push_data(&self, table: &str, rows: Vec<Map<String, Value>>) -> Result<PushOutcome>;

    async fn update_data(&self, table: &str, row_id: u64, values: Map<String, Value>)
    -> Result<()>;

    async fn delete_data(&self, table: &str, selector: RowSelector) -> Result<usize>;
}

/// Client mirror of a `RemoteDatabase`.
#[derive(Clone)]
pub struct RemoteDatabaseProxy {
    target: Target,
}

impl RemoteDatabaseProxy {
    pub fn id(&self) -> &ObjectId {
        &self.target.id
    }

    pub fn database(&self) -> String {
        self.target
            .field("database")
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub fn connection(&self) -> Option<ObjectId> {
        self.target
            .field("connection")
            .and_then(|v| v.as_str().map(ObjectId::from))
    }

    /// Point this database at another connection, or at none.
    pub async fn set_connection(&self, connection: Option<&ObjectId>) -> Result<bool> {
        let value = match connection {
            Some(id) => json!(id.as_str()),
            None => Value::Null,
        };
        self.target.write("connection", value).await
    }

    /// Delete every row matching `filter`.
    pub async fn delete_where(&self, table: &str, filter: Filter) -> Result<usize> {
        self.delete_data(table, RowSelector::Filter(filter)).await
    }
}

#[async_trait]
impl RemoteCatalogue for RemoteDatabaseProxy {
    async fn load_table_list(&self) -> Result<Vec<TableDescriptor>> {
        self.target.call("load_table_list", json!({})).await
    }

    async fn load_table_info(&self, table: &str) -> Result<Vec<ColumnDef>> {
        self.target
            .call("load_table_info", json!({ "table": table }))
            .await
    }

    async fn load_rows_count(&self, table: &str) -> Result<u64> {
        self.target
            .call("load_rows_count", json!({ "table": table }))
            .await
    }

    async fn create_table(&self, table: &str, columns: Vec<ColumnDef>) -> Result<TableDescriptor> {
        self.target
            .call("create_table", json!({ "table": table, "columns": columns }))
            .await
    }

    async fn create_temp_table(&self, columns: Vec<ColumnDef>) -> Result<TempTableInfo> {
        self.target
            .call("create_temp_table", json!({ "columns": columns }))
            .await
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        let _: Value = self
            .target
            .call("delete_table", json!({ "table": table }))
            .await?;
        Ok(())
    }

    async fn create_subtable(&self, source: &str, spec: SubtableSpec) -> Result<TableDescriptor> {
        let mut args = match serde_json::to_value(&spec) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        args.insert("source".to_string(), json!(source));
        self.target
            .call("create_subtable", Value::Object(args))
            .await
    }
}

#[async_trait]
impl RemoteDataAccess for RemoteDatabaseProxy {
    async fn load_table_data(&self, table: &str, page: Page) -> Result<TableData> {
        self.target
            .call("load_table_data", page_args(json!({ "table": table }), page))
            .await
    }

    async fn load_aggr_data(
        &self,
        table: &str,
        aggregation: &Aggregation,
        page: Page,
    ) -> Result<AggrData> {
        let args = json!({ "table": table, "aggregation": aggregation });
        self.target
            .call("load_aggr_data", page_args(args, page))
            .await
    }

    async fn load_cells(&self, table: &str, columns: &[String], page: Page) -> Result<Cells> {
        let args = json!({ "table": table, "columns": columns });
        self.target.call("load_cells", page_args(args, page)).await
    }

    async fn get_num_stats(&self, table: &str, column: &str) -> Result<NumStats> {
        self.target
            .call("get_num_stats", json!({ "table": table, "column": column }))
            .await
    }

    async fn push_cells(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<PushOutcome> {
        self.target
            .call(
                "push_cells",
                json!({ "table": table, "columns": columns, "rows": rows }),
            )
            .await
    }

    async fn push_data(&self, table: &str, rows: Vec<Map<String, Value>>) -> Result<PushOutcome> {
        self.target
            .call("push_data", json!({ "table": table, "rows": rows }))
            .await
    }

    async fn update_data(
        &self,
        table: &str,
        row_id: u64,
        values: Map<String, Value>,
    ) -> Result<()> {
        let _: Value = self
            .target
            .call(
                "update_data",
                json!({ "table": table, "row_id": row_id, "values": values }),
            )
            .await?;
        Ok(())
    }

    async fn delete_data(&self, table: &str, selector: RowSelector) -> Result<usize> {
        self.target
            .call(
                "delete_data",
                json!({ "table": table, "selector": selector }),
            )
            .await
    }
}

fn page_args(mut args: Value, page: Page) -> Value {
    if let Value::Object(map) = &mut args {
        map.insert("offset".to_string(), json!(page.offset));
        if let Some(limit) = page.limit {
            map.insert("limit".to_string(), json!(limit));
        }
    }
    args
}

// ---------------------------------------------------------------------------
// Database handles
// ---------------------------------------------------------------------------

/// A database whose concrete engine the client does not know. Every behavior
/// fails immediately without touching the channel.
#[derive(Debug, Clone)]
pub struct UnresolvedDatabase {
    id: ObjectId,
}

impl UnresolvedDatabase {
    pub fn new(id: impl Into<ObjectId>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &ObjectId {
        &self.id
    }
}

/// A client's view of a database object.
#[derive(Clone)]
pub enum DatabaseHandle {
    Remote(RemoteDatabaseProxy),
    Unresolved(UnresolvedDatabase),
}

impl DatabaseHandle {
    pub fn id(&self) -> &ObjectId {
        match self {
            DatabaseHandle::Remote(p) => p.id(),
            DatabaseHandle::Unresolved(u) => u.id(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, DatabaseHandle::Remote(_))
    }
}

fn not_implemented<T>(method: &'static str) -> Result<T> {
    Err(ClientError::NotImplemented { method })
}

#[async_trait]
impl RemoteCatalogue for DatabaseHandle {
    async fn load_table_list(&self) -> Result<Vec<TableDescriptor>> {
        match self {
            DatabaseHandle::Remote(p) => p.load_table_list().await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_table_list"),
        }
    }

    async fn load_table_info(&self, table: &str) -> Result<Vec<ColumnDef>> {
        match self {
            DatabaseHandle::Remote(p) => p.load_table_info(table).await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_table_info"),
        }
    }

    async fn load_rows_count(&self, table: &str) -> Result<u64> {
        match self {
            DatabaseHandle::Remote(p) => p.load_rows_count(table).await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_rows_count"),
        }
    }

    async fn create_table(&self, table: &str, columns: Vec<ColumnDef>) -> Result<TableDescriptor> {
        match self {
            DatabaseHandle::Remote(p) => p.create_table(table, columns).await,
            DatabaseHandle::Unresolved(_) => not_implemented("create_table"),
        }
    }

    async fn create_temp_table(&self, columns: Vec<ColumnDef>) -> Result<TempTableInfo> {
        match self {
            DatabaseHandle::Remote(p) => p.create_temp_table(columns).await,
            DatabaseHandle::Unresolved(_) => not_implemented("create_temp_table"),
        }
    }

    async fn delete_table(&self, table: &str) -> Result<()> {
        match self {
            DatabaseHandle::Remote(p) => p.delete_table(table).await,
            DatabaseHandle::Unresolved(_) => not_implemented("delete_table"),
        }
    }

    async fn create_subtable(&self, source: &str, spec: SubtableSpec) -> Result<TableDescriptor> {
        match self {
            DatabaseHandle::Remote(p) => p.create_subtable(source, spec).await,
            DatabaseHandle::Unresolved(_) => not_implemented("create_subtable"),
        }
    }
}

#[async_trait]
impl RemoteDataAccess for DatabaseHandle {
    async fn load_table_data(&self, table: &str, page: Page) -> Result<TableData> {
        match self {
            DatabaseHandle::Remote(p) => p.load_table_data(table, page).await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_table_data"),
        }
    }

    async fn load_aggr_data(
        &self,
        table: &str,
        aggregation: &Aggregation,
        page: Page,
    ) -> Result<AggrData> {
        match self {
            DatabaseHandle::Remote(p) => p.load_aggr_data(table, aggregation, page).await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_aggr_data"),
        }
    }

    async fn load_cells(&self, table: &str, columns: &[String], page: Page) -> Result<Cells> {
        match self {
            DatabaseHandle::Remote(p) => p.load_cells(table, columns, page).await,
            DatabaseHandle::Unresolved(_) => not_implemented("load_cells"),
        }
    }

    async fn get_num_stats(&self, table: &str, column: &str) -> Result<NumStats> {
        match self {
            DatabaseHandle::Remote(p) => p.get_num_stats(table, column).await,
            DatabaseHandle::Unresolved(_) => not_implemented("get_num_stats"),
        }
    }

    async fn push_cells(
        &self,
        table: &str,
        columns: &[String],
        rows: Vec<Vec<Value>>,
    ) -> Result<PushOutcome> {
        match self {
            DatabaseHandle::Remote(p) => p.push_cells(table, columns, rows).await,
            DatabaseHandle::Unresolved(_) => not_implemented("push_cells"),
        }
    }

    async fn push_data(&self, table: &str, rows: Vec<Map<String, Value>>) -> Result<PushOutcome> {
        match self {
            DatabaseHandle::Remote(p) => p.push_data(table, rows).await,
            DatabaseHandle::Unresolved(_) => not_implemented("push_data"),
        }
    }

    async fn update_data(
        &self,
        table: &str,
        row_id: u64,
        values: Map<String, Value>,
    ) -> Result<()> {
        match self {
            DatabaseHandle::Remote(p) => p.update_data(table, row_id, values).await,
            DatabaseHandle::Unresolved(_) => not_implemented("update_data"),
        }
    }

    async fn delete_data(&self, table: &str, selector: RowSelector) -> Result<usize> {
        match self {
            DatabaseHandle::Remote(p) => p.delete_data(table, selector).await,
            DatabaseHandle::Unresolved(_) => not_implemented("delete_data"),
        }
    }
}
