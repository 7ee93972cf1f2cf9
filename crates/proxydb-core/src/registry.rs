//! Object registry: the server's authoritative set of synchronized objects.
//!
//! Objects live inside [`Holder`]s. Every accepted change to a replicated
//! field is published as a [`FieldUpdate`] on a broadcast channel, and every
//! change leaves the object dirty until the next
//! [`ObjectRegistry::take_dirty`]. Table operations resolve a
//! `RemoteDatabase` to the engine of its connection and run after the
//! registry lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::engine::{Connector, Engine};
use crate::error::{Error, ObjectError, SchemaError};
use crate::object::{
    Connection, FieldUpdate, Holder, Mutation, RemoteDatabase, Snapshot, Synchronized,
    inbound_write, replicated_values, snapshot,
};
use crate::schema::{CONNECTION, REMOTE_DATABASE, SchemaRegistry};
use crate::store::PersistedObject;
use crate::types::ObjectId;

/// Capacity of the field update broadcast channel.
const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// A registered server-side object.
#[derive(Debug)]
pub enum ServerObject {
    Connection(Holder<Connection>),
    RemoteDatabase(Holder<RemoteDatabase>),
}

impl ServerObject {
    pub fn type_name(&self) -> &'static str {
        match self {
            ServerObject::Connection(_) => CONNECTION,
            ServerObject::RemoteDatabase(_) => REMOTE_DATABASE,
        }
    }

    fn take_dirty(&mut self) -> bool {
        match self {
            ServerObject::Connection(h) => h.take_dirty(),
            ServerObject::RemoteDatabase(h) => h.take_dirty(),
        }
    }
}

struct Entry {
    object: ServerObject,
    /// Live engine session; only set for connected `Connection` objects.
    engine: Option<Arc<dyn Engine>>,
}

/// What a table operation needs once its database has been resolved.
#[derive(Clone)]
pub struct DatabaseSession {
    pub database: String,
    pub engine: Arc<dyn Engine>,
}

pub struct ObjectRegistry {
    schemas: SchemaRegistry,
    connector: Arc<dyn Connector>,
    objects: RwLock<BTreeMap<ObjectId, Entry>>,
    updates: broadcast::Sender<FieldUpdate>,
    /// Version of the last published update. Only advanced under the
    /// `objects` write lock.
    version: AtomicU64,
    /// Set when state changed outside any holder: a removal, or a save that
    /// failed after the holders' marks were taken.
    stale: AtomicBool,
}

impl ObjectRegistry {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            schemas: SchemaRegistry::builtin(),
            connector,
            objects: RwLock::new(BTreeMap::new()),
            updates,
            version: AtomicU64::new(0),
            stale: AtomicBool::new(false),
        }
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    /// Receive every field update published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<FieldUpdate> {
        self.updates.subscribe()
    }

    // -----------------------------------------------------------------------
    // Object lifecycle
    // -----------------------------------------------------------------------

    pub fn insert_connection(&self, connection: Connection) -> Result<Snapshot, Error> {
        self.insert(ServerObject::Connection(Holder::created(connection)))
    }

    pub fn insert_database(&self, database: RemoteDatabase) -> Result<Snapshot, Error> {
        self.insert(ServerObject::RemoteDatabase(Holder::created(database)))
    }

    fn insert(&self, object: ServerObject) -> Result<Snapshot, Error> {
        let mut objects = self.objects.write();
        let id = match &object {
            ServerObject::Connection(h) => h.get().id().clone(),
            ServerObject::RemoteDatabase(h) => h.get().id().clone(),
        };
        if objects.contains_key(&id) {
            return Err(ObjectError::AlreadyExists(id.to_string()).into());
        }
        let snap = self.snapshot_of(&object)?;
        info!(object = %id, type_name = object.type_name(), "object registered");
        objects.insert(
            id,
            Entry {
                object,
                engine: None,
            },
        );
        Ok(snap)
    }

    /// Create an object from a type name and initial field values, as a
    /// client would. A `RemoteDatabase` takes its const `database` name here;
    /// every other field goes through the normal inbound write path.
    pub fn create(
        &self,
        type_name: &str,
        id: Option<ObjectId>,
        mut fields: Map<String, Value>,
    ) -> Result<Snapshot, Error> {
        let id = match id {
            Some(id) => id,
            None => self.fresh_id(type_name),
        };
        let object = match type_name {
            CONNECTION => {
                let mut conn = Connection::new(id);
                let schema = self.schemas.describe(CONNECTION)?;
                for (name, value) in &fields {
                    if !inbound_write(&mut conn, schema, name, value).is_accepted() {
                        return Err(invalid_field(name, value));
                    }
                }
                ServerObject::Connection(Holder::created(conn))
            }
            REMOTE_DATABASE => {
                let name = match fields.remove("database") {
                    Some(Value::String(s)) if !s.is_empty() => s,
                    Some(other) => return Err(invalid_field("database", &other)),
                    None => {
                        return Err(ObjectError::InvalidField {
                            field: "database".to_string(),
                            reason: "required".to_string(),
                        }
                        .into());
                    }
                };
                let mut db = RemoteDatabase::new(id, name, None);
                let schema = self.schemas.describe(REMOTE_DATABASE)?;
                for (name, value) in &fields {
                    if !inbound_write(&mut db, schema, name, value).is_accepted() {
                        return Err(invalid_field(name, value));
                    }
                }
                ServerObject::RemoteDatabase(Holder::created(db))
            }
            other => return Err(SchemaError::UnknownType(other.to_string()).into()),
        };
        self.insert(object)
    }

    fn fresh_id(&self, type_name: &str) -> ObjectId {
        let objects = self.objects.read();
        let prefix = type_name.to_lowercase();
        (1..)
            .map(|n| ObjectId::new(format!("{prefix}-{n}")))
            .find(|id| !objects.contains_key(id))
            .unwrap_or_else(|| ObjectId::new(prefix))
    }

    /// Remove an object. Databases referencing a removed connection keep the
    /// dangling reference and report "not connected".
    pub fn remove(&self, id: &ObjectId) -> Result<(), Error> {
        let removed = self.objects.write().remove(id);
        match removed {
            Some(entry) => {
                self.stale.store(true, Ordering::SeqCst);
                info!(object = %id, type_name = entry.object.type_name(), "object removed");
                Ok(())
            }
            None => Err(ObjectError::NotFound(id.to_string()).into()),
        }
    }

    pub fn snapshot(&self, id: &ObjectId) -> Result<Snapshot, Error> {
        let objects = self.objects.read();
        let entry = objects
            .get(id)
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
        self.snapshot_of(&entry.object)
    }

    pub fn list(&self) -> Result<Vec<Snapshot>, Error> {
        let objects = self.objects.read();
        objects
            .values()
            .map(|entry| self.snapshot_of(&entry.object))
            .collect()
    }

    fn snapshot_of(&self, object: &ServerObject) -> Result<Snapshot, Error> {
        let schema = self.schemas.describe(object.type_name())?;
        let mut snap = match object {
            ServerObject::Connection(h) => snapshot(h.get(), schema),
            ServerObject::RemoteDatabase(h) => snapshot(h.get(), schema),
        };
        snap.version = self.version.load(Ordering::SeqCst);
        Ok(snap)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Apply an inbound client write through the object's holder.
    pub fn write_field(&self, id: &ObjectId, field: &str, value: &Value) -> Result<Mutation, Error> {
        self.edit(id, |object, schemas| {
            let schema = schemas.describe(object.type_name())?;
            Ok(match object {
                ServerObject::Connection(h) => h.edit(|c| inbound_write(c, schema, field, value)),
                ServerObject::RemoteDatabase(h) => {
                    h.edit(|d| inbound_write(d, schema, field, value))
                }
            })
        })
    }

    /// Run `f` against one object under the write lock and publish whatever
    /// replicated fields it changed.
    fn edit<F>(&self, id: &ObjectId, f: F) -> Result<Mutation, Error>
    where
        F: FnOnce(&mut ServerObject, &SchemaRegistry) -> Result<Mutation, Error>,
    {
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(id)
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
        let mutation = f(&mut entry.object, &self.schemas)?;
        if mutation.is_changed() {
            self.publish(id, &entry.object, &mutation)?;
        }
        Ok(mutation)
    }

    fn publish(&self, id: &ObjectId, object: &ServerObject, mutation: &Mutation) -> Result<(), Error> {
        let schema = self.schemas.describe(object.type_name())?;
        let names = mutation.fields().iter().copied();
        let fields = match object {
            ServerObject::Connection(h) => replicated_values(h.get(), schema, names),
            ServerObject::RemoteDatabase(h) => replicated_values(h.get(), schema, names),
        };
        debug!(object = %id, changed = ?mutation.fields(), "object changed");
        if fields.is_empty() {
            return Ok(());
        }
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        // No receivers just means no client is listening.
        let _ = self.updates.send(FieldUpdate {
            object_id: id.clone(),
            version,
            fields,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Connection behavior
    // -----------------------------------------------------------------------

    /// Connect using the connection's current parameters. On failure the
    /// connection is left disconnected and the connector's error returned.
    pub fn reconnect(&self, id: &ObjectId) -> Result<Snapshot, Error> {
        let params = {
            let objects = self.objects.read();
            let entry = objects
                .get(id)
                .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
            match &entry.object {
                ServerObject::Connection(h) => h.get().connect_params(),
                other => return Err(wrong_type(id, CONNECTION, other)),
            }
        };

        let result = self.connector.connect(&params);
        let connected = result.is_ok();
        let engine = match result {
            Ok(engine) => Some(engine),
            Err(e) => {
                warn!(object = %id, host = %params.host, port = params.port, error = %e, "connect failed");
                None
            }
        };

        self.set_session(id, engine)?;
        if !connected {
            return Err(ObjectError::NotConnected(format!(
                "connection '{id}' could not reach {}:{}",
                params.host, params.port
            ))
            .into());
        }
        info!(object = %id, host = %params.host, port = params.port, "connected");
        self.snapshot(id)
    }

    pub fn disconnect(&self, id: &ObjectId) -> Result<Snapshot, Error> {
        self.set_session(id, None)?;
        info!(object = %id, "disconnected");
        self.snapshot(id)
    }

    fn set_session(&self, id: &ObjectId, engine: Option<Arc<dyn Engine>>) -> Result<(), Error> {
        let mut objects = self.objects.write();
        let entry = objects
            .get_mut(id)
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
        let connected = engine.is_some();
        let mutation = match &mut entry.object {
            ServerObject::Connection(holder) => holder.edit(|c| c.set_connected(connected)),
            other => return Err(wrong_type(id, CONNECTION, other)),
        };
        entry.engine = engine;
        if mutation.is_changed() {
            self.publish(id, &entry.object, &mutation)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Database resolution
    // -----------------------------------------------------------------------

    /// Resolve a `RemoteDatabase` to its name and its connection's engine.
    ///
    /// Fails with `NotConnected` while the reference is unset, dangling, or
    /// the connection is down.
    pub fn database_session(&self, id: &ObjectId) -> Result<DatabaseSession, Error> {
        let objects = self.objects.read();
        let entry = objects
            .get(id)
            .ok_or_else(|| ObjectError::NotFound(id.to_string()))?;
        let ServerObject::RemoteDatabase(holder) = &entry.object else {
            return Err(wrong_type(id, REMOTE_DATABASE, &entry.object));
        };
        let db = holder.get();

        let conn_id = db.connection().ok_or_else(|| {
            ObjectError::NotConnected(format!("database '{id}' has no connection"))
        })?;
        let engine = objects
            .get(conn_id)
            .and_then(|conn| match &conn.object {
                ServerObject::Connection(h) if h.get().connected() => conn.engine.clone(),
                _ => None,
            })
            .ok_or_else(|| {
                ObjectError::NotConnected(format!("connection '{conn_id}' is not connected"))
            })?;

        Ok(DatabaseSession {
            database: db.database().to_string(),
            engine,
        })
    }

    /// Type name of a registered object.
    pub fn type_of(&self, id: &ObjectId) -> Result<&'static str, Error> {
        let objects = self.objects.read();
        objects
            .get(id)
            .map(|entry| entry.object.type_name())
            .ok_or_else(|| ObjectError::NotFound(id.to_string()).into())
    }

    // -----------------------------------------------------------------------
    // Persistence
    // -----------------------------------------------------------------------

    /// Clear every dirty mark, returning whether anything changed since the
    /// last call.
    pub fn take_dirty(&self) -> bool {
        let mut objects = self.objects.write();
        let mut any = self.stale.swap(false, Ordering::SeqCst);
        for entry in objects.values_mut() {
            any |= entry.object.take_dirty();
        }
        any
    }

    /// Force the next [`take_dirty`](Self::take_dirty) to report a change,
    /// e.g. after a save of the taken state failed.
    pub fn mark_dirty(&self) {
        self.stale.store(true, Ordering::SeqCst);
    }

    /// Every object's persistable state, including write-only fields.
    pub fn persisted(&self) -> Vec<PersistedObject> {
        let objects = self.objects.read();
        objects
            .values()
            .map(|entry| match &entry.object {
                ServerObject::Connection(h) => {
                    let c = h.get();
                    let mut fields = Map::new();
                    fields.insert("host".to_string(), Value::from(c.host()));
                    fields.insert("port".to_string(), Value::from(c.port()));
                    fields.insert("user".to_string(), Value::from(c.user()));
                    let mut secrets = Map::new();
                    secrets.insert("password".to_string(), Value::from(c.password()));
                    PersistedObject {
                        type_name: CONNECTION.to_string(),
                        id: c.id().clone(),
                        fields,
                        secrets,
                    }
                }
                ServerObject::RemoteDatabase(h) => {
                    let d = h.get();
                    let mut fields = Map::new();
                    fields.insert("database".to_string(), Value::from(d.database()));
                    if let Some(conn) = d.connection() {
                        fields.insert("connection".to_string(), Value::from(conn.as_str()));
                    }
                    PersistedObject {
                        type_name: REMOTE_DATABASE.to_string(),
                        id: d.id().clone(),
                        fields,
                        secrets: Map::new(),
                    }
                }
            })
            .collect()
    }

    /// Recreate objects from persisted state. Connections come back
    /// disconnected.
    pub fn restore(&self, saved: Vec<PersistedObject>) -> Result<usize, Error> {
        let mut count = 0;
        for obj in saved {
            let mut fields = obj.fields;
            fields.extend(obj.secrets);
            self.create(&obj.type_name, Some(obj.id), fields)?;
            count += 1;
        }
        self.take_dirty();
        Ok(count)
    }
}

fn wrong_type(id: &ObjectId, expected: &'static str, actual: &ServerObject) -> Error {
    ObjectError::WrongType {
        id: id.to_string(),
        expected,
        actual: actual.type_name(),
    }
    .into()
}

fn invalid_field(field: &str, value: &Value) -> Error {
    ObjectError::InvalidField {
        field: field.to_string(),
        reason: format!("value {value} rejected"),
    }
    .into()
}
