//! Synchronized objects: server-resident entities whose schema-declared
//! fields are replicated to clients.
//!
//! Setters never touch shared infrastructure. They return a [`Mutation`]
//! describing what changed, and the [`Holder`] that owns the object turns an
//! accepted change into a dirty mark and a [`FieldUpdate`] broadcast.

mod connection;
mod database;

pub use connection::{ConnectParams, Connection};
pub use database::RemoteDatabase;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::schema::{FieldMap, Mutability};
use crate::types::ObjectId;

/// Outcome of a setter call.
///
/// `accepted == false` means the input was invalid and the previous value was
/// kept. An accepted mutation with no changed fields was a same-value write.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mutation {
    accepted: bool,
    changed: Vec<&'static str>,
}

impl Mutation {
    pub fn changed(field: &'static str) -> Self {
        Self {
            accepted: true,
            changed: vec![field],
        }
    }

    pub fn unchanged() -> Self {
        Self {
            accepted: true,
            changed: Vec::new(),
        }
    }

    pub fn rejected() -> Self {
        Self {
            accepted: false,
            changed: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn is_changed(&self) -> bool {
        !self.changed.is_empty()
    }

    pub fn fields(&self) -> &[&'static str] {
        &self.changed
    }

    /// Combine two mutations applied in sequence.
    pub fn merge(mut self, other: Mutation) -> Self {
        self.accepted &= other.accepted;
        for field in other.changed {
            if !self.changed.contains(&field) {
                self.changed.push(field);
            }
        }
        self
    }
}

/// A server-resident object with an identity and schema-declared fields.
pub trait Synchronized {
    /// Name the type is registered under in the schema registry.
    const TYPE_NAME: &'static str;

    fn id(&self) -> &ObjectId;

    /// Current wire value of a field, including write-only ones.
    fn field(&self, name: &str) -> Option<Value>;

    /// Apply an inbound write to a client-writable field. Callers must have
    /// checked the field's mutability; see [`inbound_write`].
    fn write_field(&mut self, name: &str, value: &Value) -> Mutation;
}

/// Serialized replicated state of one object.
///
/// `version` is the registry's update sequence at the time the snapshot was
/// taken: it reflects every [`FieldUpdate`] with a version up to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub type_name: String,
    pub id: ObjectId,
    #[serde(default)]
    pub version: u64,
    pub fields: Map<String, Value>,
}

/// Replicated field values pushed to clients after an accepted change.
/// Versions increase across the whole registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub object_id: ObjectId,
    #[serde(default)]
    pub version: u64,
    pub fields: Map<String, Value>,
}

/// Serialize the replicated fields of `object` per its schema.
pub fn snapshot<T: Synchronized>(object: &T, schema: &FieldMap) -> Snapshot {
    Snapshot {
        type_name: T::TYPE_NAME.to_string(),
        id: object.id().clone(),
        version: 0,
        fields: replicated_values(object, schema, schema.replicated()),
    }
}

/// Collect the wire values of the named fields, skipping non-replicated ones.
pub fn replicated_values<'a, T: Synchronized>(
    object: &T,
    schema: &FieldMap,
    names: impl IntoIterator<Item = &'a str>,
) -> Map<String, Value> {
    let mut out = Map::new();
    for name in names {
        if !schema.get(name).is_some_and(|spec| spec.is_replicated()) {
            continue;
        }
        if let Some(value) = object.field(name) {
            out.insert(name.to_string(), value);
        }
    }
    out
}

/// Validate and apply a client write. Unknown fields, const fields, and
/// values of the wrong kind are rejected without touching the object.
pub fn inbound_write<T: Synchronized>(
    object: &mut T,
    schema: &FieldMap,
    field: &str,
    value: &Value,
) -> Mutation {
    let Some(spec) = schema.get(field) else {
        warn!(object = %object.id(), field, "write to unknown field rejected");
        return Mutation::rejected();
    };
    if spec.mutability == Mutability::Const {
        warn!(object = %object.id(), field, "write to const field rejected");
        return Mutation::rejected();
    }
    if !spec.kind.admits(value) {
        return Mutation::rejected();
    }
    object.write_field(field, value)
}

/// Exclusive owner of a server-side object: the write gate.
///
/// The only mutable access is [`Holder::edit`], so every change is observed
/// and marks the object dirty.
#[derive(Debug)]
pub struct Holder<T> {
    object: T,
    dirty: bool,
}

impl<T: Synchronized> Holder<T> {
    pub fn new(object: T) -> Self {
        Self {
            object,
            dirty: false,
        }
    }

    /// Wrap an object that has never been persisted.
    pub fn created(object: T) -> Self {
        Self {
            object,
            dirty: true,
        }
    }

    pub fn get(&self) -> &T {
        &self.object
    }

    pub fn edit<F>(&mut self, f: F) -> Mutation
    where
        F: FnOnce(&mut T) -> Mutation,
    {
        let mutation = f(&mut self.object);
        if mutation.is_changed() {
            self.dirty = true;
        }
        mutation
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clear the dirty mark, returning whether it was set.
    pub fn take_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CONNECTION, REMOTE_DATABASE, SchemaRegistry};
    use serde_json::json;

    #[test]
    fn test_mutation_merge() {
        let m = Mutation::changed("host")
            .merge(Mutation::unchanged())
            .merge(Mutation::changed("host"))
            .merge(Mutation::changed("port"));
        assert!(m.is_accepted());
        assert_eq!(m.fields(), &["host", "port"]);

        let m = Mutation::changed("host").merge(Mutation::rejected());
        assert!(!m.is_accepted());
        assert!(m.is_changed());
    }

    #[test]
    fn test_holder_marks_dirty_only_on_change() {
        let mut holder = Holder::new(Connection::new("c1"));
        assert!(holder.edit(|c| c.set_host("localhost")).is_accepted());
        assert!(!holder.is_dirty());

        let m = holder.edit(|c| c.set_host("db.internal"));
        assert_eq!(m.fields(), &["host"]);
        assert!(holder.is_dirty());
        assert!(holder.take_dirty());
        assert!(!holder.is_dirty());
    }

    #[test]
    fn test_snapshot_skips_write_only() {
        let registry = SchemaRegistry::builtin();
        let schema = registry.describe(CONNECTION).unwrap();
        let mut conn = Connection::new("c1");
        let _ = conn.set_password("secret");

        let snap = snapshot(&conn, schema);
        assert_eq!(snap.type_name, "Connection");
        assert_eq!(snap.id, ObjectId::from("c1"));
        assert_eq!(snap.fields["port"], json!(3306));
        assert_eq!(snap.fields["connected"], json!(false));
        assert!(!snap.fields.contains_key("password"));
    }

    #[test]
    fn test_inbound_write_rejects_const_and_unknown() {
        let registry = SchemaRegistry::builtin();
        let schema = registry.describe(CONNECTION).unwrap();
        let mut conn = Connection::new("c1");

        assert!(!inbound_write(&mut conn, schema, "connected", &json!(true)).is_accepted());
        assert!(!conn.connected());
        assert!(!inbound_write(&mut conn, schema, "nope", &json!(1)).is_accepted());
        assert!(!inbound_write(&mut conn, schema, "port", &json!("80")).is_accepted());
        assert_eq!(conn.port(), 3306);

        let m = inbound_write(&mut conn, schema, "port", &json!(5432));
        assert_eq!(m.fields(), &["port"]);
        assert_eq!(conn.port(), 5432);
    }

    #[test]
    fn test_inbound_write_database_name_is_const() {
        let registry = SchemaRegistry::builtin();
        let schema = registry.describe(REMOTE_DATABASE).unwrap();
        let mut db = RemoteDatabase::new("d1", "sales", None);
        assert!(!inbound_write(&mut db, schema, "database", &json!("hr")).is_accepted());
        assert_eq!(db.database(), "sales");

        let m = inbound_write(&mut db, schema, "connection", &json!("c1"));
        assert!(m.is_changed());
        assert_eq!(db.connection(), Some(&ObjectId::from("c1")));
    }
}
