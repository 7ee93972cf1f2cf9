use serde_json::Value;

use super::{Mutation, Synchronized};
use crate::schema::REMOTE_DATABASE;
use crate::types::ObjectId;

/// A named database reached through a shared [`Connection`](super::Connection).
///
/// The database name is fixed at construction; pointing at another database
/// means creating another `RemoteDatabase`. The connection is referenced by
/// id and never owned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteDatabase {
    id: ObjectId,
    database: String,
    connection: Option<ObjectId>,
}

impl RemoteDatabase {
    pub fn new(
        id: impl Into<ObjectId>,
        database: impl Into<String>,
        connection: Option<ObjectId>,
    ) -> Self {
        Self {
            id: id.into(),
            database: database.into(),
            connection,
        }
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn connection(&self) -> Option<&ObjectId> {
        self.connection.as_ref()
    }

    pub fn set_connection(&mut self, connection: Option<ObjectId>) -> Mutation {
        if self.connection == connection {
            return Mutation::unchanged();
        }
        self.connection = connection;
        Mutation::changed("connection")
    }
}

impl Synchronized for RemoteDatabase {
    const TYPE_NAME: &'static str = REMOTE_DATABASE;

    fn id(&self) -> &ObjectId {
        &self.id
    }

    fn field(&self, name: &str) -> Option<Value> {
        match name {
            "database" => Some(Value::from(self.database.as_str())),
            "connection" => Some(match &self.connection {
                Some(id) => Value::from(id.as_str()),
                None => Value::Null,
            }),
            _ => None,
        }
    }

    fn write_field(&mut self, name: &str, value: &Value) -> Mutation {
        match (name, value) {
            ("connection", Value::String(s)) if s.is_empty() => self.set_connection(None),
            ("connection", Value::String(s)) => self.set_connection(Some(ObjectId::new(s.as_str()))),
            ("connection", Value::Null) => self.set_connection(None),
            _ => Mutation::rejected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_connection_reference() {
        let mut db = RemoteDatabase::new("d1", "sales", None);
        assert_eq!(db.connection(), None);
        assert!(db.set_connection(Some("c1".into())).is_changed());
        assert!(!db.set_connection(Some("c1".into())).is_changed());
        assert_eq!(db.field("connection"), Some(json!("c1")));
        assert!(db.write_field("connection", &Value::Null).is_changed());
        assert_eq!(db.field("connection"), Some(Value::Null));
    }

    #[test]
    fn test_database_name_not_writable() {
        let mut db = RemoteDatabase::new("d1", "sales", None);
        assert!(!db.write_field("database", &json!("hr")).is_accepted());
        assert_eq!(db.database(), "sales");
    }
}
