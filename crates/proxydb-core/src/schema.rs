//! Schema registry: per-type declarative field descriptions.
//!
//! Each synchronized object type declares its fields with a primitive kind and
//! a mutability. Types compose by single inheritance; `describe` returns the
//! merged field map with parent fields first, in declaration order. A subtype
//! may add fields and may tighten a writable field to const, but it can never
//! drop a field, change its kind, or make an inherited const field writable.

use std::collections::HashMap;

use serde::Serialize;

use crate::error::SchemaError;

pub const SYNC_OBJECT: &str = "SyncObject";
pub const CONNECTION: &str = "Connection";
pub const DATABASE: &str = "Database";
pub const REMOTE_DATABASE: &str = "RemoteDatabase";

/// Primitive kind of a replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Boolean,
    ObjectRef,
}

impl FieldKind {
    /// Whether a wire value has the right shape for this kind. Range and
    /// finiteness checks belong to the object's setter.
    pub fn admits(self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Integer, Value::Number(_)) => true,
            (FieldKind::Boolean, Value::Bool(_)) => true,
            (FieldKind::ObjectRef, Value::String(_) | Value::Null) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mutability {
    /// Replicated both ways.
    Writable,
    /// Replicated server→client only; set by server logic.
    Const,
    /// Accepted client→server only; never serialized outbound.
    WriteOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub mutability: Mutability,
}

impl FieldSpec {
    pub fn is_replicated(&self) -> bool {
        self.mutability != Mutability::WriteOnly
    }

    pub fn accepts_inbound(&self) -> bool {
        self.mutability != Mutability::Const
    }
}

/// Merged, ordered field descriptions for one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FieldMap {
    fields: Vec<(String, FieldSpec)>,
}

impl FieldMap {
    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(n, spec)| (n.as_str(), spec))
    }

    /// Names of fields sent server→client.
    pub fn replicated(&self) -> impl Iterator<Item = &str> {
        self.iter()
            .filter(|(_, spec)| spec.is_replicated())
            .map(|(n, _)| n)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn upsert(&mut self, name: &str, spec: FieldSpec) {
        match self.fields.iter_mut().find(|(n, _)| n == name) {
            Some((_, existing)) => *existing = spec,
            None => self.fields.push((name.to_string(), spec)),
        }
    }
}

/// Declaration of one object type's own fields.
#[derive(Debug, Clone)]
pub struct TypeSchema {
    name: String,
    parent: Option<String>,
    fields: Vec<(String, FieldSpec)>,
}

impl TypeSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            fields: Vec::new(),
        }
    }

    pub fn extends(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn field(mut self, name: &str, kind: FieldKind, mutability: Mutability) -> Self {
        self.fields
            .push((name.to_string(), FieldSpec { kind, mutability }));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry of object types, resolved into merged field maps on registration.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    types: HashMap<String, (Option<String>, FieldMap)>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in connection and database types.
    pub fn builtin() -> Self {
        use FieldKind::*;
        use Mutability::*;

        let mut registry = Self::new();
        let types = [
            TypeSchema::new(SYNC_OBJECT),
            TypeSchema::new(CONNECTION)
                .extends(SYNC_OBJECT)
                .field("host", String, Writable)
                .field("port", Integer, Writable)
                .field("user", String, Writable)
                .field("password", String, WriteOnly)
                .field("connected", Boolean, Const),
            TypeSchema::new(DATABASE).extends(SYNC_OBJECT),
            TypeSchema::new(REMOTE_DATABASE)
                .extends(DATABASE)
                .field("database", String, Const)
                .field("connection", ObjectRef, Writable),
        ];
        for schema in types {
            registry
                .register(schema)
                .expect("built-in object types must register");
        }
        registry
    }

    /// Register a type, merging its fields over its parent's.
    pub fn register(&mut self, schema: TypeSchema) -> Result<(), SchemaError> {
        if self.types.contains_key(&schema.name) {
            return Err(SchemaError::DuplicateType(schema.name));
        }

        let mut merged = match &schema.parent {
            Some(parent) => self.describe(parent)?.clone(),
            None => FieldMap::default(),
        };

        for (name, spec) in &schema.fields {
            if let Some(inherited) = merged.get(name) {
                if inherited.kind != spec.kind {
                    return Err(SchemaError::KindChanged {
                        type_name: schema.name.clone(),
                        field: name.clone(),
                    });
                }
                if inherited.mutability == Mutability::Const && spec.mutability != Mutability::Const
                {
                    return Err(SchemaError::ConstWeakened {
                        type_name: schema.name.clone(),
                        field: name.clone(),
                    });
                }
            }
            merged.upsert(name, *spec);
        }

        self.types.insert(schema.name, (schema.parent, merged));
        Ok(())
    }

    /// Merged field map of a registered type.
    pub fn describe(&self, type_name: &str) -> Result<&FieldMap, SchemaError> {
        self.types
            .get(type_name)
            .map(|(_, fields)| fields)
            .ok_or_else(|| SchemaError::UnknownType(type_name.to_string()))
    }

    /// Whether `type_name` is `ancestor` or inherits from it.
    pub fn is_a(&self, type_name: &str, ancestor: &str) -> bool {
        let mut current = Some(type_name);
        while let Some(name) = current {
            if name == ancestor {
                return true;
            }
            current = self
                .types
                .get(name)
                .and_then(|(parent, _)| parent.as_deref());
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registers_every_type() {
        let registry = SchemaRegistry::builtin();
        for name in [SYNC_OBJECT, CONNECTION, DATABASE, REMOTE_DATABASE] {
            assert!(registry.describe(name).is_ok(), "{name} missing");
        }
    }

    #[test]
    fn test_builtin_connection_fields() {
        let registry = SchemaRegistry::builtin();
        let fields = registry.describe(CONNECTION).unwrap();
        let names: Vec<&str> = fields.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["host", "port", "user", "password", "connected"]);

        let replicated: Vec<&str> = fields.replicated().collect();
        assert_eq!(replicated, vec!["host", "port", "user", "connected"]);
        assert!(!fields.get("connected").unwrap().accepts_inbound());
        assert!(fields.get("password").unwrap().accepts_inbound());
    }

    #[test]
    fn test_subtype_extends_parent() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.describe(DATABASE).unwrap().is_empty());
        let remote = registry.describe(REMOTE_DATABASE).unwrap();
        assert_eq!(remote.len(), 2);
        assert_eq!(remote.get("database").unwrap().mutability, Mutability::Const);
        assert!(registry.is_a(REMOTE_DATABASE, DATABASE));
        assert!(registry.is_a(REMOTE_DATABASE, SYNC_OBJECT));
        assert!(!registry.is_a(CONNECTION, DATABASE));
    }

    #[test]
    fn test_subtype_cannot_weaken_const() {
        let mut registry = SchemaRegistry::builtin();
        let result = registry.register(
            TypeSchema::new("MysqlConnection").extends(CONNECTION).field(
                "connected",
                FieldKind::Boolean,
                Mutability::Writable,
            ),
        );
        assert!(matches!(result, Err(SchemaError::ConstWeakened { .. })));
        assert!(registry.describe("MysqlConnection").is_err());
    }

    #[test]
    fn test_subtype_may_tighten_and_add() {
        let mut registry = SchemaRegistry::builtin();
        registry
            .register(
                TypeSchema::new("PinnedConnection")
                    .extends(CONNECTION)
                    .field("host", FieldKind::String, Mutability::Const)
                    .field("charset", FieldKind::String, Mutability::Writable),
            )
            .unwrap();
        let fields = registry.describe("PinnedConnection").unwrap();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields.get("host").unwrap().mutability, Mutability::Const);
        assert_eq!(
            fields.get("connected").unwrap().mutability,
            Mutability::Const
        );
    }

    #[test]
    fn test_kind_change_rejected() {
        let mut registry = SchemaRegistry::builtin();
        let result = registry.register(TypeSchema::new("Odd").extends(CONNECTION).field(
            "port",
            FieldKind::String,
            Mutability::Writable,
        ));
        assert!(matches!(result, Err(SchemaError::KindChanged { .. })));
    }

    #[test]
    fn test_unknown_parent_and_duplicate() {
        let mut registry = SchemaRegistry::builtin();
        assert!(matches!(
            registry.register(TypeSchema::new("X").extends("Nope")),
            Err(SchemaError::UnknownType(_))
        ));
        assert!(matches!(
            registry.register(TypeSchema::new(CONNECTION)),
            Err(SchemaError::DuplicateType(_))
        ));
    }

    #[test]
    fn test_field_kind_admits() {
        use serde_json::json;
        assert!(FieldKind::Integer.admits(&json!(3.7)));
        assert!(!FieldKind::Integer.admits(&json!("3")));
        assert!(FieldKind::ObjectRef.admits(&serde_json::Value::Null));
        assert!(!FieldKind::Boolean.admits(&json!(1)));
    }
}
