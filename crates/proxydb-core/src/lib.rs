//! # ProxyDB core
//!
//! Server-side model for transparent remote objects backed by a table engine.
//!
//! Objects such as [`object::Connection`] and [`object::RemoteDatabase`] live
//! in an [`registry::ObjectRegistry`]. Their fields are described by a
//! [`schema::SchemaRegistry`], replicated to clients as snapshots and field
//! updates, and persisted through [`store::StateFile`]. Table operations on a
//! `RemoteDatabase` resolve to an [`engine::Engine`] opened by the
//! connection it references.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use proxydb_core::engine::{MemoryConnector, MemoryEngine, TableCatalogue};
//! use proxydb_core::object::{Connection, RemoteDatabase};
//! use proxydb_core::registry::ObjectRegistry;
//! use proxydb_core::types::{ColumnDef, ColumnType};
//!
//! let connector = MemoryConnector::new(Arc::new(MemoryEngine::new()));
//! let registry = ObjectRegistry::new(Arc::new(connector));
//!
//! registry.insert_connection(Connection::new("conn")).unwrap();
//! registry
//!     .insert_database(RemoteDatabase::new("main", "main", Some("conn".into())))
//!     .unwrap();
//! registry.reconnect(&"conn".into()).unwrap();
//!
//! let session = registry.database_session(&"main".into()).unwrap();
//! session
//!     .engine
//!     .create_table(&session.database, "users", vec![ColumnDef::new("name", ColumnType::Text)])
//!     .unwrap();
//! ```

pub mod engine;
pub mod error;
pub mod filter;
pub mod object;
pub mod registry;
pub mod schema;
pub mod store;
pub mod types;
