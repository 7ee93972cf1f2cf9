//! Unix domain socket server that exposes an `ObjectRegistry` to clients.
//!
//! Each connected client sends JSON-line requests and receives JSON-line
//! replies tagged with the request's `call_id`. Every request runs in its own
//! task, so slow calls never hold up others on the same socket. Field updates
//! from the registry are forwarded to every client as `update` events.

use std::future::Future;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedReadHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use proxydb_core::engine::{MemoryConnector, MemoryEngine, TableCatalogue};
use proxydb_core::error::EngineError;
use proxydb_core::object::{Connection, RemoteDatabase};
use proxydb_core::registry::{DatabaseSession, ObjectRegistry};
use proxydb_core::store::StateFile;
use proxydb_core::types::ObjectId;

use crate::config::ServerConfig;
use crate::dispatch::dispatch;
use crate::protocol::{Event, Reply, Request, Response, encode_line};

/// Default interval between flushes of dirty objects to the state file.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Id of the connection seeded into an empty registry.
pub const DEFAULT_CONNECTION_ID: &str = "conn";

/// Id and database name of the database seeded into an empty registry.
pub const DEFAULT_DATABASE_ID: &str = "main";

/// A ProxyDB server listening on a Unix socket.
pub struct ProxyServer {
    registry: Arc<ObjectRegistry>,
    socket_path: PathBuf,
    state: Option<StateFile>,
    flush_interval: Duration,
}

impl ProxyServer {
    pub fn new(registry: Arc<ObjectRegistry>, socket_path: PathBuf) -> Self {
        Self {
            registry,
            socket_path,
            state: None,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }

    /// Persist dirty objects to `state` while running and at shutdown.
    pub fn with_state(mut self, state: StateFile, flush_interval: Duration) -> Self {
        self.state = Some(state);
        self.flush_interval = flush_interval;
        self
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    /// Run the server until SIGINT or SIGTERM.
    pub async fn run(&self) -> io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run the server, accepting connections until `shutdown` completes.
    ///
    /// On startup, removes any stale socket file and binds a new one.
    /// On shutdown, flushes dirty state and removes the socket file.
    pub async fn run_until(&self, shutdown: impl Future<Output = ()>) -> io::Result<()> {
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path)?;
        }

        let listener = UnixListener::bind(&self.socket_path)?;
        info!(path = %self.socket_path.display(), "server listening");

        let accept_loop = async {
            loop {
                match listener.accept().await {
                    Ok((stream, _addr)) => {
                        let registry = self.registry.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(registry, stream).await {
                                warn!(error = %e, "connection handler error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "accept error");
                    }
                }
            }
        };

        let flush_loop = async {
            let Some(state) = &self.state else {
                return std::future::pending::<()>().await;
            };
            let mut ticker = tokio::time::interval(self.flush_interval);
            loop {
                ticker.tick().await;
                flush_state(&self.registry, state);
            }
        };

        tokio::select! {
            _ = accept_loop => {}
            _ = flush_loop => {}
            _ = shutdown => {
                info!("shutdown signal received");
            }
        }

        if let Some(state) = &self.state {
            flush_state(&self.registry, state);
        }

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file on shutdown");
            } else {
                info!(path = %self.socket_path.display(), "socket file removed");
            }
        }

        Ok(())
    }
}

/// Save every object if anything changed since the last flush.
pub fn flush_state(registry: &ObjectRegistry, state: &StateFile) {
    if !registry.take_dirty() {
        return;
    }
    let objects = registry.persisted();
    match state.save(&objects) {
        Ok(()) => debug!(objects = objects.len(), "state flushed"),
        Err(e) => {
            error!(path = %state.path().display(), error = %e, "failed to save state");
            // Retry on the next flush.
            registry.mark_dirty();
        }
    }
}

/// Build the registry for `config`: restore saved objects, or seed the
/// default `conn` connection and `main` database when there are none.
pub fn open_registry(config: &ServerConfig) -> proxydb_core::error::Result<Arc<ObjectRegistry>> {
    let engine = Arc::new(MemoryEngine::with_limits(
        config.page_size,
        config.max_temp_tables,
    ));
    let mut connector = MemoryConnector::new(engine);
    if let Some(password) = &config.password {
        connector = connector.with_password(password.clone());
    }
    let registry = Arc::new(ObjectRegistry::new(Arc::new(connector)));

    let saved = StateFile::new(&config.state_path).load()?;
    if !saved.is_empty() {
        let count = registry.restore(saved)?;
        info!(objects = count, path = %config.state_path.display(), "state restored");
        return Ok(registry);
    }

    let mut conn = Connection::new(DEFAULT_CONNECTION_ID);
    if let Some(password) = &config.password {
        let _ = conn.set_password(password);
    }
    registry.insert_connection(conn)?;
    registry.insert_database(RemoteDatabase::new(
        DEFAULT_DATABASE_ID,
        DEFAULT_DATABASE_ID,
        Some(DEFAULT_CONNECTION_ID.into()),
    ))?;
    info!(
        connection = DEFAULT_CONNECTION_ID,
        database = DEFAULT_DATABASE_ID,
        "seeded default objects"
    );
    Ok(registry)
}

/// Replies and events waiting to be written to one client. Request tasks
/// reserve a slot before they start, so a client that stops reading stops
/// being read from.
const CLIENT_QUEUE_CAPACITY: usize = 256;

/// Per-connection state that outlives individual requests.
#[derive(Default)]
struct ClientSession {
    /// Temp tables created by this client, dropped when it disconnects.
    temp_tables: Mutex<Vec<(DatabaseSession, String)>>,
}

impl ClientSession {
    fn track_temp_table(&self, registry: &ObjectRegistry, database: &ObjectId, reply: &Response) {
        let Response::Ok(ok) = reply else {
            return;
        };
        let Some(name) = ok.result.get("name").and_then(Value::as_str) else {
            return;
        };
        match registry.database_session(database) {
            Ok(session) => self.temp_tables.lock().push((session, name.to_string())),
            Err(e) => warn!(database = %database, table = name, error = %e, "temp table not tracked"),
        }
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        for (session, table) in self.temp_tables.get_mut().drain(..) {
            match session.engine.delete_table(&session.database, &table) {
                Ok(()) => debug!(database = %session.database, table, "temp table dropped"),
                // Already deleted by the client.
                Err(EngineError::TableNotFound(_)) => {}
                Err(e) => warn!(
                    database = %session.database,
                    table,
                    error = %e,
                    "failed to drop temp table"
                ),
            }
        }
    }
}

async fn handle_connection(registry: Arc<ObjectRegistry>, stream: UnixStream) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(CLIENT_QUEUE_CAPACITY);

    let writer_task = tokio::spawn(async move {
        while let Some(bytes) = rx.recv().await {
            writer.write_all(&bytes).await?;
            writer.flush().await?;
        }
        Ok::<_, io::Error>(())
    });

    let mut updates = registry.subscribe();
    let events = tx.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match updates.recv().await {
                Ok(update) => {
                    if events.send(encode_line(&Event::from(update))).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "client fell behind, updates dropped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let session = Arc::new(ClientSession::default());
    let result = read_requests(&registry, &session, reader, &tx).await;

    // In-flight request tasks hold their own permits and session handles;
    // the writer drains them and the last handle drops the temp tables.
    forwarder.abort();
    drop(tx);
    drop(session);
    match writer_task.await {
        Ok(Ok(())) => result,
        Ok(Err(e)) => result.and(Err(e)),
        Err(e) => result.and(Err(io::Error::other(e))),
    }
}

async fn read_requests(
    registry: &Arc<ObjectRegistry>,
    session: &Arc<ClientSession>,
    reader: OwnedReadHalf,
    tx: &mpsc::Sender<Vec<u8>>,
) -> io::Result<()> {
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    loop {
        line.clear();
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // Client disconnected.
            return Ok(());
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let Ok(permit) = tx.clone().reserve_owned().await else {
            // The writer failed; its error is reported by the caller.
            return Ok(());
        };
        let text = trimmed.to_string();
        let registry = registry.clone();
        let session = session.clone();
        tokio::spawn(async move {
            let reply = handle_line(&registry, &session, &text);
            permit.send(encode_line(&reply));
        });
    }
}

fn handle_line(registry: &ObjectRegistry, session: &ClientSession, text: &str) -> Reply {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            return Reply {
                call_id: None,
                response: Response::error("ParseError", e.to_string()),
            };
        }
    };
    let call_id = value.get("call_id").and_then(Value::as_u64);
    let response = match serde_json::from_value::<Request>(value) {
        Ok(req) => {
            let temp_table_in = match &req {
                Request::Invoke {
                    object_id, method, ..
                } if method == "create_temp_table" => Some(object_id.clone()),
                _ => None,
            };
            let response = dispatch(registry, req);
            if let Some(database) = temp_table_in {
                session.track_temp_table(registry, &database, &response);
            }
            response
        }
        Err(e) => Response::error("ParseError", e.to_string()),
    };
    Reply { call_id, response }
}

/// Wait for SIGINT (Ctrl-C) or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to register SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> ObjectRegistry {
        let registry = ObjectRegistry::new(Arc::new(MemoryConnector::new(Arc::new(
            MemoryEngine::new(),
        ))));
        registry.insert_connection(Connection::new("conn")).unwrap();
        registry
    }

    #[test]
    fn test_handle_line_echoes_call_id() {
        let registry = registry();
        let session = ClientSession::default();
        let reply = handle_line(
            &registry,
            &session,
            r#"{"call_id": 42, "op": "fetch", "object_id": "conn"}"#,
        );
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["call_id"], 42);
        assert_eq!(value["result"]["id"], "conn");
    }

    #[test]
    fn test_handle_line_parse_errors() {
        let registry = registry();
        let session = ClientSession::default();
        let reply = handle_line(&registry, &session, "{nope");
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["error"], "ParseError");
        assert!(value.get("call_id").is_none());

        // A known call_id is echoed even when the request itself is malformed.
        let reply = handle_line(&registry, &session, r#"{"call_id": 5, "op": "teleport"}"#);
        let value = serde_json::to_value(&reply).unwrap();
        assert_eq!(value["call_id"], 5);
        assert_eq!(value["error"], "ParseError");
    }

    #[test]
    fn test_session_drops_its_temp_tables() {
        let registry = registry();
        registry
            .insert_database(RemoteDatabase::new("main", "main", Some("conn".into())))
            .unwrap();
        registry.reconnect(&"conn".into()).unwrap();
        let create = r#"{"call_id": 1, "op": "invoke", "object_id": "main",
            "method": "create_temp_table", "args": {"columns": [{"name": "a", "type": "integer"}]}}"#;

        let session = ClientSession::default();
        let first = serde_json::to_value(handle_line(&registry, &session, create)).unwrap();
        let second = serde_json::to_value(handle_line(&registry, &session, create)).unwrap();
        let kept = first["result"]["name"].as_str().unwrap().to_string();
        let deleted = second["result"]["name"].as_str().unwrap().to_string();
        let delete = format!(
            r#"{{"call_id": 2, "op": "invoke", "object_id": "main",
                "method": "delete_table", "args": {{"table": "{deleted}"}}}}"#
        );
        let reply = serde_json::to_value(handle_line(&registry, &session, &delete)).unwrap();
        assert_eq!(reply["ok"], true);

        let db = registry.database_session(&"main".into()).unwrap();
        assert!(db.engine.load_rows_count("main", &kept).is_ok());
        drop(session);
        assert!(matches!(
            db.engine.load_rows_count("main", &kept),
            Err(EngineError::TableNotFound(_))
        ));
    }

    fn config(dir: &std::path::Path) -> ServerConfig {
        ServerConfig {
            socket_path: dir.join("test.sock"),
            state_path: dir.join("state.json"),
            password: Some("pw".to_string()),
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_open_registry_seeds_then_restores() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());

        let registry = open_registry(&config).unwrap();
        let ids: Vec<_> = registry.list().unwrap().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![ObjectId::from("conn"), ObjectId::from("main")]);
        // The seeded connection carries the configured password.
        registry.reconnect(&"conn".into()).unwrap();

        registry
            .write_field(&"conn".into(), "user", &json!("app"))
            .unwrap();
        flush_state(&registry, &StateFile::new(&config.state_path));

        let restored = open_registry(&config).unwrap();
        let conn = restored.snapshot(&"conn".into()).unwrap();
        assert_eq!(conn.fields["user"], "app");
        assert_eq!(conn.fields["connected"], false);
        restored.reconnect(&"conn".into()).unwrap();
    }

    #[test]
    fn test_flush_state_only_when_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateFile::new(dir.path().join("state.json"));
        let registry = registry();

        flush_state(&registry, &state);
        assert_eq!(state.load().unwrap().len(), 1);

        std::fs::remove_file(state.path()).unwrap();
        flush_state(&registry, &state);
        assert!(!state.path().exists());

        registry
            .write_field(&"conn".into(), "user", &json!("app"))
            .unwrap();
        flush_state(&registry, &state);
        let saved = state.load().unwrap();
        assert_eq!(saved[0].fields["user"], "app");
    }

    #[test]
    fn test_failed_flush_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the state directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, b"").unwrap();
        let state = StateFile::new(blocker.join("state.json"));
        let registry = registry();
        registry.take_dirty();

        registry
            .write_field(&"conn".into(), "user", &json!("app"))
            .unwrap();
        flush_state(&registry, &state);
        assert!(!state.path().exists());

        std::fs::remove_file(&blocker).unwrap();
        flush_state(&registry, &state);
        let saved = state.load().unwrap();
        assert_eq!(saved[0].fields["user"], "app");
    }
}
