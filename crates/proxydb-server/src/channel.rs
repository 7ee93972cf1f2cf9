//! Invocation channels: carry requests to the server and bring back exactly
//! one result or error per call.
//!
//! [`SocketChannel`] talks to a `ProxyServer` over a Unix socket and lets
//! many calls share the socket by correlating replies through `call_id`.
//! [`LocalChannel`] dispatches straight into an in-process registry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use proxydb_core::object::FieldUpdate;
use proxydb_core::registry::ObjectRegistry;
use proxydb_core::types::ObjectId;

use crate::dispatch::dispatch;
use crate::error::ClientError;
use crate::protocol::{ErrorResponse, Event, Request, Response};

/// Result type alias for channel and proxy operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Capacity of a channel's update subscription buffer.
const UPDATE_BUFFER: usize = 256;

/// Request/response transport to a server's object registry.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send one request and wait for its result.
    async fn request(&self, request: Request) -> Result<Value>;

    /// Receive field updates pushed by the server from now on.
    fn subscribe(&self) -> broadcast::Receiver<FieldUpdate>;

    /// Invoke a named behavior on a server-side object.
    async fn invoke(
        &self,
        object_id: &ObjectId,
        method: &str,
        args: Map<String, Value>,
    ) -> Result<Value> {
        self.request(Request::Invoke {
            object_id: object_id.clone(),
            method: method.to_string(),
            args,
        })
        .await
    }
}

type Pending = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Lines waiting for the writer task.
const WRITE_QUEUE: usize = 256;

/// Channel over a Unix socket connection to a `ProxyServer`.
///
/// Callers only hand complete lines to a writer task, so a call abandoned
/// mid-flight never leaves a partial request on the socket.
pub struct SocketChannel {
    lines: mpsc::Sender<Vec<u8>>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    next_call_id: AtomicU64,
    updates: broadcast::Sender<FieldUpdate>,
    reader: JoinHandle<()>,
}

impl SocketChannel {
    /// Connect to a ProxyDB server at the given Unix socket path.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self> {
        let stream = UnixStream::connect(path.as_ref()).await?;
        let (read_half, write_half) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (updates, _) = broadcast::channel(UPDATE_BUFFER);
        let (lines, queued) = mpsc::channel(WRITE_QUEUE);

        let reader = tokio::spawn(read_loop(
            BufReader::new(read_half),
            pending.clone(),
            closed.clone(),
            updates.clone(),
        ));
        // Ends on its own once the channel drops `lines`.
        tokio::spawn(write_loop(
            queued,
            BufWriter::new(write_half),
            pending.clone(),
            closed.clone(),
        ));

        Ok(Self {
            lines,
            pending,
            closed,
            next_call_id: AtomicU64::new(1),
            updates,
            reader,
        })
    }
}

/// Removes a call's pending entry when its future finishes or is dropped.
struct PendingCall<'a> {
    pending: &'a Pending,
    call_id: u64,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.call_id);
    }
}

#[async_trait]
impl Channel for SocketChannel {
    async fn request(&self, request: Request) -> Result<Value> {
        let call_id = self.next_call_id.fetch_add(1, Ordering::Relaxed);
        let data = request.to_line(call_id).map_err(ClientError::Serialization)?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(call_id, tx);
        let _call = PendingCall {
            pending: &self.pending,
            call_id,
        };
        // Both tasks mark the channel closed before draining `pending`, so a
        // call registered after the drain sees the flag here.
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::Disconnected);
        }
        if self.lines.send(data).await.is_err() {
            return Err(ClientError::Disconnected);
        }

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Disconnected),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<FieldUpdate> {
        self.updates.subscribe()
    }
}

impl Drop for SocketChannel {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Fail every waiting call. Later calls see `closed` and fail immediately.
fn close(pending: &Pending, closed: &AtomicBool) {
    closed.store(true, Ordering::SeqCst);
    let waiting: Vec<_> = pending.lock().drain().collect();
    debug!(calls = waiting.len(), "channel closed");
    for (_, tx) in waiting {
        let _ = tx.send(Err(ClientError::Disconnected));
    }
}

async fn write_loop(
    mut queued: mpsc::Receiver<Vec<u8>>,
    mut writer: BufWriter<OwnedWriteHalf>,
    pending: Pending,
    closed: Arc<AtomicBool>,
) {
    while let Some(line) = queued.recv().await {
        let sent = async {
            writer.write_all(&line).await?;
            while let Ok(more) = queued.try_recv() {
                writer.write_all(&more).await?;
            }
            writer.flush().await
        }
        .await;
        if let Err(e) = sent {
            warn!(error = %e, "channel write failed");
            close(&pending, &closed);
            return;
        }
    }
}

async fn read_loop(
    mut reader: BufReader<OwnedReadHalf>,
    pending: Pending,
    closed: Arc<AtomicBool>,
    updates: broadcast::Sender<FieldUpdate>,
) {
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "channel read failed");
                break;
            }
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable server message");
                continue;
            }
        };
        route(msg, &pending, &updates);
    }

    close(&pending, &closed);
}

fn route(msg: Value, pending: &Pending, updates: &broadcast::Sender<FieldUpdate>) {
    if msg.get("event").is_some() {
        match serde_json::from_value::<Event>(msg) {
            Ok(event) => {
                // Nobody subscribed is fine.
                let _ = updates.send(event.into());
            }
            Err(e) => warn!(error = %e, "unknown server event"),
        }
        return;
    }

    let Some(call_id) = msg.get("call_id").and_then(Value::as_u64) else {
        warn!(reply = %msg, "reply without call_id");
        return;
    };
    let Some(tx) = pending.lock().remove(&call_id) else {
        debug!(call_id, "reply for abandoned call");
        return;
    };
    let _ = tx.send(result_from_reply(msg));
}

/// Turn a reply line into the call's result.
fn result_from_reply(mut resp: Value) -> Result<Value> {
    check_error(&resp)?;
    match resp.get_mut("result") {
        Some(result) => Ok(result.take()),
        None => Err(ClientError::Protocol(
            "missing 'result' in response".to_string(),
        )),
    }
}

fn check_error(resp: &Value) -> Result<()> {
    if let Some(err) = resp.get("error") {
        let error = err.as_str().unwrap_or("Unknown").to_string();
        let message = resp
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("")
            .to_string();
        return Err(ClientError::Server(ErrorResponse { error, message }));
    }
    Ok(())
}

/// Channel that dispatches into a registry in the same process.
#[derive(Clone)]
pub struct LocalChannel {
    registry: Arc<ObjectRegistry>,
}

impl LocalChannel {
    pub fn new(registry: Arc<ObjectRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl Channel for LocalChannel {
    async fn request(&self, request: Request) -> Result<Value> {
        match dispatch(&self.registry, request) {
            Response::Ok(ok) => Ok(ok.result),
            Response::Error(err) => Err(ClientError::Server(err)),
        }
    }

    fn subscribe(&self) -> broadcast::Receiver<FieldUpdate> {
        self.registry.subscribe()
    }
}
