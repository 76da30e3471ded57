//! Persistent OVSDB JSON-RPC client
//!
//! One Unix socket connection shared by all callers. A reader task frames
//! incoming JSON values, completes pending requests by id and hands
//! server-initiated messages to a [`NotificationHandler`]. Notifications are
//! dispatched in arrival order, before any reply that follows them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::{OvsdbError, Result};
use crate::operation::Operation;
use crate::protocol::{methods, Message, Request, Response, DATABASE};

/// Receiver for server-initiated messages
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    /// A monitor `update` batch: table -> uuid -> {old, new}
    async fn update(&self, monitor_id: &Value, updates: &Value);

    async fn locked(&self, lock: &str) {
        debug!("OVSDB lock {} acquired", lock);
    }

    async fn stolen(&self, lock: &str) {
        warn!("OVSDB lock {} stolen", lock);
    }

    /// Called before the echo reply is written
    async fn echo(&self, _params: &Value) {}

    /// The connection is gone; all pending requests have failed
    async fn disconnected(&self) {}
}

type PendingMap = HashMap<u64, oneshot::Sender<Response>>;

struct Shared {
    writer: Mutex<OwnedWriteHalf>,
    pending: Mutex<PendingMap>,
    closed: AtomicBool,
}

impl Shared {
    async fn send(&self, value: &Value) -> Result<()> {
        let mut bytes = serde_json::to_vec(value)?;
        bytes.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer.write_all(&bytes).await?;
        writer.flush().await?;
        Ok(())
    }
}

pub struct OvsdbClient {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
}

impl OvsdbClient {
    /// Connect to the OVSDB unix socket. Fails if the socket is unreachable.
    pub async fn connect(
        path: impl AsRef<Path>,
        handler: Arc<dyn NotificationHandler>,
    ) -> Result<Self> {
        let path = path.as_ref();
        debug!("Connecting to OVSDB socket: {}", path.display());
        let stream = UnixStream::connect(path)
            .await
            .map_err(|source| OvsdbError::Connection {
                path: path.display().to_string(),
                source,
            })?;
        let (read_half, write_half) = stream.into_split();

        let shared = Arc::new(Shared {
            writer: Mutex::new(write_half),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });
        let reader = tokio::spawn(read_loop(read_half, shared.clone(), handler));

        Ok(Self {
            shared,
            next_id: AtomicU64::new(1),
            reader,
        })
    }

    /// Send a request and wait for its reply
    pub async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.shared.pending.lock().await;
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(OvsdbError::Disconnected);
            }
            pending.insert(id, tx);
        }

        let request = serde_json::to_value(Request::new(method, params, id))?;
        debug!("Sending OVSDB request: {}", request);
        if let Err(e) = self.shared.send(&request).await {
            self.shared.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = rx.await.map_err(|_| OvsdbError::Disconnected)?;
        response.into_result(method)
    }

    pub async fn get_schema(&self) -> Result<Value> {
        self.request(methods::GET_SCHEMA, json!([DATABASE])).await
    }

    /// Subscribe to `requests` (table -> monitor request); returns the initial contents
    pub async fn monitor(&self, monitor_id: Value, requests: Value) -> Result<Value> {
        self.request(methods::MONITOR, json!([DATABASE, monitor_id, requests]))
            .await
    }

    /// Raw transaction; one result per operation, possibly followed by an error
    pub async fn transact(&self, operations: &[Operation]) -> Result<Vec<Value>> {
        let mut params = vec![json!(DATABASE)];
        params.extend(operations.iter().map(Operation::to_json));
        let result = self.request(methods::TRANSACT, Value::Array(params)).await?;
        match result {
            Value::Array(results) => Ok(results),
            other => Err(OvsdbError::Protocol(format!(
                "transact returned {}",
                other
            ))),
        }
    }

    pub async fn echo(&self) -> Result<Value> {
        self.request(methods::ECHO, json!([])).await
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl Drop for OvsdbClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_loop(
    mut reader: OwnedReadHalf,
    shared: Arc<Shared>,
    handler: Arc<dyn NotificationHandler>,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(8192);
    let mut chunk = vec![0u8; 8192];

    'outer: loop {
        match reader.read(&mut chunk).await {
            Ok(0) => {
                debug!("OVSDB connection closed by server");
                break;
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) => {
                error!("Failed to read from OVSDB: {}", e);
                break;
            }
        }

        let mut values = Vec::new();
        let mut consumed = 0;
        {
            let mut stream = serde_json::Deserializer::from_slice(&buf).into_iter::<Value>();
            loop {
                match stream.next() {
                    Some(Ok(value)) => {
                        consumed = stream.byte_offset();
                        values.push(value);
                    }
                    // Partial message, wait for more bytes
                    Some(Err(e)) if e.is_eof() => break,
                    Some(Err(e)) => {
                        error!("Malformed OVSDB message: {}", e);
                        break 'outer;
                    }
                    None => {
                        consumed = buf.len();
                        break;
                    }
                }
            }
        }
        buf.drain(..consumed);

        for value in values {
            if let Err(e) = dispatch(value, &shared, handler.as_ref()).await {
                warn!("Failed to handle OVSDB message: {}", e);
            }
        }
    }

    {
        let mut pending = shared.pending.lock().await;
        shared.closed.store(true, Ordering::Release);
        // Dropping the senders fails every waiter with Disconnected
        pending.clear();
    }
    handler.disconnected().await;
}

async fn dispatch(value: Value, shared: &Shared, handler: &dyn NotificationHandler) -> Result<()> {
    match Message::from_value(value)? {
        Message::Response(response) => {
            let Some(id) = response.id.as_u64() else {
                debug!("Ignoring OVSDB reply with id {}", response.id);
                return Ok(());
            };
            match shared.pending.lock().await.remove(&id) {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!("No pending OVSDB request for id {}", id),
            }
        }
        Message::Request(request) => match request.method.as_str() {
            methods::UPDATE => {
                let params = request.params.as_array().cloned().unwrap_or_default();
                match params.as_slice() {
                    [monitor_id, updates] => handler.update(monitor_id, updates).await,
                    _ => warn!("Malformed update notification: {}", request.params),
                }
            }
            methods::ECHO => {
                handler.echo(&request.params).await;
                let reply = Response::success(request.id, request.params);
                shared.send(&serde_json::to_value(reply)?).await?;
            }
            methods::LOCKED => handler.locked(&first_string(&request.params)).await,
            methods::STOLEN => handler.stolen(&first_string(&request.params)).await,
            other => {
                warn!("Unsupported OVSDB method from server: {}", other);
                if !request.is_notification() {
                    let reply = Response::error(request.id, "unknown method");
                    shared.send(&serde_json::to_value(reply)?).await?;
                }
            }
        },
    }
    Ok(())
}

fn first_string(params: &Value) -> String {
    params
        .get(0)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
