//! In-process OVSDB server for tests
//!
//! Speaks enough of RFC 7047 for the ovsk client: `get_schema`, `monitor`,
//! `transact` (insert, delete, mutate, select), `echo`. Committed changes are
//! pushed to monitoring connections as `update` notifications before the
//! transaction reply is written.

use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub const TABLES: &[&str] = &[
    "Open_vSwitch",
    "Bridge",
    "Port",
    "Interface",
    "Controller",
    "Manager",
];

type Rows = BTreeMap<String, Map<String, Value>>;

struct Connection {
    tx: mpsc::UnboundedSender<Value>,
    monitoring: bool,
}

#[derive(Default)]
struct FakeDb {
    tables: BTreeMap<String, Rows>,
    connections: Vec<Connection>,
    fail_next: Option<(String, String)>,
    transactions: Vec<Value>,
    replies: Vec<Value>,
    root_uuid: String,
}

impl FakeDb {
    fn new() -> Self {
        let mut db = FakeDb::default();
        for table in TABLES {
            db.tables.insert(table.to_string(), Rows::new());
        }
        let root = uuid::Uuid::new_v4().to_string();
        let mut row = Map::new();
        row.insert("bridges".into(), json!(["set", []]));
        row.insert("manager_options".into(), json!(["set", []]));
        row.insert("ovs_version".into(), json!("2.17.0"));
        db.tables
            .entry("Open_vSwitch".into())
            .or_default()
            .insert(root.clone(), row);
        db.root_uuid = root;
        db
    }

    fn notify(&mut self, updates: Value) {
        if updates.as_object().map_or(true, Map::is_empty) {
            return;
        }
        let msg = json!({"method": "update", "params": ["ovsk", updates], "id": null});
        self.connections
            .retain(|c| !c.monitoring || c.tx.send(msg.clone()).is_ok());
    }

    fn initial_contents(&self) -> Value {
        let mut out = Map::new();
        for (table, rows) in &self.tables {
            if rows.is_empty() {
                continue;
            }
            let rows: Map<String, Value> = rows
                .iter()
                .map(|(uuid, row)| (uuid.clone(), json!({"new": row})))
                .collect();
            out.insert(table.clone(), Value::Object(rows));
        }
        Value::Object(out)
    }
}

/// Accumulated `{table: {uuid: {old, new}}}` for one commit
#[derive(Default)]
struct ChangeSet(BTreeMap<String, BTreeMap<String, (Option<Value>, Option<Value>)>>);

impl ChangeSet {
    fn record(&mut self, table: &str, uuid: &str, old: Option<Value>, new: Option<Value>) {
        let entry = self
            .0
            .entry(table.to_string())
            .or_default()
            .entry(uuid.to_string())
            .or_insert((old, None));
        entry.1 = new;
    }

    fn into_updates(self) -> Value {
        let mut out = Map::new();
        for (table, rows) in self.0 {
            let mut changes = Map::new();
            for (uuid, (old, new)) in rows {
                let mut change = Map::new();
                if let Some(old) = old {
                    change.insert("old".into(), old);
                }
                if let Some(new) = new {
                    change.insert("new".into(), new);
                }
                changes.insert(uuid, Value::Object(change));
            }
            out.insert(table, Value::Object(changes));
        }
        Value::Object(out)
    }
}

/// Fake `ovsdb-server` listening on a Unix socket in a temp dir
pub struct FakeOvsdbServer {
    _dir: TempDir,
    path: PathBuf,
    db: Arc<Mutex<FakeDb>>,
    shutdown: CancellationToken,
    accept: JoinHandle<()>,
}

impl FakeOvsdbServer {
    pub async fn start() -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("db.sock");
        let listener = UnixListener::bind(&path)?;
        let db = Arc::new(Mutex::new(FakeDb::new()));
        let shutdown = CancellationToken::new();

        let accept_db = db.clone();
        let accept_shutdown = shutdown.clone();
        let accept = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(serve(stream, accept_db.clone(), accept_shutdown.clone()));
                        }
                        Err(_) => break,
                    }
                }
            }
        });

        Ok(Self {
            _dir: dir,
            path,
            db,
            shutdown,
            accept,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.path
    }

    pub async fn root_uuid(&self) -> String {
        self.db.lock().await.root_uuid.clone()
    }

    /// All rows of `table` as `(uuid, row)`
    pub async fn rows(&self, table: &str) -> Vec<(String, Map<String, Value>)> {
        let db = self.db.lock().await;
        db.tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub async fn row_by_name(&self, table: &str, name: &str) -> Option<(String, Map<String, Value>)> {
        self.rows(table)
            .await
            .into_iter()
            .find(|(_, row)| row.get("name") == Some(&json!(name)))
    }

    /// Uuids held by a set-of-references column
    pub async fn refs(&self, table: &str, uuid: &str, column: &str) -> Vec<String> {
        let db = self.db.lock().await;
        db.tables
            .get(table)
            .and_then(|rows| rows.get(uuid))
            .and_then(|row| row.get(column))
            .map(set_atoms)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|atom| atom.get(1).and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    /// Insert a row directly, notifying monitors. Returns its uuid.
    pub async fn insert_row(&self, table: &str, row: Value) -> String {
        let uuid = uuid::Uuid::new_v4().to_string();
        let mut db = self.db.lock().await;
        let row = row.as_object().cloned().unwrap_or_default();
        db.tables
            .entry(table.to_string())
            .or_default()
            .insert(uuid.clone(), row.clone());
        let mut changes = ChangeSet::default();
        changes.record(table, &uuid, None, Some(Value::Object(row)));
        db.notify(changes.into_updates());
        uuid
    }

    /// Overwrite one column of the row named `name`, as ovs-vswitchd does
    /// when it assigns an `ofport`
    pub async fn set_column(&self, table: &str, name: &str, column: &str, value: Value) -> bool {
        let mut db = self.db.lock().await;
        let Some(rows) = db.tables.get_mut(table) else {
            return false;
        };
        let Some((uuid, row)) = rows
            .iter_mut()
            .find(|(_, row)| row.get("name") == Some(&json!(name)))
        else {
            return false;
        };
        let old = Value::Object(row.clone());
        row.insert(column.to_string(), value);
        let new = Value::Object(row.clone());
        let uuid = uuid.clone();
        let mut changes = ChangeSet::default();
        changes.record(table, &uuid, Some(old), Some(new));
        db.notify(changes.into_updates());
        true
    }

    /// Make the next transaction fail with the given error and details
    pub async fn fail_next_transaction(&self, error: &str, details: &str) {
        self.db.lock().await.fail_next = Some((error.to_string(), details.to_string()));
    }

    /// Number of `transact` requests received so far
    pub async fn transaction_count(&self) -> usize {
        self.db.lock().await.transactions.len()
    }

    pub async fn transactions(&self) -> Vec<Value> {
        self.db.lock().await.transactions.clone()
    }

    /// Send an `echo` request to every connected client
    pub async fn send_echo(&self, tag: &str) {
        let db = self.db.lock().await;
        for conn in &db.connections {
            let _ = conn
                .tx
                .send(json!({"method": "echo", "params": [tag], "id": tag}));
        }
    }

    /// Replies received from clients (answers to `send_echo`)
    pub async fn client_replies(&self) -> Vec<Value> {
        self.db.lock().await.replies.clone()
    }

    /// Close every client connection and stop accepting
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for FakeOvsdbServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.accept.abort();
    }
}

async fn serve(stream: UnixStream, db: Arc<Mutex<FakeDb>>, shutdown: CancellationToken) {
    let (read_half, mut write_half) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
    let conn_index = {
        let mut db = db.lock().await;
        db.connections.push(Connection {
            tx: tx.clone(),
            monitoring: false,
        });
        db.connections.len() - 1
    };

    let writer_shutdown = shutdown.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = writer_shutdown.cancelled() => break,
                msg = rx.recv() => match msg {
                    Some(msg) => {
                        let mut bytes = msg.to_string().into_bytes();
                        bytes.push(b'\n');
                        if write_half.write_all(&bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        let _ = write_half.shutdown().await;
    });

    let mut lines = BufReader::new(read_half).lines();
    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => break,
            line = lines.next_line() => line,
        };
        let Ok(Some(line)) = line else { break };
        let Ok(msg) = serde_json::from_str::<Value>(&line) else {
            break;
        };
        debug!("fake ovsdb received {}", msg);

        let mut db = db.lock().await;
        let method = msg.get("method").and_then(Value::as_str).map(str::to_string);
        let Some(method) = method else {
            db.replies.push(msg);
            continue;
        };
        let id = msg.get("id").cloned().unwrap_or(Value::Null);
        let params = msg.get("params").cloned().unwrap_or(Value::Null);
        let reply = match method.as_str() {
            "get_schema" => {
                let tables: Map<String, Value> = TABLES
                    .iter()
                    .map(|t| (t.to_string(), json!({"columns": {}})))
                    .collect();
                json!({"name": "Open_vSwitch", "tables": tables})
            }
            "monitor" => {
                if let Some(conn) = db.connections.get_mut(conn_index) {
                    conn.monitoring = true;
                }
                db.initial_contents()
            }
            "transact" => transact(&mut db, &params),
            "echo" => params,
            _ => {
                let _ = tx.send(json!({"result": null, "error": "unknown method", "id": id}));
                continue;
            }
        };
        let _ = tx.send(json!({"result": reply, "error": null, "id": id}));
    }

    drop(tx);
    let _ = writer.await;
}

fn transact(db: &mut FakeDb, params: &Value) -> Value {
    db.transactions.push(params.clone());
    let ops: Vec<Value> = params
        .as_array()
        .map(|p| p.iter().skip(1).cloned().collect())
        .unwrap_or_default();

    if let Some((error, details)) = db.fail_next.take() {
        let mut results = vec![json!({"error": error, "details": details})];
        results.resize(ops.len(), Value::Null);
        return Value::Array(results);
    }

    let mut tables = db.tables.clone();
    let mut named: BTreeMap<String, String> = BTreeMap::new();
    let mut changes = ChangeSet::default();
    let mut results = Vec::new();

    for op in &ops {
        let table = op.get("table").and_then(Value::as_str).unwrap_or_default();
        let conditions = op.get("where").cloned().unwrap_or_else(|| json!([]));
        let result = match op.get("op").and_then(Value::as_str) {
            Some("insert") => {
                let uuid = uuid::Uuid::new_v4().to_string();
                if let Some(name) = op.get("uuid-name").and_then(Value::as_str) {
                    named.insert(name.to_string(), uuid.clone());
                }
                let row = resolve(op.get("row").cloned().unwrap_or_else(|| json!({})), &named);
                let row = row.as_object().cloned().unwrap_or_default();
                tables
                    .entry(table.to_string())
                    .or_default()
                    .insert(uuid.clone(), row.clone());
                changes.record(table, &uuid, None, Some(Value::Object(row)));
                json!({"uuid": ["uuid", uuid]})
            }
            Some("delete") => {
                let conditions = resolve(conditions, &named);
                let rows = tables.entry(table.to_string()).or_default();
                let matched: Vec<String> = rows
                    .iter()
                    .filter(|(uuid, row)| matches(uuid, row, &conditions))
                    .map(|(uuid, _)| uuid.clone())
                    .collect();
                for uuid in &matched {
                    if let Some(old) = rows.remove(uuid) {
                        changes.record(table, uuid, Some(Value::Object(old)), None);
                    }
                }
                json!({"count": matched.len()})
            }
            Some("mutate") => {
                let conditions = resolve(conditions, &named);
                let mutations = resolve(op.get("mutations").cloned().unwrap_or_default(), &named);
                let rows = tables.entry(table.to_string()).or_default();
                let mut count = 0;
                for (uuid, row) in rows.iter_mut() {
                    if !matches(uuid, row, &conditions) {
                        continue;
                    }
                    let old = Value::Object(row.clone());
                    for mutation in mutations.as_array().into_iter().flatten() {
                        apply_mutation(row, mutation);
                    }
                    changes.record(table, uuid, Some(old), Some(Value::Object(row.clone())));
                    count += 1;
                }
                json!({"count": count})
            }
            Some("select") => {
                let conditions = resolve(conditions, &named);
                let rows: Vec<Value> = tables
                    .get(table)
                    .into_iter()
                    .flatten()
                    .filter(|(uuid, row)| matches(uuid, row, &conditions))
                    .map(|(uuid, row)| {
                        let mut row = row.clone();
                        row.insert("_uuid".into(), json!(["uuid", uuid]));
                        Value::Object(row)
                    })
                    .collect();
                json!({"rows": rows})
            }
            other => {
                let mut results = results;
                results.push(json!({"error": "unknown operation", "details": format!("{:?}", other)}));
                return Value::Array(results);
            }
        };
        results.push(result);
    }

    db.tables = tables;
    db.notify(changes.into_updates());
    Value::Array(results)
}

/// Replace `["named-uuid", n]` with the uuid assigned in this transaction.
/// Unresolved names are left as they are and match nothing.
fn resolve(value: Value, named: &BTreeMap<String, String>) -> Value {
    match value {
        Value::Array(items) => {
            if let [Value::String(tag), Value::String(name)] = items.as_slice() {
                if tag == "named-uuid" {
                    if let Some(uuid) = named.get(name) {
                        return json!(["uuid", uuid]);
                    }
                }
            }
            Value::Array(items.into_iter().map(|v| resolve(v, named)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, resolve(v, named)))
                .collect(),
        ),
        other => other,
    }
}

fn matches(uuid: &str, row: &Map<String, Value>, conditions: &Value) -> bool {
    conditions.as_array().into_iter().flatten().all(|cond| {
        let (Some(column), Some(value)) = (cond.get(0).and_then(Value::as_str), cond.get(2)) else {
            return false;
        };
        if column == "_uuid" {
            return value == &json!(["uuid", uuid]);
        }
        row.get(column) == Some(value)
    })
}

/// Atoms of a set column; a bare atom is a set of one
fn set_atoms(value: &Value) -> Vec<Value> {
    match value.as_array().map(Vec::as_slice) {
        Some([Value::String(tag), Value::Array(atoms)]) if tag == "set" => atoms.clone(),
        _ => vec![value.clone()],
    }
}

fn apply_mutation(row: &mut Map<String, Value>, mutation: &Value) {
    let (Some(column), Some(mutator), Some(value)) = (
        mutation.get(0).and_then(Value::as_str),
        mutation.get(1).and_then(Value::as_str),
        mutation.get(2),
    ) else {
        return;
    };
    let mut current = row.get(column).map(set_atoms).unwrap_or_default();
    let operand = set_atoms(value);
    match mutator {
        "insert" => {
            for atom in operand {
                if !current.contains(&atom) {
                    current.push(atom);
                }
            }
        }
        "delete" => current.retain(|atom| !operand.contains(atom)),
        _ => return,
    }
    row.insert(column.to_string(), json!(["set", current]));
}
