//! Switch state store: a connected client plus the monitored table cache

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::cache::{PortPollPolicy, TableCache};
use crate::client::{NotificationHandler, OvsdbClient};
use crate::error::{OvsdbError, Result};
use crate::operation::Operation;

const MONITOR_ID: &str = "ovsk";

/// Applies monitor updates to the cache and records disconnection
struct CacheUpdater {
    cache: Arc<TableCache>,
    closed: watch::Sender<bool>,
}

#[async_trait]
impl NotificationHandler for CacheUpdater {
    async fn update(&self, _monitor_id: &Value, updates: &Value) {
        self.cache.apply_updates(updates).await;
    }

    async fn disconnected(&self) {
        warn!("OVSDB connection lost");
        let _ = self.closed.send(true);
    }
}

/// Connected view of the switch database.
///
/// Lookups are served from the [`TableCache`] through `Deref`.
pub struct SwitchStore {
    client: OvsdbClient,
    cache: Arc<TableCache>,
    closed: watch::Receiver<bool>,
}

impl SwitchStore {
    /// Connect to the database socket. No retry.
    pub async fn connect(socket: impl AsRef<Path>) -> Result<Self> {
        Self::connect_with(socket, PortPollPolicy::default()).await
    }

    pub async fn connect_with(socket: impl AsRef<Path>, poll: PortPollPolicy) -> Result<Self> {
        let cache = Arc::new(TableCache::with_poll_policy(poll));
        let (closed_tx, closed) = watch::channel(false);
        let handler = Arc::new(CacheUpdater {
            cache: cache.clone(),
            closed: closed_tx,
        });
        let client = OvsdbClient::connect(socket, handler).await?;
        info!("Connected to OVSDB");
        Ok(Self {
            client,
            cache,
            closed,
        })
    }

    /// Fetch the schema and monitor every table, loading the initial contents
    pub async fn monitor_all(&self) -> Result<()> {
        let schema = self.client.get_schema().await?;
        let tables = schema
            .get("tables")
            .and_then(Value::as_object)
            .ok_or_else(|| OvsdbError::Protocol("schema has no tables".to_string()))?;

        let requests: Map<String, Value> = tables
            .keys()
            .map(|table| (table.clone(), json!({})))
            .collect();
        debug!("Monitoring {} tables", requests.len());

        let initial = self
            .client
            .monitor(json!(MONITOR_ID), Value::Object(requests))
            .await?;
        self.cache.apply_updates(&initial).await;
        Ok(())
    }

    /// Run `ops` as one atomic transaction
    pub async fn transact(&self, ops: Vec<Operation>) -> Result<Vec<Value>> {
        let results = self.client.transact(&ops).await?;
        if results.len() < ops.len() {
            return Err(OvsdbError::ReplyCountMismatch {
                expected: ops.len(),
                received: results.len(),
            });
        }
        for result in &results {
            if let Some(error) = result.get("error").filter(|e| !e.is_null()) {
                let details = result
                    .get("details")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                return Err(OvsdbError::TransactionFailed {
                    error: error.as_str().map_or_else(|| error.to_string(), str::to_string),
                    details: details.to_string(),
                });
            }
        }
        Ok(results)
    }

    pub fn client(&self) -> &OvsdbClient {
        &self.client
    }

    pub fn cache(&self) -> &Arc<TableCache> {
        &self.cache
    }

    /// Resolves once the connection to ovsdb-server is gone
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }
}

impl Deref for SwitchStore {
    type Target = TableCache;

    fn deref(&self) -> &TableCache {
        &self.cache
    }
}
