//! In-memory mirror of the monitored OVSDB tables
//!
//! A single `RwLock` guards every table. Update batches take the write lock
//! once; lookups take the read lock and scan linearly.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::datum::Row;
use crate::error::{OvsdbError, Result};

pub mod tables {
    pub const OPEN_VSWITCH: &str = "Open_vSwitch";
    pub const BRIDGE: &str = "Bridge";
    pub const PORT: &str = "Port";
    pub const INTERFACE: &str = "Interface";
    pub const CONTROLLER: &str = "Controller";
    pub const MANAGER: &str = "Manager";
}

use tables::*;

/// How long to wait for ovs-vswitchd to assign an `ofport`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPollPolicy {
    /// Total number of lookups
    pub attempts: u32,
    /// Pause between consecutive lookups
    pub interval: Duration,
}

impl Default for PortPollPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            interval: Duration::from_millis(200),
        }
    }
}

/// Result of one scan for an interface's port number
enum PortLookup {
    Missing,
    Pending,
    Ready(u32, BTreeMap<String, String>),
}

#[derive(Debug, Default)]
pub struct TableCache {
    tables: RwLock<HashMap<String, HashMap<String, Row>>>,
    poll: PortPollPolicy,
}

impl TableCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_policy(poll: PortPollPolicy) -> Self {
        Self {
            tables: RwLock::default(),
            poll,
        }
    }

    /// Apply a monitor reply or `update` notification.
    ///
    /// `updates` is `{table: {uuid: {"old": row, "new": row}}}`. A missing or
    /// empty `new` removes the row; anything else replaces it wholesale.
    pub async fn apply_updates(&self, updates: &Value) {
        let Some(updates) = updates.as_object() else {
            warn!("Ignoring malformed table update: {}", updates);
            return;
        };

        let mut tables = self.tables.write().await;
        for (table, rows) in updates {
            let Some(rows) = rows.as_object() else {
                warn!("Ignoring malformed update for table {}", table);
                continue;
            };
            let cached = tables.entry(table.clone()).or_default();
            for (uuid, change) in rows {
                let new = change.get("new").cloned().unwrap_or(Value::Null);
                match Row::try_from(new) {
                    Ok(row) if row.is_empty() => {
                        cached.remove(uuid);
                    }
                    Ok(row) => {
                        cached.insert(uuid.clone(), row);
                    }
                    Err(e) => warn!("Skipping undecodable {} row {}: {}", table, uuid, e),
                }
            }
        }
    }

    pub async fn row(&self, table: &str, uuid: &str) -> Option<Row> {
        let tables = self.tables.read().await;
        tables.get(table)?.get(uuid).cloned()
    }

    pub async fn rows(&self, table: &str) -> Vec<(String, Row)> {
        let tables = self.tables.read().await;
        tables
            .get(table)
            .map(|rows| rows.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    pub async fn table_len(&self, table: &str) -> usize {
        let tables = self.tables.read().await;
        tables.get(table).map_or(0, HashMap::len)
    }

    async fn find_uuid<F>(&self, table: &str, pred: F) -> Option<String>
    where
        F: Fn(&Row) -> bool,
    {
        let tables = self.tables.read().await;
        tables
            .get(table)?
            .iter()
            .find(|(_, row)| pred(row))
            .map(|(uuid, _)| uuid.clone())
    }

    async fn uuid_by_column(&self, table: &str, column: &str, value: &str) -> Option<String> {
        self.find_uuid(table, |row| row.string(column).ok() == Some(value))
            .await
    }

    // ========================================================================
    // Existence
    // ========================================================================

    pub async fn is_bridge_present(&self, name: &str) -> bool {
        self.bridge_uuid(name).await.is_some()
    }

    pub async fn is_port_name_present(&self, name: &str) -> bool {
        self.port_uuid(name).await.is_some()
    }

    pub async fn is_controller_present(&self, target: &str) -> bool {
        self.controller_uuid(target).await.is_some()
    }

    pub async fn is_manager_present(&self, target: &str) -> bool {
        self.manager_uuid(target).await.is_some()
    }

    // ========================================================================
    // Row identifiers
    // ========================================================================

    /// The single `Open_vSwitch` row
    pub async fn root_uuid(&self) -> Option<String> {
        let tables = self.tables.read().await;
        tables.get(OPEN_VSWITCH)?.keys().next().cloned()
    }

    pub async fn bridge_uuid(&self, name: &str) -> Option<String> {
        self.uuid_by_column(BRIDGE, "name", name).await
    }

    pub async fn port_uuid(&self, name: &str) -> Option<String> {
        self.uuid_by_column(PORT, "name", name).await
    }

    pub async fn interface_uuid(&self, name: &str) -> Option<String> {
        self.uuid_by_column(INTERFACE, "name", name).await
    }

    pub async fn controller_uuid(&self, target: &str) -> Option<String> {
        self.uuid_by_column(CONTROLLER, "target", target).await
    }

    pub async fn manager_uuid(&self, target: &str) -> Option<String> {
        self.uuid_by_column(MANAGER, "target", target).await
    }

    // ========================================================================
    // Interface lookups
    // ========================================================================

    /// Interface name carrying `external_ids:key=value`
    pub async fn port_name_by_external_id(&self, key: &str, value: &str) -> Option<String> {
        let tables = self.tables.read().await;
        tables
            .get(INTERFACE)?
            .values()
            .find(|row| row.external_ids().get(key).map(String::as_str) == Some(value))
            .and_then(|row| row.name().map(str::to_string))
    }

    /// All external ids of the interface tagged `key=value`, without waiting
    /// for an ofport
    pub async fn external_ids(&self, key: &str, value: &str) -> Option<BTreeMap<String, String>> {
        let tables = self.tables.read().await;
        tables
            .get(INTERFACE)?
            .values()
            .map(Row::external_ids)
            .find(|ids| ids.get(key).map(String::as_str) == Some(value))
    }

    async fn lookup_of_port(&self, key: &str, value: &str) -> Result<PortLookup> {
        let tables = self.tables.read().await;
        let mut found = PortLookup::Missing;
        let Some(interfaces) = tables.get(INTERFACE) else {
            return Ok(found);
        };
        for row in interfaces.values() {
            let ids = row.external_ids();
            if ids.get(key).map(String::as_str) != Some(value) {
                continue;
            }
            match row.of_port() {
                Some(port) => {
                    let port = u32::try_from(port)
                        .map_err(|_| OvsdbError::type_mismatch("assigned ofport", port))?;
                    return Ok(PortLookup::Ready(port, ids));
                }
                None => found = PortLookup::Pending,
            }
        }
        Ok(found)
    }

    /// Port number and external ids of the interface tagged `key=value`.
    ///
    /// Polls while the interface exists without a numeric `ofport`; fails at
    /// once with `NotFound` if no interface carries the tag. An interface
    /// whose ofport is still unassigned after the last attempt yields
    /// `PortNotReady` instead, so callers can tell a missing port from a slow
    /// one. Both count as not found for [`OvsdbError::is_transient`].
    pub async fn external_ids_with_of_port(
        &self,
        key: &str,
        value: &str,
    ) -> Result<(u32, BTreeMap<String, String>)> {
        let attempts = self.poll.attempts.max(1);
        for attempt in 1..=attempts {
            match self.lookup_of_port(key, value).await? {
                PortLookup::Ready(port, ids) => return Ok((port, ids)),
                PortLookup::Missing => {
                    return Err(OvsdbError::not_found("interface", format!("{}={}", key, value)))
                }
                PortLookup::Pending => {
                    debug!(
                        "ofport for {}={} not assigned yet (attempt {}/{})",
                        key, value, attempt, attempts
                    );
                    if attempt < attempts {
                        tokio::time::sleep(self.poll.interval).await;
                    }
                }
            }
        }
        Err(OvsdbError::PortNotReady {
            key: key.to_string(),
            value: value.to_string(),
            attempts,
        })
    }

    pub async fn of_port_by_external_id(&self, key: &str, value: &str) -> Result<u32> {
        self.external_ids_with_of_port(key, value)
            .await
            .map(|(port, _)| port)
    }

    /// Port number of the VXLAN interface towards `remote_ip`
    pub async fn tunnel_port_by_remote_ip(&self, remote_ip: &str) -> Option<u32> {
        let tables = self.tables.read().await;
        tables
            .get(INTERFACE)?
            .values()
            .filter(|row| row.string("type").ok() == Some("vxlan"))
            .find(|row| row.options().get("remote_ip").map(String::as_str) == Some(remote_ip))
            .and_then(Row::of_port)
            .and_then(|port| u32::try_from(port).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use tokio::time::Instant;

    fn iface(name: &str, ofport: Value, ip: &str) -> Value {
        json!({
            "name": name,
            "ofport": ofport,
            "external_ids": ["map", [
                ["ip-address", ip],
                ["attached-mac", "0a:58:0a:f4:00:07"],
                ["iface-id", "default:web-0"]
            ]]
        })
    }

    #[tokio::test]
    async fn test_last_non_empty_value_wins() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Bridge": {
                "u1": {"new": {"name": "br0"}},
                "u2": {"new": {"name": "br1"}}
            }}))
            .await;
        cache
            .apply_updates(&json!({"Bridge": {
                "u1": {"old": {"name": "br0"}, "new": {"name": "br0", "stp_enable": true}},
                "u2": {"old": {"name": "br1"}}
            }}))
            .await;
        cache
            .apply_updates(&json!({"Bridge": {"u3": {"new": {"name": "br3"}}}}))
            .await;

        let u1 = cache.row("Bridge", "u1").await.unwrap();
        assert_eq!(u1.get("stp_enable"), Some(&crate::datum::Datum::boolean(true)));
        assert!(cache.row("Bridge", "u2").await.is_none());
        assert_eq!(cache.table_len("Bridge").await, 2);
        assert!(cache.is_bridge_present("br3").await);
        assert!(!cache.is_bridge_present("br1").await);
    }

    #[tokio::test]
    async fn test_empty_new_object_removes_row() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Port": {"p": {"new": {"name": "p1"}}}}))
            .await;
        cache
            .apply_updates(&json!({"Port": {"p": {"old": {"name": "p1"}, "new": {}}}}))
            .await;
        assert!(!cache.is_port_name_present("p1").await);
    }

    #[tokio::test]
    async fn test_external_ids_by_tag() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Interface": {
                "a": {"new": iface("veth1", json!(["set", []]), "10.244.0.7")},
                "b": {"new": iface("veth2", json!(4), "10.244.0.8")}
            }}))
            .await;
        let ids = cache.external_ids("ip-address", "10.244.0.7").await.unwrap();
        assert_eq!(ids["ip-address"], "10.244.0.7");
        assert_eq!(ids["attached-mac"], "0a:58:0a:f4:00:07");
        assert!(cache.external_ids("ip-address", "10.244.0.9").await.is_none());
        // Keyed by tag, never by interface name
        assert!(cache.external_ids("name", "veth2").await.is_none());
    }

    #[tokio::test]
    async fn test_tunnel_lookup() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Interface": {
                "t": {"new": {
                    "name": "tun192_168_1_5",
                    "type": "vxlan",
                    "ofport": 9,
                    "options": ["map", [["key", "flow"], ["remote_ip", "192.168.1.5"]]]
                }}
            }}))
            .await;
        assert_eq!(cache.tunnel_port_by_remote_ip("192.168.1.5").await, Some(9));
        assert_eq!(cache.tunnel_port_by_remote_ip("192.168.1.6").await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_of_port_returns_immediately_when_assigned() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Interface": {"i": {"new": iface("veth1", json!(3), "10.244.0.7")}}}))
            .await;
        let start = Instant::now();
        let (port, ids) = cache
            .external_ids_with_of_port("ip-address", "10.244.0.7")
            .await
            .unwrap();
        assert_eq!(port, 3);
        assert_eq!(ids["attached-mac"], "0a:58:0a:f4:00:07");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_of_port_missing_interface_fails_at_once() {
        let cache = TableCache::new();
        let start = Instant::now();
        let err = cache
            .of_port_by_external_id("ip-address", "10.244.0.99")
            .await
            .unwrap_err();
        assert!(matches!(err, OvsdbError::NotFound { .. }));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_of_port_polls_five_times() {
        let cache = TableCache::new();
        cache
            .apply_updates(&json!({"Interface": {"i": {"new": iface("veth1", json!(["set", []]), "10.244.0.7")}}}))
            .await;
        let start = Instant::now();
        let err = cache
            .of_port_by_external_id("ip-address", "10.244.0.7")
            .await
            .unwrap_err();
        assert!(matches!(err, OvsdbError::PortNotReady { attempts: 5, .. }));
        assert!(err.is_transient());
        // Five lookups with four 200 ms pauses between them
        assert_eq!(start.elapsed(), Duration::from_millis(800));
    }

    #[tokio::test(start_paused = true)]
    async fn test_of_port_picks_up_late_assignment() {
        let cache = Arc::new(TableCache::new());
        cache
            .apply_updates(&json!({"Interface": {"i": {"new": iface("veth1", json!(["set", []]), "10.244.0.7")}}}))
            .await;

        let writer = cache.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(450)).await;
            writer
                .apply_updates(&json!({"Interface": {"i": {"new": iface("veth1", json!(4), "10.244.0.7")}}}))
                .await;
        });

        let start = Instant::now();
        let port = cache
            .of_port_by_external_id("ip-address", "10.244.0.7")
            .await
            .unwrap();
        assert_eq!(port, 4);
        // Found on the fourth lookup, at 600 ms
        assert_eq!(start.elapsed(), Duration::from_millis(600));
    }
}
