//! Proxy configuration
//!
//! Configuration comes from three places, applied in order:
//!
//! 1. The JSON file shared with the CNI plugin (`/etc/cni/net.d/odl-cni.conf`)
//! 2. `OVSK_*` environment variables, optionally loaded from
//!    `/etc/ovsk/environment` by [`load_environment`]
//! 3. Command line flags (applied by the service binary)
//!
//! ```rust,no_run
//! use ovsk_core::config::{load_environment, ProxyConfig};
//!
//! load_environment();
//! let config = ProxyConfig::load("/etc/cni/net.d/odl-cni.conf")
//!     .unwrap()
//!     .with_env_overrides();
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Default path of the JSON configuration file
pub const DEFAULT_CONFIG_FILE: &str = "/etc/cni/net.d/odl-cni.conf";

/// Default path for the environment file
pub const DEFAULT_ENV_FILE: &str = "/etc/ovsk/environment";

/// Alternative paths to check (in order of priority)
pub const ENV_FILE_PATHS: &[&str] = &["/etc/ovsk/environment", "/etc/ovsk.env", ".env"];

pub const DEFAULT_BRIDGE: &str = "ovsbrk8s";
pub const DEFAULT_CONTROLLER_PORT: u16 = 6653;
pub const DEFAULT_MANAGER_PORT: u16 = 6640;
pub const DEFAULT_OVSDB_SOCKET: &str = "/var/run/openvswitch/db.sock";

/// Proxy settings, field names follow the CNI plugin's config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Root bridge managed by this instance
    #[serde(default = "default_bridge")]
    pub ovs_bridge: String,

    /// Bridge used for external connectivity, informational only
    #[serde(default)]
    pub ovs_ext_bridge: String,

    /// OpenFlow controller port; the proxy listens here
    #[serde(default = "default_controller_port")]
    pub ctlr_port: u16,

    /// Register an active (`tcp:`) rather than passive (`ptcp:`) controller
    #[serde(default = "default_true")]
    pub ctlr_active: bool,

    /// Controller IP used for the active target
    #[serde(default = "default_loopback")]
    pub controller: String,

    #[serde(default = "default_manager_port")]
    pub mgr_port: u16,

    /// Register a manager target at startup
    #[serde(default)]
    pub mgr_active: bool,

    #[serde(default = "default_loopback")]
    pub manager: String,

    #[serde(default)]
    pub external_intf: String,

    #[serde(default)]
    pub external_ip: String,

    #[serde(default = "default_ovsdb_socket")]
    pub ovsdb_socket: String,

    /// Overrides the hostname-derived node name
    #[serde(default)]
    pub node_name: Option<String>,

    /// Tear the root bridge down on orderly shutdown
    #[serde(default)]
    pub delete_bridge_on_exit: bool,
}

fn default_bridge() -> String {
    DEFAULT_BRIDGE.to_string()
}

fn default_controller_port() -> u16 {
    DEFAULT_CONTROLLER_PORT
}

fn default_manager_port() -> u16 {
    DEFAULT_MANAGER_PORT
}

fn default_loopback() -> String {
    "127.0.0.1".to_string()
}

fn default_ovsdb_socket() -> String {
    DEFAULT_OVSDB_SOCKET.to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            ovs_bridge: default_bridge(),
            ovs_ext_bridge: String::new(),
            ctlr_port: default_controller_port(),
            ctlr_active: true,
            controller: default_loopback(),
            mgr_port: default_manager_port(),
            mgr_active: false,
            manager: default_loopback(),
            external_intf: String::new(),
            external_ip: String::new(),
            ovsdb_socket: default_ovsdb_socket(),
            node_name: None,
            delete_bridge_on_exit: false,
        }
    }
}

impl ProxyConfig {
    /// Load from a JSON file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)?;
        let config = Self::from_json(&content)
            .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn from_json(content: &str) -> Result<Self> {
        let config: ProxyConfig = serde_json::from_str(content)?;
        Ok(config.normalized())
    }

    /// Replace zero ports and empty names with their defaults
    pub fn normalized(mut self) -> Self {
        if self.ctlr_port == 0 {
            self.ctlr_port = DEFAULT_CONTROLLER_PORT;
        }
        if self.mgr_port == 0 {
            self.mgr_port = DEFAULT_MANAGER_PORT;
        }
        if self.ovs_bridge.is_empty() {
            self.ovs_bridge = default_bridge();
        }
        if self.ovsdb_socket.is_empty() {
            self.ovsdb_socket = default_ovsdb_socket();
        }
        if self.controller.is_empty() {
            self.controller = default_loopback();
        }
        if self.manager.is_empty() {
            self.manager = default_loopback();
        }
        self.node_name = self.node_name.filter(|n| !n.is_empty());
        self
    }

    /// Apply `OVSK_*` environment overrides
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(bridge) = get_config_opt("OVSK_BRIDGE") {
            self.ovs_bridge = bridge;
        }
        if let Some(socket) = get_config_opt("OVSK_OVSDB_SOCKET") {
            self.ovsdb_socket = socket;
        }
        if let Some(node) = get_config_opt("OVSK_NODE_NAME") {
            self.node_name = Some(node);
        }
        let port = get_config_int("OVSK_CONTROLLER_PORT", i64::from(self.ctlr_port));
        self.ctlr_port = u16::try_from(port).unwrap_or(self.ctlr_port);
        self.mgr_active = get_config_bool("OVSK_MANAGER_ACTIVE", self.mgr_active);
        self.delete_bridge_on_exit =
            get_config_bool("OVSK_DELETE_BRIDGE_ON_EXIT", self.delete_bridge_on_exit);
        self.normalized()
    }

    /// Target string for the controller registration
    pub fn controller_target(&self) -> String {
        if self.ctlr_active {
            format!("tcp:{}:{}", self.controller, self.ctlr_port)
        } else {
            format!("ptcp:{}", self.ctlr_port)
        }
    }

    /// Target string for the manager registration
    pub fn manager_target(&self) -> String {
        format!("tcp:{}:{}", self.manager, self.mgr_port)
    }
}

/// Load environment variables from the canonical env file.
///
/// Does not override variables that are already set. Returns the path that
/// was loaded, or None if no file was found.
pub fn load_environment() -> Option<String> {
    if let Ok(custom_path) = std::env::var("OVSK_ENV_FILE") {
        if let Some(path) = try_load_env_file(&custom_path) {
            return Some(path);
        }
    }

    for path in ENV_FILE_PATHS {
        if let Some(loaded_path) = try_load_env_file(path) {
            return Some(loaded_path);
        }
    }

    debug!("No environment file found, using existing environment");
    None
}

/// Value as it may appear in logs; credentials are masked
fn loggable_value<'a>(key: &str, value: &'a str) -> &'a str {
    if key.contains("KEY") || key.contains("TOKEN") || key.contains("SECRET") {
        "***"
    } else {
        value
    }
}

fn try_load_env_file(path: &str) -> Option<String> {
    let path_obj = Path::new(path);
    if !path_obj.exists() {
        return None;
    }

    match fs::read_to_string(path_obj) {
        Ok(content) => {
            let mut loaded_count = 0;
            let mut skipped_count = 0;

            for line in content.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }

                if let Some((key, value)) = parse_env_line(line) {
                    if std::env::var(&key).is_err() {
                        std::env::set_var(&key, &value);
                        loaded_count += 1;
                        debug!("Loaded: {}={}", key, loggable_value(&key, &value));
                    } else {
                        skipped_count += 1;
                        debug!("Skipped (already set): {}", key);
                    }
                }
            }

            info!(
                "Loaded {} environment variables from {} ({} skipped - already set)",
                loaded_count, path, skipped_count
            );
            Some(path.to_string())
        }
        Err(e) => {
            warn!("Failed to read environment file {}: {}", path, e);
            None
        }
    }
}

/// Parse `KEY=VALUE`, `KEY="VALUE"` or `KEY='VALUE'`
fn parse_env_line(line: &str) -> Option<(String, String)> {
    let (key, value) = line.split_once('=')?;
    let key = key.trim();
    let value = value.trim();

    if key.is_empty() {
        return None;
    }

    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);

    Some((key.to_string(), value.to_string()))
}

/// Get an optional configuration value.
pub fn get_config_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Get a boolean configuration value.
pub fn get_config_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes" | "on"))
        .unwrap_or(default)
}

/// Get an integer configuration value.
pub fn get_config_int(key: &str, default: i64) -> i64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
