//! OVSDB error types

use thiserror::Error;

/// Errors raised by the OVSDB client, cache and driver
#[derive(Error, Debug)]
pub enum OvsdbError {
    // ========================================================================
    // Connection Errors
    // ========================================================================
    #[error("Failed to connect to OVSDB at {path}: {source}")]
    Connection {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("OVSDB connection closed")]
    Disconnected,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("OVSDB RPC error on {method}: {error}")]
    Rpc { method: String, error: String },

    #[error("Unexpected OVSDB reply: {0}")]
    Protocol(String),

    #[error("Type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: String },

    // ========================================================================
    // Transaction Errors
    // ========================================================================
    #[error("Transaction failed: {error} ({details})")]
    TransactionFailed { error: String, details: String },

    #[error("Transaction reply count mismatch: sent {expected} operations, got {received} results")]
    ReplyCountMismatch { expected: usize, received: usize },

    // ========================================================================
    // Lookup Errors
    // ========================================================================
    #[error("{kind} '{name}' not found")]
    NotFound { kind: &'static str, name: String },

    #[error("Interface with {key}={value} has no ofport after {attempts} attempts")]
    PortNotReady {
        key: String,
        value: String,
        attempts: u32,
    },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: &'static str, name: String },
}

/// Result type alias for OVSDB operations
pub type Result<T> = std::result::Result<T, OvsdbError>;

impl OvsdbError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        OvsdbError::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: &'static str, name: impl Into<String>) -> Self {
        OvsdbError::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn type_mismatch(expected: &'static str, found: impl std::fmt::Debug) -> Self {
        OvsdbError::TypeMismatch {
            expected,
            found: format!("{:?}", found),
        }
    }

    /// Operator hint shown next to fatal errors
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            OvsdbError::Connection { .. } => {
                Some("Start OVS: sudo systemctl start openvswitch-switch")
            }
            OvsdbError::Disconnected => {
                Some("ovsdb-server went away; restart the proxy once it is back")
            }
            OvsdbError::PortNotReady { .. } => {
                Some("ovs-vswitchd has not assigned an ofport yet; check `ovs-vsctl show`")
            }
            OvsdbError::TransactionFailed { .. } => {
                Some("Inspect the details with `ovsdb-client dump`")
            }
            _ => None,
        }
    }

    /// True for lookups that may succeed later
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            OvsdbError::NotFound { .. } | OvsdbError::PortNotReady { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OvsdbError::TransactionFailed {
            error: "constraint violation".into(),
            details: "duplicate name".into(),
        };
        assert_eq!(
            err.to_string(),
            "Transaction failed: constraint violation (duplicate name)"
        );
    }

    #[test]
    fn test_suggestion() {
        let err = OvsdbError::PortNotReady {
            key: "ip-address".into(),
            value: "10.244.0.7".into(),
            attempts: 5,
        };
        assert!(err.suggestion().is_some());
        assert!(err.is_transient());
        let err = OvsdbError::Connection {
            path: "/var/run/openvswitch/db.sock".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.suggestion().unwrap().contains("openvswitch"));
        assert!(OvsdbError::already_exists("bridge", "br0").suggestion().is_none());
        assert!(!OvsdbError::Disconnected.is_transient());
    }
}
