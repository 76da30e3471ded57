//! Proxy error types

use ovsk_openflow::OpenFlowError;
use ovsk_ovsdb::OvsdbError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("OVSDB error: {0}")]
    Ovsdb(#[from] OvsdbError),

    #[error("OpenFlow error: {0}")]
    OpenFlow(#[from] OpenFlowError),

    #[error(transparent)]
    Core(#[from] ovsk_core::Error),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Cannot decode packet: {0}")]
    Packet(String),

    #[error("No port for {0}")]
    PortUnresolved(String),

    #[error("Interface {interface} lacks external id {key}")]
    MissingExternalId { interface: String, key: &'static str },
}

pub type Result<T> = std::result::Result<T, ProxyError>;

impl ProxyError {
    pub fn packet(reason: impl std::fmt::Display) -> Self {
        ProxyError::Packet(reason.to_string())
    }

    /// Lookup misses that only mean "not yet" or "not ours"
    pub fn is_miss(&self) -> bool {
        match self {
            ProxyError::Ovsdb(e) => e.is_transient(),
            ProxyError::PortUnresolved(_) | ProxyError::Packet(_) => true,
            _ => false,
        }
    }
}
