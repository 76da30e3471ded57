//! OpenFlow error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum OpenFlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unsupported OpenFlow version {0:#04x}")]
    BadVersion(u8),

    #[error("Invalid message length {0}")]
    BadLength(u16),

    #[error("Malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("Cannot encode {0}")]
    Unencodable(&'static str),

    #[error("Switch {0:#018x} is disconnected")]
    Disconnected(u64),

    #[error("Handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },
}

pub type Result<T> = std::result::Result<T, OpenFlowError>;

impl OpenFlowError {
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        OpenFlowError::Malformed {
            what,
            reason: reason.into(),
        }
    }
}
