//! Core types and utilities for ovsk
//!
//! # Modules
//!
//! - `change`: Per-kind change predicates used by the watchers
//! - `config`: Configuration file and environment loading
//! - `error`: Error types and Result alias
//! - `types`: Kubernetes resource views, update records and MAC addresses

pub mod change;
pub mod config;
pub mod error;
pub mod types;

// Re-exports
pub use change::ChangePredicate;
pub use config::ProxyConfig;
pub use error::{Error, Result};
pub use types::*;
