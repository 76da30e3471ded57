//! Shared fixtures for ovsk tests
//!
//! - [`FakeOvsdbServer`]: in-process OVSDB server on a temporary Unix socket
//! - [`packets`]: Ethernet frame builders for packet-in payloads

pub mod ovsdb;
pub mod packets;

pub use ovsdb::FakeOvsdbServer;
