//! OVSDB access for ovsk
//!
//! - `client`: persistent JSON-RPC connection and the `NotificationHandler` seam
//! - `cache`: monitored table mirror and typed lookups
//! - `store`: client + cache, atomic transactions
//! - `driver`: bridge, port, tunnel, controller and manager lifecycle
//! - `datum` / `operation` / `protocol`: wire types

pub mod cache;
pub mod client;
pub mod datum;
pub mod driver;
pub mod error;
pub mod operation;
pub mod protocol;
pub mod store;

pub use cache::{PortPollPolicy, TableCache};
pub use client::{NotificationHandler, OvsdbClient};
pub use datum::{Atom, Datum, Row};
pub use driver::{InterfaceType, PortSpec, SwitchDriver};
pub use error::{OvsdbError, Result};
pub use operation::{Condition, Mutation, Operation};
pub use store::SwitchStore;
