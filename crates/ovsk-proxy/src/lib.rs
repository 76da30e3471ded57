//! Kubernetes service proxy on Open vSwitch
//!
//! Watches nodes, pods, services and endpoints, keeps VXLAN tunnels to the
//! other nodes and programs the local switch so that service traffic reaches
//! a backing pod. Connections are translated reactively: the first packet of
//! a flow is punted to the controller, which installs a NAT flow pair.

mod app;
pub mod error;
pub mod packet;
mod packet_in;
pub mod reconciler;
pub mod watch;

pub use error::{ProxyError, Result};
pub use packet::L4Packet;
pub use reconciler::{tunnel_port_name, ServiceProxy};
pub use watch::{node_ip_for_host, spawn_all, ChangeTracker, Reconcile, ResourceWatcher, Watched};
