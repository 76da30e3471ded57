//! Common types used across ovsk
//!
//! These are the proxy's own views of the Kubernetes objects it reacts to.
//! The watchers build them from API objects; the reconciler only ever sees
//! these, so it can be driven directly in tests.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::Error;

/// External-id key holding `namespace:name` of the pod behind an interface
pub const EXTERNAL_ID_IFACE_ID: &str = "iface-id";
/// External-id key holding the pod MAC
pub const EXTERNAL_ID_ATTACHED_MAC: &str = "attached-mac";
/// External-id key holding the pod IP
pub const EXTERNAL_ID_IP_ADDRESS: &str = "ip-address";

/// Kind of change carried by an update record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Operation {
    Add,
    Update,
    Remove,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Add => write!(f, "ADD"),
            Operation::Update => write!(f, "UPDATE"),
            Operation::Remove => write!(f, "REMOVE"),
        }
    }
}

/// A typed change record: the resource and what happened to it
#[derive(Debug, Clone, PartialEq)]
pub struct Update<T> {
    pub op: Operation,
    pub resource: T,
}

impl<T> Update<T> {
    pub fn new(op: Operation, resource: T) -> Self {
        Self { op, resource }
    }

    pub fn add(resource: T) -> Self {
        Self::new(Operation::Add, resource)
    }

    pub fn update(resource: T) -> Self {
        Self::new(Operation::Update, resource)
    }

    pub fn remove(resource: T) -> Self {
        Self::new(Operation::Remove, resource)
    }
}

pub type NodeUpdate = Update<NodeInfo>;
pub type PodUpdate = Update<PodInfo>;
pub type ServiceUpdate = Update<ServiceInfo>;
pub type EndpointsUpdate = Update<EndpointInfo>;

/// Stable `namespace:name` identifier for a namespaced object
pub fn resource_key(namespace: &str, name: &str) -> String {
    format!("{}:{}", namespace, name)
}

/// 48-bit Ethernet address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub const fn new(octets: [u8; 6]) -> Self {
        Self(octets)
    }

    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 6]
    }
}

impl From<[u8; 6]> for MacAddr {
    fn from(octets: [u8; 6]) -> Self {
        Self(octets)
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts
                .next()
                .filter(|p| p.len() == 2)
                .ok_or_else(|| Error::InvalidMac(s.to_string()))?;
            *octet = u8::from_str_radix(part, 16).map_err(|_| Error::InvalidMac(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidMac(s.to_string()));
        }
        Ok(Self(octets))
    }
}

impl Serialize for MacAddr {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MacAddr {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// L4 protocol of a service or endpoint port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// IANA protocol number
    pub fn ip_proto(&self) -> u8 {
        match self {
            Protocol::Tcp => 6,
            Protocol::Udp => 17,
            Protocol::Sctp => 132,
        }
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            other => Err(Error::invalid_argument(format!("unknown protocol {}", other))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "TCP"),
            Protocol::Udp => write!(f, "UDP"),
            Protocol::Sctp => write!(f, "SCTP"),
        }
    }
}

/// Kubernetes service type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceType {
    #[default]
    ClusterIP,
    NodePort,
    LoadBalancer,
    ExternalName,
    Unknown(String),
}

impl From<&str> for ServiceType {
    fn from(s: &str) -> Self {
        match s {
            "" | "ClusterIP" => ServiceType::ClusterIP,
            "NodePort" => ServiceType::NodePort,
            "LoadBalancer" => ServiceType::LoadBalancer,
            "ExternalName" => ServiceType::ExternalName,
            other => ServiceType::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::ClusterIP => write!(f, "ClusterIP"),
            ServiceType::NodePort => write!(f, "NodePort"),
            ServiceType::LoadBalancer => write!(f, "LoadBalancer"),
            ServiceType::ExternalName => write!(f, "ExternalName"),
            ServiceType::Unknown(other) => write!(f, "{}", other),
        }
    }
}

/// Cluster node as seen by the proxy
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeInfo {
    /// Object name
    pub name: String,
    /// `Hostname` status address
    pub hostname: Option<String>,
    /// `InternalIP` status address
    pub internal_ip: Option<Ipv4Addr>,
}

impl NodeInfo {
    pub fn new(name: impl Into<String>, hostname: Option<&str>, internal_ip: Option<Ipv4Addr>) -> Self {
        Self {
            name: name.into(),
            hostname: hostname.map(str::to_string),
            internal_ip,
        }
    }
}

/// Container port declared by a pod
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
}

/// Pod placement and addressing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PodInfo {
    pub namespace: String,
    pub name: String,
    pub node_name: Option<String>,
    pub pod_ip: Option<Ipv4Addr>,
    pub host_ip: Option<Ipv4Addr>,
    #[serde(default)]
    pub ports: Vec<ContainerPort>,
}

impl PodInfo {
    pub fn key(&self) -> String {
        resource_key(&self.namespace, &self.name)
    }
}

/// One port of a service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub name: Option<String>,
    pub port: u16,
    pub node_port: u16,
    pub target_port: u16,
    pub protocol: Protocol,
}

/// Service addressing
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub namespace: String,
    pub name: String,
    pub cluster_ip: Option<Ipv4Addr>,
    pub service_type: ServiceType,
    #[serde(default)]
    pub external_ips: Vec<Ipv4Addr>,
    #[serde(default)]
    pub ports: Vec<ServicePort>,
}

impl ServiceInfo {
    pub fn key(&self) -> String {
        resource_key(&self.namespace, &self.name)
    }

    /// True when `ip` is the cluster IP or one of the external IPs
    pub fn serves_ip(&self, ip: Ipv4Addr) -> bool {
        self.cluster_ip == Some(ip) || self.external_ips.contains(&ip)
    }

    /// Port whose service port equals `port`, falling back to the first one
    pub fn port_for(&self, port: u16) -> Option<&ServicePort> {
        self.ports
            .iter()
            .find(|p| p.port == port)
            .or_else(|| self.ports.first())
    }

    /// Port whose node port equals `node_port`
    pub fn port_for_node_port(&self, node_port: u16) -> Option<&ServicePort> {
        self.ports
            .iter()
            .find(|p| p.node_port != 0 && p.node_port == node_port)
    }
}

/// Port exposed by an endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointPort {
    pub name: Option<String>,
    pub port: u16,
    pub protocol: Protocol,
}

/// The pod backing a service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Service namespace
    pub namespace: String,
    /// Service name
    pub name: String,
    pub pod_namespace: String,
    pub pod_name: String,
    pub pod_ip: Option<Ipv4Addr>,
    pub node_name: Option<String>,
    #[serde(default)]
    pub ports: Vec<EndpointPort>,
}

impl EndpointInfo {
    /// Identifier shared with the owning service
    pub fn key(&self) -> String {
        resource_key(&self.namespace, &self.name)
    }

    /// `iface-id` of the backing pod's interface
    pub fn pod_key(&self) -> String {
        resource_key(&self.pod_namespace, &self.pod_name)
    }

    /// Protocol of the first endpoint port
    pub fn protocol(&self) -> Option<Protocol> {
        self.ports.first().map(|p| p.protocol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mac_parse_and_display() {
        let mac: MacAddr = "0A:58:0a:f4:00:07".parse().unwrap();
        assert_eq!(mac.octets(), [0x0a, 0x58, 0x0a, 0xf4, 0x00, 0x07]);
        assert_eq!(mac.to_string(), "0a:58:0a:f4:00:07");
    }

    #[test]
    fn test_mac_rejects_garbage() {
        assert!("0a:58:0a".parse::<MacAddr>().is_err());
        assert!("0a:58:0a:f4:00:07:99".parse::<MacAddr>().is_err());
        assert!("zz:58:0a:f4:00:07".parse::<MacAddr>().is_err());
        assert!("".parse::<MacAddr>().is_err());
    }

    #[test]
    fn test_protocol_is_case_insensitive() {
        assert_eq!("tcp".parse::<Protocol>().unwrap(), Protocol::Tcp);
        assert_eq!("UDP".parse::<Protocol>().unwrap(), Protocol::Udp);
        assert!("icmp".parse::<Protocol>().is_err());
    }

    #[test]
    fn test_service_type_from_str() {
        assert_eq!(ServiceType::from(""), ServiceType::ClusterIP);
        assert_eq!(ServiceType::from("NodePort"), ServiceType::NodePort);
        assert_eq!(
            ServiceType::from("Weird"),
            ServiceType::Unknown("Weird".to_string())
        );
    }

    #[test]
    fn test_keys() {
        let ep = EndpointInfo {
            namespace: "default".into(),
            name: "web".into(),
            pod_namespace: "default".into(),
            pod_name: "web-0".into(),
            ..Default::default()
        };
        assert_eq!(ep.key(), "default:web");
        assert_eq!(ep.pod_key(), "default:web-0");
    }

    #[test]
    fn test_service_port_selection() {
        let srv = ServiceInfo {
            namespace: "default".into(),
            name: "web".into(),
            cluster_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            service_type: ServiceType::NodePort,
            external_ips: vec![Ipv4Addr::new(172, 16, 0, 9)],
            ports: vec![
                ServicePort {
                    name: Some("http".into()),
                    port: 80,
                    node_port: 30080,
                    target_port: 8080,
                    protocol: Protocol::Tcp,
                },
                ServicePort {
                    name: Some("https".into()),
                    port: 443,
                    node_port: 30443,
                    target_port: 8443,
                    protocol: Protocol::Tcp,
                },
            ],
        };
        assert!(srv.serves_ip(Ipv4Addr::new(172, 16, 0, 9)));
        assert!(!srv.serves_ip(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(srv.port_for(443).unwrap().target_port, 8443);
        assert_eq!(srv.port_for(9999).unwrap().target_port, 8080);
        assert_eq!(srv.port_for_node_port(30443).unwrap().port, 443);
        assert!(srv.port_for_node_port(0).is_none());
    }
}
