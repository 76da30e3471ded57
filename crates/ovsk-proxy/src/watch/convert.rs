//! Kubernetes objects to the proxy's resource views

use k8s_openapi::api::core::v1::{Endpoints, Node, Pod, Service};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use ovsk_core::{
    ContainerPort, EndpointInfo, EndpointPort, NodeInfo, PodInfo, Protocol, ServiceInfo,
    ServicePort, ServiceType,
};
use std::net::Ipv4Addr;

fn parse_ip(raw: Option<&str>) -> Option<Ipv4Addr> {
    raw.and_then(|ip| ip.parse().ok())
}

fn parse_port(port: i32) -> u16 {
    u16::try_from(port).unwrap_or(0)
}

fn parse_protocol(raw: Option<&str>) -> Protocol {
    raw.and_then(|p| p.parse().ok()).unwrap_or_default()
}

pub fn node_info(node: &Node) -> NodeInfo {
    let mut info = NodeInfo {
        name: node.metadata.name.clone().unwrap_or_default(),
        ..Default::default()
    };
    let addresses = node
        .status
        .as_ref()
        .and_then(|s| s.addresses.as_ref())
        .into_iter()
        .flatten();
    for address in addresses {
        match address.type_.as_str() {
            "InternalIP" => info.internal_ip = address.address.parse().ok().or(info.internal_ip),
            "Hostname" => info.hostname = Some(address.address.clone()),
            _ => {}
        }
    }
    info
}

pub fn pod_info(pod: &Pod) -> PodInfo {
    let spec = pod.spec.as_ref();
    let status = pod.status.as_ref();
    let ports = spec
        .map(|s| s.containers.as_slice())
        .unwrap_or_default()
        .iter()
        .flat_map(|c| c.ports.iter().flatten())
        .map(|p| ContainerPort {
            name: p.name.clone(),
            port: parse_port(p.container_port),
            protocol: parse_protocol(p.protocol.as_deref()),
        })
        .filter(|p| p.port != 0)
        .collect();

    PodInfo {
        namespace: pod.metadata.namespace.clone().unwrap_or_default(),
        name: pod.metadata.name.clone().unwrap_or_default(),
        node_name: spec.and_then(|s| s.node_name.clone()),
        pod_ip: parse_ip(status.and_then(|s| s.pod_ip.as_deref())),
        host_ip: parse_ip(status.and_then(|s| s.host_ip.as_deref())),
        ports,
    }
}

/// Ports with port or target port 0 are dropped; named target ports count as 0
pub fn service_info(service: &Service) -> ServiceInfo {
    let spec = service.spec.as_ref();
    let ports = spec
        .and_then(|s| s.ports.as_ref())
        .into_iter()
        .flatten()
        .map(|p| ServicePort {
            name: p.name.clone(),
            port: parse_port(p.port),
            node_port: p.node_port.map(parse_port).unwrap_or(0),
            target_port: match &p.target_port {
                Some(IntOrString::Int(port)) => parse_port(*port),
                Some(IntOrString::String(_)) => 0,
                None => parse_port(p.port),
            },
            protocol: parse_protocol(p.protocol.as_deref()),
        })
        .filter(|p| p.port != 0 && p.target_port != 0)
        .collect();

    ServiceInfo {
        namespace: service.metadata.namespace.clone().unwrap_or_default(),
        name: service.metadata.name.clone().unwrap_or_default(),
        cluster_ip: parse_ip(spec.and_then(|s| s.cluster_ip.as_deref())),
        service_type: ServiceType::from(spec.and_then(|s| s.type_.as_deref()).unwrap_or("")),
        external_ips: spec
            .and_then(|s| s.external_ips.as_ref())
            .into_iter()
            .flatten()
            .filter_map(|ip| ip.parse().ok())
            .collect(),
        ports,
    }
}

/// The last address of the subsets carries the backing pod; `None` without addresses
pub fn endpoint_info(endpoints: &Endpoints) -> Option<EndpointInfo> {
    let subsets = endpoints.subsets.as_ref()?;
    let (subset, address) = subsets.iter().rev().find_map(|subset| {
        subset
            .addresses
            .as_ref()
            .and_then(|a| a.last())
            .map(|address| (subset, address))
    })?;
    let target = address.target_ref.as_ref();

    Some(EndpointInfo {
        namespace: endpoints.metadata.namespace.clone().unwrap_or_default(),
        name: endpoints.metadata.name.clone().unwrap_or_default(),
        pod_namespace: target
            .and_then(|t| t.namespace.clone())
            .unwrap_or_default(),
        pod_name: target.and_then(|t| t.name.clone()).unwrap_or_default(),
        pod_ip: address.ip.parse().ok(),
        node_name: address.node_name.clone(),
        ports: subset
            .ports
            .iter()
            .flatten()
            .map(|p| EndpointPort {
                name: p.name.clone(),
                port: parse_port(p.port),
                protocol: parse_protocol(p.protocol.as_deref()),
            })
            .collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{
        EndpointAddress, EndpointSubset, NodeAddress, NodeStatus, ObjectReference, ServiceSpec,
    };
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use pretty_assertions::assert_eq;

    fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
        ObjectMeta {
            namespace: namespace.map(str::to_string),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_node_addresses() {
        let node = Node {
            metadata: meta(None, "node-b"),
            status: Some(NodeStatus {
                addresses: Some(vec![
                    NodeAddress {
                        type_: "InternalIP".into(),
                        address: "192.168.1.5".into(),
                    },
                    NodeAddress {
                        type_: "Hostname".into(),
                        address: "node-b".into(),
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            node_info(&node),
            NodeInfo::new("node-b", Some("node-b"), Some(Ipv4Addr::new(192, 168, 1, 5)))
        );
    }

    #[test]
    fn test_service_drops_unusable_ports() {
        let service = Service {
            metadata: meta(Some("default"), "web"),
            spec: Some(ServiceSpec {
                cluster_ip: Some("10.0.0.1".into()),
                type_: Some("NodePort".into()),
                external_ips: Some(vec!["172.16.0.1".into(), "not-an-ip".into()]),
                ports: Some(vec![
                    k8s_openapi::api::core::v1::ServicePort {
                        port: 80,
                        node_port: Some(30080),
                        target_port: Some(IntOrString::Int(8080)),
                        protocol: Some("TCP".into()),
                        ..Default::default()
                    },
                    k8s_openapi::api::core::v1::ServicePort {
                        port: 443,
                        target_port: Some(IntOrString::String("https".into())),
                        ..Default::default()
                    },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let info = service_info(&service);
        assert_eq!(info.key(), "default:web");
        assert_eq!(info.service_type, ServiceType::NodePort);
        assert_eq!(info.external_ips, vec![Ipv4Addr::new(172, 16, 0, 1)]);
        assert_eq!(
            info.ports,
            vec![ServicePort {
                name: None,
                port: 80,
                node_port: 30080,
                target_port: 8080,
                protocol: Protocol::Tcp,
            }]
        );
    }

    #[test]
    fn test_endpoint_takes_last_address() {
        let address = |ip: &str, pod: &str| EndpointAddress {
            ip: ip.into(),
            node_name: Some("node-a".into()),
            target_ref: Some(ObjectReference {
                namespace: Some("default".into()),
                name: Some(pod.into()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let endpoints = Endpoints {
            metadata: meta(Some("default"), "web"),
            subsets: Some(vec![EndpointSubset {
                addresses: Some(vec![
                    address("10.244.0.6", "web-0"),
                    address("10.244.0.7", "web-1"),
                ]),
                ports: Some(vec![k8s_openapi::api::core::v1::EndpointPort {
                    port: 8080,
                    protocol: Some("UDP".into()),
                    ..Default::default()
                }]),
                ..Default::default()
            }]),
        };
        let info = endpoint_info(&endpoints).unwrap();
        assert_eq!(info.key(), "default:web");
        assert_eq!(info.pod_key(), "default:web-1");
        assert_eq!(info.pod_ip, Some(Ipv4Addr::new(10, 244, 0, 7)));
        assert_eq!(info.protocol(), Some(Protocol::Udp));
    }

    #[test]
    fn test_endpoint_without_addresses() {
        let endpoints = Endpoints {
            metadata: meta(Some("default"), "web"),
            subsets: Some(vec![EndpointSubset::default()]),
        };
        assert!(endpoint_info(&endpoints).is_none());
    }
}
