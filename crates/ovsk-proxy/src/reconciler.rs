//! Kubernetes resource reconciler
//!
//! Turns node, pod, service and endpoint updates into tunnel ports and flows.
//! All per-kind maps live behind one async mutex, so the flows of a service
//! are recomputed by one task at a time. Flows owned by pods and services are
//! remembered, which lets a reconnecting switch get them back and lets a
//! REMOVE take them out again.

use ovsk_core::{
    EndpointInfo, EndpointsUpdate, MacAddr, NodeUpdate, Operation, PodInfo, PodUpdate,
    Protocol, ServiceInfo, ServiceType, ServiceUpdate, EXTERNAL_ID_ATTACHED_MAC,
    EXTERNAL_ID_IFACE_ID, EXTERNAL_ID_IP_ADDRESS,
};
use ovsk_openflow::{pipeline, Flow, SwitchHandle};
use ovsk_ovsdb::{OvsdbError, SwitchDriver, SwitchStore};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::{ProxyError, Result};

/// VXLAN port name for the node at `ip`: `tun10_0_0_2`
pub fn tunnel_port_name(ip: Ipv4Addr) -> String {
    format!("tun{}", ip.to_string().replace('.', "_"))
}

#[derive(Debug, Default)]
pub(crate) struct ProxyState {
    pub(crate) node_ip: Option<Ipv4Addr>,
    /// Remote node name to tunnel endpoint
    pub(crate) nodes: HashMap<String, Ipv4Addr>,
    /// Remote pod IP to host IP
    pub(crate) remote_pods: HashMap<Ipv4Addr, Ipv4Addr>,
    pub(crate) services: HashMap<String, ServiceInfo>,
    pub(crate) endpoints: HashMap<String, EndpointInfo>,
    pod_flows: HashMap<String, Vec<Flow>>,
    service_flows: HashMap<String, Vec<Flow>>,
}

impl ProxyState {
    /// Endpoint and service behind `ip:port`. Node IP traffic is matched by
    /// node port, everything else by cluster or external IP.
    pub(crate) fn find_endpoint_service(
        &self,
        ip: Ipv4Addr,
        port: u16,
    ) -> Option<(&EndpointInfo, &ServiceInfo)> {
        let service = if self.node_ip == Some(ip) {
            self.services
                .values()
                .find(|s| s.port_for_node_port(port).is_some())
        } else {
            self.services.values().find(|s| s.serves_ip(ip))
        }?;
        let endpoint = self.endpoints.get(&service.key())?;
        Some((endpoint, service))
    }
}

/// Per-node service proxy
pub struct ServiceProxy {
    node_name: String,
    driver: SwitchDriver,
    pub(crate) state: Mutex<ProxyState>,
    switch: RwLock<Option<SwitchHandle>>,
}

impl ServiceProxy {
    pub fn new(node_name: impl Into<String>, node_ip: Option<Ipv4Addr>, driver: SwitchDriver) -> Self {
        Self {
            node_name: node_name.into(),
            driver,
            state: Mutex::new(ProxyState {
                node_ip,
                ..Default::default()
            }),
            switch: RwLock::new(None),
        }
    }

    pub fn node_name(&self) -> &str {
        &self.node_name
    }

    pub fn driver(&self) -> &SwitchDriver {
        &self.driver
    }

    pub(crate) fn store(&self) -> &SwitchStore {
        self.driver.store()
    }

    pub async fn node_ip(&self) -> Option<Ipv4Addr> {
        self.state.lock().await.node_ip
    }

    /// Tunnel endpoint recorded for a remote node
    pub async fn tunnel_endpoint(&self, node_name: &str) -> Option<Ipv4Addr> {
        self.state.lock().await.nodes.get(node_name).copied()
    }

    /// Host of a pod running on another node
    pub async fn remote_pod_host(&self, pod_ip: Ipv4Addr) -> Option<Ipv4Addr> {
        self.state.lock().await.remote_pods.get(&pod_ip).copied()
    }

    pub async fn switch(&self) -> Option<SwitchHandle> {
        self.switch.read().await.clone()
    }

    // ========================================================================
    // Switch attachment
    // ========================================================================

    /// Install the base pipeline plus every owned flow, then route new flows to `switch`
    pub async fn attach_switch(&self, switch: SwitchHandle) -> Result<()> {
        pipeline::install_pipeline(&switch)?;
        let state = self.state.lock().await;
        let owned = state
            .pod_flows
            .values()
            .chain(state.service_flows.values())
            .flatten();
        let mut count = 0;
        for flow in owned {
            switch.install_flow(flow.clone())?;
            count += 1;
        }
        info!(
            "Pipeline installed on {:#018x} with {} owned flows",
            switch.datapath_id(),
            count
        );
        *self.switch.write().await = Some(switch);
        Ok(())
    }

    /// Forget `gone` unless a newer connection already replaced it
    pub async fn detach_switch(&self, gone: &SwitchHandle) {
        let mut switch = self.switch.write().await;
        if switch.as_ref().is_some_and(|current| current.same_connection(gone)) {
            *switch = None;
        }
    }

    async fn install_flows(&self, flows: &[Flow]) {
        let switch = self.switch.read().await;
        let Some(switch) = switch.as_ref() else {
            debug!("No switch connected, {} flows wait for it", flows.len());
            return;
        };
        for flow in flows {
            if let Err(e) = switch.install_flow(flow.clone()) {
                warn!("Flow install failed: {}", e);
            }
        }
    }

    async fn remove_flows(&self, flows: &[Flow]) {
        let switch = self.switch.read().await;
        let Some(switch) = switch.as_ref() else {
            return;
        };
        for flow in flows {
            if let Err(e) = switch.remove_flow(flow) {
                warn!("Flow removal failed: {}", e);
            }
        }
    }

    /// Make `flows` the set owned by `key`, removing ones no longer wanted
    async fn replace_flows(
        &self,
        owned: &mut HashMap<String, Vec<Flow>>,
        key: &str,
        flows: Vec<Flow>,
    ) {
        let stale: Vec<Flow> = owned
            .remove(key)
            .unwrap_or_default()
            .into_iter()
            .filter(|f| !flows.contains(f))
            .collect();
        self.remove_flows(&stale).await;
        self.install_flows(&flows).await;
        if !flows.is_empty() {
            owned.insert(key.to_string(), flows);
        }
    }

    // ========================================================================
    // Nodes
    // ========================================================================

    pub async fn on_node_update(&self, update: NodeUpdate) -> Result<()> {
        let node = &update.resource;
        let (Some(ip), Some(hostname)) = (node.internal_ip, node.hostname.as_deref()) else {
            debug!("Ignoring node {} without internal IP or hostname", node.name);
            return Ok(());
        };

        let mut state = self.state.lock().await;
        if hostname == self.node_name || node.name == self.node_name {
            if state.node_ip != Some(ip) {
                info!("Node IP of {} is {}", self.node_name, ip);
                state.node_ip = Some(ip);
            }
            return Ok(());
        }
        if state.node_ip == Some(ip) {
            return Ok(());
        }

        match update.op {
            Operation::Add | Operation::Update => {
                match state.nodes.get(&node.name).copied() {
                    Some(known) if known == ip => return Ok(()),
                    Some(old) => {
                        info!("Node {} moved from {} to {}", node.name, old, ip);
                        self.delete_tunnel(old).await?;
                    }
                    None => {}
                }
                let created = self
                    .driver
                    .create_vtep(&tunnel_port_name(ip), &ip.to_string())
                    .await;
                state.nodes.insert(node.name.clone(), ip);
                created?;
                info!("Tunnel to node {} ({}) ready", node.name, ip);
            }
            Operation::Remove => {
                state.nodes.remove(&node.name);
                self.delete_tunnel(ip).await?;
                info!("Tunnel to node {} ({}) removed", node.name, ip);
            }
        }
        Ok(())
    }

    async fn delete_tunnel(&self, ip: Ipv4Addr) -> Result<()> {
        let name = tunnel_port_name(ip);
        if self.store().is_port_name_present(&name).await {
            self.driver.delete_port_by_name(&name).await?;
        }
        Ok(())
    }

    // ========================================================================
    // Pods
    // ========================================================================

    pub async fn on_pod_update(&self, update: PodUpdate) -> Result<()> {
        let pod = &update.resource;
        let Some(pod_ip) = pod.pod_ip else {
            debug!("Ignoring pod {} without IP", pod.key());
            return Ok(());
        };

        if pod.node_name.as_deref() == Some(self.node_name.as_str()) {
            return self.on_local_pod(update.op, pod, pod_ip).await;
        }

        let mut state = self.state.lock().await;
        match update.op {
            Operation::Add | Operation::Update => {
                if let Some(host_ip) = pod.host_ip {
                    state.remote_pods.insert(pod_ip, host_ip);
                }
            }
            Operation::Remove => {
                state.remote_pods.remove(&pod_ip);
            }
        }
        Ok(())
    }

    async fn on_local_pod(&self, op: Operation, pod: &PodInfo, pod_ip: Ipv4Addr) -> Result<()> {
        let key = pod.key();
        if op == Operation::Remove {
            let mut state = self.state.lock().await;
            if let Some(flows) = state.pod_flows.remove(&key) {
                self.remove_flows(&flows).await;
                info!("Removed flows of pod {}", key);
            }
            return Ok(());
        }

        let (of_port, ids) = match self
            .store()
            .external_ids_with_of_port(EXTERNAL_ID_IP_ADDRESS, &pod_ip.to_string())
            .await
        {
            Ok(found) => found,
            Err(e) if e.is_transient() => {
                debug!("Pod {} has no port yet: {}", key, e);
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let Some(mac) = ids.get(EXTERNAL_ID_ATTACHED_MAC) else {
            debug!("Port of pod {} has no {}", key, EXTERNAL_ID_ATTACHED_MAC);
            return Ok(());
        };
        let mac: MacAddr = mac.parse()?;

        let flows = pipeline::pod_flows(of_port, mac, pod_ip);
        let mut state = self.state.lock().await;
        self.replace_flows(&mut state.pod_flows, &key, flows).await;
        debug!("Pod {} reachable on port {}", key, of_port);
        Ok(())
    }

    // ========================================================================
    // Services and endpoints
    // ========================================================================

    pub async fn on_service_update(&self, update: ServiceUpdate) -> Result<()> {
        let service = update.resource;
        let key = service.key();
        let mut state = self.state.lock().await;
        match update.op {
            Operation::Add | Operation::Update => {
                state.services.insert(key.clone(), service.clone());
                let endpoint = state.endpoints.get(&key).cloned();
                self.setup_service_flows(&mut state, &service, endpoint.as_ref())
                    .await
            }
            Operation::Remove => {
                state.services.remove(&key);
                if let Some(flows) = state.service_flows.remove(&key) {
                    self.remove_flows(&flows).await;
                    info!("Removed flows of service {}", key);
                }
                Ok(())
            }
        }
    }

    pub async fn on_endpoints_update(&self, update: EndpointsUpdate) -> Result<()> {
        let endpoint = update.resource;
        let key = endpoint.key();
        let mut state = self.state.lock().await;
        match update.op {
            Operation::Add | Operation::Update => {
                state.endpoints.insert(key.clone(), endpoint.clone());
                let Some(service) = state.services.get(&key).cloned() else {
                    debug!("Endpoint {} has no service yet", key);
                    return Ok(());
                };
                self.setup_service_flows(&mut state, &service, Some(&endpoint))
                    .await
            }
            Operation::Remove => {
                state.endpoints.remove(&key);
                Ok(())
            }
        }
    }

    async fn setup_service_flows(
        &self,
        state: &mut ProxyState,
        service: &ServiceInfo,
        endpoint: Option<&EndpointInfo>,
    ) -> Result<()> {
        let key = service.key();
        let Some(endpoint) = endpoint else {
            debug!("No endpoint for service {}", key);
            return Ok(());
        };
        let Some(port) = service.ports.first() else {
            debug!("Service {} has no usable port", key);
            return Ok(());
        };
        let protocol = endpoint.protocol().unwrap_or(port.protocol);

        let lookup = self
            .store()
            .of_port_by_external_id(EXTERNAL_ID_IFACE_ID, &endpoint.pod_key())
            .await;
        let flows = match lookup {
            Ok(_) => match local_service_flows(state.node_ip, service, protocol) {
                Some(flows) => flows,
                None => return Ok(()),
            },
            Err(OvsdbError::NotFound { .. }) => {
                let Some(cluster_ip) = service.cluster_ip else {
                    debug!("Service {} has no cluster IP", key);
                    return Ok(());
                };
                let tunnel = self.tunnel_port_for(state, endpoint).await?;
                vec![pipeline::tunnel_flow(cluster_ip, protocol, port.port, tunnel)]
            }
            Err(e) => return Err(e.into()),
        };

        debug!("Service {}: {} flows", key, flows.len());
        self.replace_flows(&mut state.service_flows, &key, flows).await;
        Ok(())
    }

    async fn tunnel_port_for(&self, state: &ProxyState, endpoint: &EndpointInfo) -> Result<u32> {
        let remote_ip = endpoint
            .node_name
            .as_ref()
            .and_then(|node| state.nodes.get(node))
            .copied()
            .ok_or_else(|| {
                ProxyError::PortUnresolved(format!("node of endpoint {}", endpoint.pod_key()))
            })?;
        self.store()
            .tunnel_port_by_remote_ip(&remote_ip.to_string())
            .await
            .ok_or_else(|| ProxyError::PortUnresolved(tunnel_port_name(remote_ip)))
    }
}

/// Punt flows for a service whose endpoint is local; `None` for unsupported types
fn local_service_flows(
    node_ip: Option<Ipv4Addr>,
    service: &ServiceInfo,
    protocol: Protocol,
) -> Option<Vec<Flow>> {
    let port = service.ports.first()?;
    let mut targets: Vec<(Ipv4Addr, u16)> = service
        .cluster_ip
        .iter()
        .chain(service.external_ips.iter())
        .map(|ip| (*ip, port.port))
        .collect();

    match &service.service_type {
        ServiceType::ClusterIP => {}
        ServiceType::NodePort => match node_ip {
            Some(ip) if port.node_port != 0 => targets.push((ip, port.node_port)),
            _ => debug!("Node port of {} not reachable yet", service.key()),
        },
        ServiceType::LoadBalancer | ServiceType::ExternalName => {
            warn!(
                "Unsupported service type {} for {}",
                service.service_type,
                service.key()
            );
            return None;
        }
        ServiceType::Unknown(kind) => {
            warn!("Unknown service type {} for {}", kind, service.key());
            return None;
        }
    }

    Some(
        targets
            .into_iter()
            .map(|(ip, port)| pipeline::punt_flow(ip, protocol, port))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsk_core::ServicePort;

    fn service(kind: ServiceType) -> ServiceInfo {
        ServiceInfo {
            namespace: "default".into(),
            name: "web".into(),
            cluster_ip: Some(Ipv4Addr::new(10, 0, 0, 1)),
            service_type: kind,
            external_ips: vec![Ipv4Addr::new(172, 16, 0, 1)],
            ports: vec![ServicePort {
                name: None,
                port: 80,
                node_port: 30080,
                target_port: 8080,
                protocol: Protocol::Tcp,
            }],
        }
    }

    #[test]
    fn test_tunnel_port_name() {
        assert_eq!(tunnel_port_name(Ipv4Addr::new(192, 168, 1, 5)), "tun192_168_1_5");
    }

    #[test]
    fn test_cluster_ip_punts_cluster_and_external_ips() {
        let flows =
            local_service_flows(None, &service(ServiceType::ClusterIP), Protocol::Tcp).unwrap();
        let dsts: Vec<_> = flows
            .iter()
            .map(|f| (f.match_.ipv4_dst, f.match_.tcp_dst))
            .collect();
        assert_eq!(
            dsts,
            vec![
                (Some(Ipv4Addr::new(10, 0, 0, 1)), Some(80)),
                (Some(Ipv4Addr::new(172, 16, 0, 1)), Some(80)),
            ]
        );
    }

    #[test]
    fn test_node_port_adds_node_ip_punt() {
        let node_ip = Ipv4Addr::new(192, 168, 1, 2);
        let flows =
            local_service_flows(Some(node_ip), &service(ServiceType::NodePort), Protocol::Tcp)
                .unwrap();
        assert_eq!(flows.len(), 3);
        assert!(flows
            .iter()
            .any(|f| f.match_.ipv4_dst == Some(node_ip) && f.match_.tcp_dst == Some(30080)));
    }

    #[test]
    fn test_unsupported_types_get_no_flows() {
        for kind in [
            ServiceType::LoadBalancer,
            ServiceType::ExternalName,
            ServiceType::Unknown("Weird".into()),
        ] {
            assert!(local_service_flows(None, &service(kind), Protocol::Tcp).is_none());
        }
    }

    #[test]
    fn test_find_endpoint_service() {
        let mut state = ProxyState {
            node_ip: Some(Ipv4Addr::new(192, 168, 1, 2)),
            ..Default::default()
        };
        let svc = service(ServiceType::NodePort);
        state.services.insert(svc.key(), svc.clone());
        assert!(state
            .find_endpoint_service(Ipv4Addr::new(10, 0, 0, 1), 80)
            .is_none());

        state.endpoints.insert(
            svc.key(),
            EndpointInfo {
                namespace: "default".into(),
                name: "web".into(),
                ..Default::default()
            },
        );
        assert!(state
            .find_endpoint_service(Ipv4Addr::new(10, 0, 0, 1), 80)
            .is_some());
        assert!(state
            .find_endpoint_service(Ipv4Addr::new(172, 16, 0, 1), 80)
            .is_some());
        assert!(state
            .find_endpoint_service(Ipv4Addr::new(192, 168, 1, 2), 30080)
            .is_some());
        assert!(state
            .find_endpoint_service(Ipv4Addr::new(192, 168, 1, 2), 80)
            .is_none());
    }
}
