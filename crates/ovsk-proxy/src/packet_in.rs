//! Reactive service flows
//!
//! A punted packet names a service address. The handler resolves the backing
//! pod and the client's switch port, then installs a NAT flow pair for the
//! connection that expires when idle.

use ovsk_core::{MacAddr, EXTERNAL_ID_ATTACHED_MAC, EXTERNAL_ID_IFACE_ID, EXTERNAL_ID_IP_ADDRESS};
use ovsk_openflow::pipeline::{self, ServiceConnection};
use ovsk_openflow::{Flow, PacketIn, SwitchHandle};
use std::net::Ipv4Addr;
use tracing::debug;

use crate::error::{ProxyError, Result};
use crate::packet::{self, L4Packet};
use crate::reconciler::ServiceProxy;

impl ServiceProxy {
    /// Handle a table-miss packet; returns the flows installed (none on a miss)
    pub async fn handle_packet_in(&self, switch: &SwitchHandle, packet: &PacketIn) -> Result<Vec<Flow>> {
        let pkt = packet::decode(&packet.data)?;
        let Some(conn) = self.resolve_connection(&pkt).await? else {
            return Ok(Vec::new());
        };

        let flows = pipeline::service_flows(&conn);
        for flow in &flows {
            switch.install_flow(flow.clone())?;
        }
        debug!(
            "{}:{} -> {}:{} now served by {}:{}",
            conn.client_ip,
            conn.client_port,
            conn.service_ip,
            conn.service_port,
            conn.pod_ip,
            conn.target_port
        );
        Ok(flows)
    }

    async fn resolve_connection(&self, pkt: &L4Packet) -> Result<Option<ServiceConnection>> {
        // Snapshot under the lock, resolve ports without it
        let (endpoint, service, via_node_ip, remote_host) = {
            let state = self.state.lock().await;
            let Some((endpoint, service)) = state.find_endpoint_service(pkt.dst_ip, pkt.dst_port)
            else {
                debug!("No endpoint behind {}:{}", pkt.dst_ip, pkt.dst_port);
                return Ok(None);
            };
            (
                endpoint.clone(),
                service.clone(),
                state.node_ip == Some(pkt.dst_ip),
                state.remote_pods.get(&pkt.src_ip).copied(),
            )
        };

        let service_port = if via_node_ip {
            service.port_for_node_port(pkt.dst_port)
        } else {
            service.port_for(pkt.dst_port)
        }
        .ok_or_else(|| ProxyError::PortUnresolved(format!("service port of {}", service.key())))?;

        // Destination: the endpoint's pod
        let pod_key = endpoint.pod_key();
        let (pod_of_port, ids) = self
            .store()
            .external_ids_with_of_port(EXTERNAL_ID_IFACE_ID, &pod_key)
            .await?;
        let pod_mac: MacAddr = ids
            .get(EXTERNAL_ID_ATTACHED_MAC)
            .ok_or_else(|| ProxyError::MissingExternalId {
                interface: pod_key.clone(),
                key: EXTERNAL_ID_ATTACHED_MAC,
            })?
            .parse()?;
        let pod_ip = ids
            .get(EXTERNAL_ID_IP_ADDRESS)
            .and_then(|ip| ip.parse::<Ipv4Addr>().ok())
            .or(endpoint.pod_ip)
            .ok_or_else(|| ProxyError::MissingExternalId {
                interface: pod_key.clone(),
                key: EXTERNAL_ID_IP_ADDRESS,
            })?;

        // Source: local pod, remote pod behind a tunnel, or the service's own port
        let mut client_mac = None;
        let client_of_port = match self
            .store()
            .of_port_by_external_id(EXTERNAL_ID_IP_ADDRESS, &pkt.src_ip.to_string())
            .await
        {
            Ok(port) => port,
            Err(e) if e.is_transient() => match remote_host {
                Some(host) => self
                    .store()
                    .tunnel_port_by_remote_ip(&host.to_string())
                    .await
                    .ok_or_else(|| ProxyError::PortUnresolved(format!("tunnel to {}", host)))?,
                None => {
                    let port = self
                        .store()
                        .of_port_by_external_id(EXTERNAL_ID_IP_ADDRESS, &pkt.dst_ip.to_string())
                        .await
                        .map_err(|_| ProxyError::PortUnresolved(format!("source {}", pkt.src_ip)))?;
                    client_mac = Some(pkt.src_mac);
                    port
                }
            },
            Err(e) => return Err(e.into()),
        };

        Ok(Some(ServiceConnection {
            protocol: pkt.protocol,
            client_ip: pkt.src_ip,
            client_port: pkt.src_port,
            client_of_port,
            client_mac,
            service_ip: pkt.dst_ip,
            service_port: pkt.dst_port,
            pod_ip,
            pod_mac,
            target_port: service_port.target_port,
            pod_of_port,
        }))
    }
}
